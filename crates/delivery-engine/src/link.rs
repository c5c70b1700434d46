use std::time::Duration;

use delivery_protocol::control::LinkStatus;
use delivery_protocol::{LinkRequest, LinkResponse};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::ApiClient;
use crate::transport::{HttpOutcome, HttpTransport};

pub const LINK_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How one link response is interpreted.
#[derive(Debug, PartialEq)]
pub enum LinkAttempt {
    Linked(LinkResponse),
    /// 401/403. Needs a new token from the operator.
    Unauthorized(u16),
    /// The backend answered but returned no game server.
    Rejected,
    /// A status the backend chose deliberately, not a transient failure.
    Failed { status: u16, body: String },
    /// Transport error, 5xx, or an unusable success body.
    Retry(String),
}

/// Where a link sequence ended.
#[derive(Debug, PartialEq)]
pub enum LinkState {
    /// No token configured; nothing was sent.
    Idle,
    Linked(LinkResponse),
    Unauthorized,
    Rejected,
    Cancelled,
}

impl LinkState {
    pub fn status(&self) -> LinkStatus {
        match self {
            LinkState::Idle | LinkState::Cancelled => LinkStatus::Idle,
            LinkState::Linked(_) => LinkStatus::Linked,
            LinkState::Unauthorized => LinkStatus::Unauthorized,
            LinkState::Rejected => LinkStatus::Rejected,
        }
    }
}

pub fn classify(outcome: &HttpOutcome) -> LinkAttempt {
    let (status, body) = match outcome {
        HttpOutcome::TransportError(err) => return LinkAttempt::Retry(format!("transport error: {err}")),
        HttpOutcome::Response { status, body } => (*status, body),
    };
    match status {
        401 | 403 => LinkAttempt::Unauthorized(status),
        500.. => LinkAttempt::Retry(format!("server error {status}")),
        200..=299 => match serde_json::from_str::<Option<LinkResponse>>(body) {
            Ok(Some(response)) if response.gameserver.is_some() => LinkAttempt::Linked(response),
            Ok(Some(_)) => LinkAttempt::Rejected,
            Ok(None) => LinkAttempt::Retry("empty link response".to_string()),
            Err(err) => LinkAttempt::Retry(format!("invalid link response: {err}")),
        },
        _ => LinkAttempt::Failed {
            status,
            body: body.clone(),
        },
    }
}

/// Links the server, retrying transient failures every `retry_delay` until the
/// backend gives a definite answer or `cancel` fires.
pub async fn link_server<T: HttpTransport>(
    api: &ApiClient<T>,
    token: &str,
    request: &LinkRequest,
    retry_delay: Duration,
    cancel: &CancellationToken,
) -> LinkState {
    if token.is_empty() {
        warn!("api token is not set, skipping link");
        return LinkState::Idle;
    }
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return LinkState::Cancelled,
            outcome = api.link(token, request) => outcome,
        };
        let outcome = outcome.unwrap_or_else(|err| HttpOutcome::TransportError(err.to_string()));
        match classify(&outcome) {
            LinkAttempt::Linked(response) => {
                report_advisories(&response);
                if let Some(server) = response.gameserver.as_ref() {
                    info!(
                        gameserver_id = %server.id,
                        store_id = %server.store_id,
                        name = %server.name,
                        attempt,
                        "linked game server"
                    );
                }
                return LinkState::Linked(response);
            }
            LinkAttempt::Unauthorized(status) => {
                error!(
                    status,
                    "api token was rejected, set a valid token with the token command"
                );
                return LinkState::Unauthorized;
            }
            LinkAttempt::Rejected => {
                error!("link response did not include a game server, not starting delivery");
                return LinkState::Rejected;
            }
            LinkAttempt::Failed { status, body } => {
                error!(status, body = %body, "link request failed");
                return LinkState::Rejected;
            }
            LinkAttempt::Retry(reason) => {
                warn!(
                    attempt,
                    reason = %reason,
                    retry_in_secs = retry_delay.as_secs_f64(),
                    "link failed, retrying"
                );
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return LinkState::Cancelled,
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }
}

fn report_advisories(response: &LinkResponse) {
    if response.update_available {
        warn!(
            current = env!("CARGO_PKG_VERSION"),
            latest = response.latest_version.as_deref().unwrap_or("unknown"),
            "a newer version of the delivery client is available"
        );
    }
    if let Some(previous) = response.previously_linked.as_ref() {
        warn!(
            ip = %previous.ip,
            hostname = %previous.hostname,
            last_linked_at = previous.last_linked_at.as_deref().unwrap_or("unknown"),
            "this token was previously linked to another server, deliveries now go to this one"
        );
    }
}
