use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use delivery_protocol::QueuedCommand;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::dispatcher::{acknowledge, dispatch, DispatchReport};
use crate::engine::Shared;
use crate::host::Host;
use crate::transport::{HttpOutcome, HttpTransport};

pub fn parse_poll_response(outcome: &HttpOutcome) -> anyhow::Result<Vec<QueuedCommand>> {
    match outcome {
        HttpOutcome::TransportError(err) => anyhow::bail!("transport error: {err}"),
        HttpOutcome::Response { status: 200, body } => {
            let commands: Option<Vec<QueuedCommand>> = serde_json::from_str(body)
                .map_err(|err| anyhow::anyhow!("invalid command queue response: {err}"))?;
            commands.ok_or_else(|| anyhow::anyhow!("empty command queue response"))
        }
        HttpOutcome::Response { status, body } => {
            anyhow::bail!("command queue request failed with status {status}: {body}")
        }
    }
}

/// Repeats a poll every `period`, first one immediately. Failed ticks are
/// logged and left for the next tick.
pub(crate) fn spawn_poller<T, H>(
    shared: Arc<Shared<T, H>>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    T: HttpTransport + 'static,
    H: Host + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if AssertUnwindSafe(poll_once(&*shared, &cancel))
                        .catch_unwind()
                        .await
                        .is_err()
                    {
                        error!("command poll panicked");
                    }
                }
            }
        }
        debug!("command poller stopped");
    })
}

/// One poll cycle: upload connected players, run the returned batch, then
/// acknowledge what was handled.
pub(crate) async fn poll_once<T, H>(
    shared: &Shared<T, H>,
    cancel: &CancellationToken,
) -> Option<DispatchReport>
where
    T: HttpTransport,
    H: Host,
{
    // One cycle at a time, whether timer-driven or requested directly.
    let Ok(_cycle) = shared.poll_gate.try_lock() else {
        debug!("poll already in progress, skipping");
        return None;
    };
    let (token, log_executions) = {
        let state = shared.state.lock().await;
        (
            state.settings.api_token.clone(),
            state.settings.log_command_executions,
        )
    };
    if token.is_empty() {
        return None;
    }

    let online = shared.host.online_players();
    let outcome = tokio::select! {
        _ = cancel.cancelled() => return None,
        outcome = shared.api.fetch_commands(&token, online.clone()) => outcome,
    };
    let commands = match outcome.and_then(|outcome| parse_poll_response(&outcome)) {
        Ok(commands) => commands,
        Err(err) => {
            warn!(error = %err, "failed to retrieve commands");
            return None;
        }
    };
    if commands.is_empty() {
        return Some(DispatchReport::default());
    }

    // A received batch always runs to completion so executed ids reach the history.
    // The state lock is taken per history lookup, never across a host call.
    let online: HashSet<String> = online.into_iter().collect();
    let report = dispatch(
        &commands,
        &shared.state,
        &shared.host,
        &online,
        log_executions,
    )
    .await;
    acknowledge(&shared.api, &token, &report.acknowledged).await;
    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> HttpOutcome {
        HttpOutcome::Response {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn parses_command_array() {
        let commands = parse_poll_response(&response(
            200,
            r#"[{"attempt_id": "x1", "steam_id": "", "command": "give item", "online_only": false, "queued_at": "2024-01-01T00:00:00Z"}]"#,
        ))
        .expect("commands");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].attempt_id, "x1");
    }

    #[test]
    fn rejects_unusable_responses() {
        assert!(parse_poll_response(&response(200, "null")).is_err());
        assert!(parse_poll_response(&response(200, "{}")).is_err());
        assert!(parse_poll_response(&response(204, "")).is_err());
        assert!(parse_poll_response(&response(401, "unauthorized")).is_err());
        assert!(parse_poll_response(&HttpOutcome::TransportError("reset".to_string())).is_err());
    }

    #[test]
    fn accepts_empty_array() {
        assert!(parse_poll_response(&response(200, "[]"))
            .expect("commands")
            .is_empty());
    }
}
