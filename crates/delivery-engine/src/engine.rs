use std::sync::Arc;
use std::time::{Duration, SystemTime};

use delivery_protocol::control::{LinkStatus, StatusSnapshot};
use delivery_protocol::LinkRequest;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::dispatcher::DispatchReport;
use crate::events::{flush_once, spawn_batcher, PendingEvent, EVENT_FLUSH_INTERVAL};
use crate::host::Host;
use crate::link::{link_server, LinkState, LINK_RETRY_DELAY};
use crate::poller::{poll_once, spawn_poller};
use crate::settings::{Settings, SettingsStore};
use crate::state::{EngineState, LoopHandle};
use crate::transport::HttpTransport;

#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub link_retry_delay: Duration,
    pub event_flush_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            link_retry_delay: LINK_RETRY_DELAY,
            event_flush_interval: EVENT_FLUSH_INTERVAL,
        }
    }
}

pub(crate) struct Shared<T, H> {
    pub(crate) api: ApiClient<T>,
    pub(crate) host: H,
    pub(crate) store: Box<dyn SettingsStore>,
    pub(crate) identity: LinkRequest,
    pub(crate) options: EngineOptions,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) poll_gate: Mutex<()>,
    pub(crate) shutdown: CancellationToken,
}

/// Links the server and, once linked, runs the command poller and the event
/// batcher until the token changes or `shutdown` fires.
pub struct DeliveryEngine<T, H> {
    shared: Arc<Shared<T, H>>,
}

impl<T, H> Clone for DeliveryEngine<T, H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, H> DeliveryEngine<T, H>
where
    T: HttpTransport + 'static,
    H: Host + 'static,
{
    pub fn new(
        api: ApiClient<T>,
        host: H,
        store: Box<dyn SettingsStore>,
        identity: LinkRequest,
        settings: Settings,
        options: EngineOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                host,
                store,
                identity,
                options,
                state: Mutex::new(EngineState::new(settings)),
                poll_gate: Mutex::new(()),
                shutdown,
            }),
        }
    }

    pub fn api(&self) -> &ApiClient<T> {
        &self.shared.api
    }

    pub fn host(&self) -> &H {
        &self.shared.host
    }

    pub async fn start(&self) {
        self.start_link().await;
    }

    /// Starts a link sequence with the current token, replacing any sequence
    /// still retrying. On success the loops are started.
    pub async fn start_link(&self) {
        let (token, session) = {
            let mut state = self.shared.state.lock().await;
            if let Some(previous) = state.link_session.take() {
                previous.cancel();
            }
            if !state.settings.has_token() {
                warn!("api token is not set, use the token command to link this server");
                state.link = LinkStatus::Idle;
                return;
            }
            let session = self.shared.shutdown.child_token();
            state.link_session = Some(session.clone());
            state.link = LinkStatus::Linking;
            (state.settings.api_token.clone(), session)
        };

        let engine = self.clone();
        tokio::spawn(async move {
            let shared = &engine.shared;
            let result = link_server(
                &shared.api,
                &token,
                &shared.identity,
                shared.options.link_retry_delay,
                &session,
            )
            .await;
            engine.finish_link(&session, result).await;
        });
    }

    /// Records a link result unless its session was replaced. The session
    /// check and the loop start happen under the same lock.
    async fn finish_link(&self, session: &CancellationToken, result: LinkState) {
        let mut state = self.shared.state.lock().await;
        if session.is_cancelled() {
            debug!("discarding result of a replaced link session");
            return;
        }
        state.link = result.status();
        if let LinkState::Linked(_) = result {
            self.spawn_loops(&mut state);
        }
    }

    /// Starts the poller and batcher. Loops already running are left alone.
    pub async fn start_loops(&self) {
        let mut state = self.shared.state.lock().await;
        self.spawn_loops(&mut state);
    }

    fn spawn_loops(&self, state: &mut EngineState) {
        if !state.poller_running() {
            let period = state.settings.poll_interval;
            let cancel = self.shared.shutdown.child_token();
            let task = spawn_poller(Arc::clone(&self.shared), period, cancel.clone());
            state.poller = Some(LoopHandle::new(cancel, task));
            info!(interval_secs = period.as_secs_f64(), "command poller started");
        }
        if !state.batcher_running() {
            let period = self.shared.options.event_flush_interval;
            let cancel = self.shared.shutdown.child_token();
            let task = spawn_batcher(Arc::clone(&self.shared), period, cancel.clone());
            state.batcher = Some(LoopHandle::new(cancel, task));
            info!(interval_secs = period.as_secs_f64(), "event batcher started");
        }
    }

    pub async fn stop_loops(&self) {
        let mut state = self.shared.state.lock().await;
        if let Some(poller) = state.poller.take() {
            poller.stop();
            debug!("command poller stop requested");
        }
        if let Some(batcher) = state.batcher.take() {
            batcher.stop();
            debug!("event batcher stop requested");
        }
    }

    /// Replaces the token, persists it and re-links. The new token is in
    /// effect even when persisting fails; the error is returned for the reply.
    pub async fn set_token(&self, token: String) -> anyhow::Result<()> {
        self.stop_loops().await;
        let persisted = {
            let mut state = self.shared.state.lock().await;
            let mut settings = state.settings.clone();
            settings.api_token = token;
            let persisted = self.shared.store.persist(&settings);
            state.settings = settings;
            persisted
        };
        info!("api token updated, relinking");
        self.start_link().await;
        persisted
    }

    pub async fn record_player_join(&self, steam_id: &str, ip_address: &str) {
        let event = PendingEvent::player_join(steam_id, ip_address, SystemTime::now());
        let mut state = self.shared.state.lock().await;
        state.events.record(event);
        debug!(steam_id, pending = state.events.len(), "player join recorded");
    }

    /// Runs one poll cycle now, outside the timer.
    pub async fn poll_commands(&self) -> Option<DispatchReport> {
        poll_once(&*self.shared, &self.shared.shutdown).await
    }

    /// Flushes buffered events now. `None` when there was nothing to send.
    pub async fn flush_events(&self) -> Option<bool> {
        flush_once(&*self.shared, &CancellationToken::new()).await
    }

    pub async fn status(&self) -> StatusSnapshot {
        let mut online_players = self.shared.host.online_players();
        online_players.sort();
        let state = self.shared.state.lock().await;
        StatusSnapshot {
            link: state.link,
            token_configured: state.settings.has_token(),
            poller_running: state.poller_running(),
            batcher_running: state.batcher_running(),
            poll_interval_secs: state.settings.poll_interval.as_secs_f64(),
            history_len: state.history.len(),
            pending_events: state.events.len(),
            online_players,
        }
    }

    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.stop_loops().await;
        let mut state = self.shared.state.lock().await;
        state.link_session = None;
    }
}
