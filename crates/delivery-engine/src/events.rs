use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use delivery_protocol::DeliveryEvent;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::api::ApiClient;
use crate::engine::Shared;
use crate::host::Host;
use crate::transport::HttpTransport;

pub const EVENT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PendingEvent {
    pub ip_address: String,
    pub steam_id: String,
    pub timestamp: String,
}

impl PendingEvent {
    pub fn player_join(steam_id: &str, ip_address: &str, at: SystemTime) -> Self {
        Self {
            ip_address: ip_address.to_string(),
            steam_id: steam_id.to_string(),
            timestamp: humantime::format_rfc3339_millis(at).to_string(),
        }
    }

    pub fn to_delivery_event(&self) -> DeliveryEvent {
        DeliveryEvent::player_join(&self.ip_address, &self.steam_id, &self.timestamp)
    }
}

/// Events waiting for a confirmed upload.
///
/// Unbounded: while the backend keeps failing, events keep accumulating.
#[derive(Debug, Default)]
pub struct EventBuffer {
    pending: HashSet<PendingEvent>,
    in_flight: bool,
}

impl EventBuffer {
    pub fn record(&mut self, event: PendingEvent) {
        self.pending.insert(event);
    }

    pub fn snapshot(&self) -> Vec<PendingEvent> {
        self.pending.iter().cloned().collect()
    }

    pub fn remove_sent(&mut self, sent: &[PendingEvent]) {
        for event in sent {
            self.pending.remove(event);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Uploads `events` in one request. True only on a 2xx response.
pub async fn send_events<T: HttpTransport>(
    api: &ApiClient<T>,
    token: &str,
    events: &[PendingEvent],
) -> bool {
    let payload: Vec<DeliveryEvent> = events.iter().map(PendingEvent::to_delivery_event).collect();
    match api.send_events(token, &payload).await {
        Ok(outcome) if outcome.is_success() => {
            debug!(count = events.len(), "sent events");
            true
        }
        Ok(outcome) => {
            warn!(count = events.len(), outcome = %outcome, "failed to send events, keeping them for the next flush");
            false
        }
        Err(err) => {
            warn!(count = events.len(), error = %err, "failed to send events, keeping them for the next flush");
            false
        }
    }
}

pub(crate) fn spawn_batcher<T, H>(
    shared: Arc<Shared<T, H>>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    T: HttpTransport + 'static,
    H: Host + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if AssertUnwindSafe(flush_once(&*shared, &cancel))
                        .catch_unwind()
                        .await
                        .is_err()
                    {
                        error!("event flush panicked");
                    }
                }
            }
        }
        debug!("event batcher stopped");
    })
}

/// Sends everything buffered. Returns `None` when there was nothing to do.
pub(crate) async fn flush_once<T, H>(
    shared: &Shared<T, H>,
    cancel: &CancellationToken,
) -> Option<bool>
where
    T: HttpTransport,
    H: Host,
{
    let (token, batch) = {
        let mut state = shared.state.lock().await;
        if !state.settings.has_token() || state.events.is_empty() || state.events.in_flight {
            return None;
        }
        state.events.in_flight = true;
        (state.settings.api_token.clone(), state.events.snapshot())
    };

    let sent = tokio::select! {
        _ = cancel.cancelled() => None,
        sent = send_events(&shared.api, &token, &batch) => Some(sent),
    };

    let mut state = shared.state.lock().await;
    state.events.in_flight = false;
    if sent == Some(true) {
        state.events.remove_sent(&batch);
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn player_join_uses_rfc3339_timestamp() {
        let event = PendingEvent::player_join("7656", "1.2.3.4", at(1_700_000_000));
        assert_eq!(event.timestamp, "2023-11-14T22:13:20.000Z");
        let wire = event.to_delivery_event();
        assert_eq!(wire.event, "player_join");
        assert_eq!(wire.player_join.steam_id, "7656");
        assert_eq!(wire.player_join.ip_address, "1.2.3.4");
    }

    #[test]
    fn distinct_events_are_kept_separately() {
        let mut buffer = EventBuffer::default();
        buffer.record(PendingEvent::player_join("1", "1.1.1.1", at(10)));
        buffer.record(PendingEvent::player_join("1", "1.1.1.1", at(20)));
        buffer.record(PendingEvent::player_join("1", "1.1.1.1", at(20)));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn remove_sent_keeps_events_recorded_later() {
        let mut buffer = EventBuffer::default();
        buffer.record(PendingEvent::player_join("1", "1.1.1.1", at(10)));
        let sent = buffer.snapshot();
        buffer.record(PendingEvent::player_join("2", "2.2.2.2", at(11)));
        buffer.remove_sent(&sent);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.snapshot()[0].steam_id, "2");
    }
}
