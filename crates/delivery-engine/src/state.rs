use async_trait::async_trait;
use delivery_protocol::control::LinkStatus;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::AttemptLog;
use crate::events::EventBuffer;
use crate::history::CommandHistory;
use crate::settings::Settings;

/// A repeating task and the token that stops it.
pub(crate) struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LoopHandle {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { cancel, task }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    pub(crate) fn stop(self) {
        self.cancel.cancel();
    }
}

/// Everything the link, poll and flush tasks share. Lives behind one mutex.
pub(crate) struct EngineState {
    pub(crate) settings: Settings,
    pub(crate) history: CommandHistory,
    pub(crate) events: EventBuffer,
    pub(crate) link: LinkStatus,
    pub(crate) link_session: Option<CancellationToken>,
    pub(crate) poller: Option<LoopHandle>,
    pub(crate) batcher: Option<LoopHandle>,
}

impl EngineState {
    pub(crate) fn new(settings: Settings) -> Self {
        Self {
            settings,
            history: CommandHistory::default(),
            events: EventBuffer::default(),
            link: LinkStatus::Idle,
            link_session: None,
            poller: None,
            batcher: None,
        }
    }

    pub(crate) fn poller_running(&self) -> bool {
        self.poller.as_ref().is_some_and(LoopHandle::is_running)
    }

    pub(crate) fn batcher_running(&self) -> bool {
        self.batcher.as_ref().is_some_and(LoopHandle::is_running)
    }
}

#[async_trait]
impl AttemptLog for Mutex<EngineState> {
    async fn contains(&self, attempt_id: &str) -> bool {
        self.lock().await.history.contains(attempt_id)
    }

    async fn add(&self, attempt_id: String) {
        self.lock().await.history.add(attempt_id);
    }
}
