use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use delivery_protocol::QueuedCommand;

use crate::host::Host;
use crate::settings::{Settings, SettingsStore};
use crate::transport::{HttpOutcome, HttpRequest, HttpTransport, Method};

/// Transport that answers from per-endpoint scripts. The last scripted
/// outcome for an endpoint repeats; unscripted endpoints answer 204.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    inner: Arc<FakeTransportInner>,
}

#[derive(Default)]
struct FakeTransportInner {
    scripts: Mutex<HashMap<(Method, String), VecDeque<HttpOutcome>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(&self, method: Method, path: &str, outcome: HttpOutcome) {
        self.inner
            .scripts
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(outcome);
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests_to(&self, method: Method, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method && request.url.ends_with(path))
            .collect()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> HttpOutcome {
        let outcome = {
            let mut scripts = self.inner.scripts.lock().unwrap();
            let queue = scripts
                .iter_mut()
                .find(|((method, path), _)| *method == request.method && request.url.ends_with(path.as_str()))
                .map(|(_, queue)| queue);
            match queue {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue.front().cloned().unwrap(),
                None => HttpOutcome::Response {
                    status: 204,
                    body: String::new(),
                },
            }
        };
        self.inner.requests.lock().unwrap().push(request);
        outcome
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum HostReply {
    Reject,
    Error,
    Panic,
    /// Accepts after holding the call for the given time.
    Delay(Duration),
}

/// Host that records every executed command. Commands succeed unless a reply
/// was registered for them.
#[derive(Clone, Default)]
pub(crate) struct FakeHost {
    inner: Arc<FakeHostInner>,
}

#[derive(Default)]
struct FakeHostInner {
    replies: Mutex<HashMap<String, HostReply>>,
    executed: Mutex<Vec<String>>,
    online: Mutex<Vec<String>>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply_to(&self, command: &str, reply: HostReply) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .insert(command.to_string(), reply);
    }

    pub(crate) fn set_online(&self, steam_ids: &[&str]) {
        *self.inner.online.lock().unwrap() = steam_ids.iter().map(|id| id.to_string()).collect();
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.inner.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn execute(&self, command: &str) -> anyhow::Result<bool> {
        self.inner.executed.lock().unwrap().push(command.to_string());
        let reply = self.inner.replies.lock().unwrap().get(command).copied();
        match reply {
            None => Ok(true),
            Some(HostReply::Reject) => Ok(false),
            Some(HostReply::Error) => anyhow::bail!("host exploded running {command}"),
            Some(HostReply::Panic) => panic!("host panicked running {command}"),
            Some(HostReply::Delay(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(true)
            }
        }
    }

    fn online_players(&self) -> Vec<String> {
        self.inner.online.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    saved: Arc<Mutex<Vec<Settings>>>,
    fail: bool,
}

impl MemoryStore {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn saved(&self) -> Vec<Settings> {
        self.saved.lock().unwrap().clone()
    }
}

impl SettingsStore for MemoryStore {
    fn persist(&self, settings: &Settings) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("disk full");
        }
        self.saved.lock().unwrap().push(settings.clone());
        Ok(())
    }
}

pub(crate) fn queued(attempt_id: &str, steam_id: &str, command: &str, online_only: bool) -> QueuedCommand {
    QueuedCommand {
        attempt_id: attempt_id.to_string(),
        steam_id: steam_id.to_string(),
        command: command.to_string(),
        online_only,
        queued_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

pub(crate) fn command_batch(commands: &[(&str, &str, &str, bool)]) -> String {
    let batch: Vec<QueuedCommand> = commands
        .iter()
        .map(|(attempt_id, steam_id, command, online_only)| {
            queued(attempt_id, steam_id, command, *online_only)
        })
        .collect();
    serde_json::to_string(&batch).unwrap()
}

pub(crate) fn link_ok_body() -> String {
    serde_json::json!({
        "update_available": false,
        "latest_version": "0.1.0",
        "previously_linked": null,
        "gameserver": {
            "id": "gs_1",
            "store_id": "store_1",
            "name": "Test Server",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }
    })
    .to_string()
}
