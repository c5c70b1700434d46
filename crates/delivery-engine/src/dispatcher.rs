use std::collections::HashSet;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use delivery_protocol::QueuedCommand;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::history::CommandHistory;
use crate::host::Host;
use crate::transport::HttpTransport;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub received: usize,
    pub executed: usize,
    /// Newly executed ids plus ids already in the history.
    pub acknowledged: Vec<String>,
}

impl DispatchReport {
    fn acknowledge(&mut self, attempt_id: &str) {
        if !self.acknowledged.iter().any(|id| id == attempt_id) {
            self.acknowledged.push(attempt_id.to_string());
        }
    }
}

/// Attempt ids already handled. Each call takes its lock on its own, so
/// nothing stays locked while the host runs a command.
#[async_trait]
pub trait AttemptLog: Send + Sync {
    async fn contains(&self, attempt_id: &str) -> bool;
    async fn add(&self, attempt_id: String);
}

#[async_trait]
impl AttemptLog for Mutex<CommandHistory> {
    async fn contains(&self, attempt_id: &str) -> bool {
        self.lock().await.contains(attempt_id)
    }

    async fn add(&self, attempt_id: String) {
        self.lock().await.add(attempt_id);
    }
}

/// Runs one poll batch in response order.
///
/// An id already in `history` is acknowledged again without executing. An
/// online-only command whose player is not connected is left for a later
/// poll. Only successful executions enter the history.
pub async fn dispatch<H, L>(
    commands: &[QueuedCommand],
    history: &L,
    host: &H,
    online: &HashSet<String>,
    log_executions: bool,
) -> DispatchReport
where
    H: Host + ?Sized,
    L: AttemptLog + ?Sized,
{
    let mut report = DispatchReport {
        received: commands.len(),
        ..Default::default()
    };
    if commands.is_empty() {
        return report;
    }

    for command in commands {
        if history.contains(&command.attempt_id).await {
            debug!(attempt_id = %command.attempt_id, "command already executed, acknowledging again");
            report.acknowledge(&command.attempt_id);
            continue;
        }
        if command.online_only && !online.contains(&command.steam_id) {
            debug!(
                attempt_id = %command.attempt_id,
                steam_id = %command.steam_id,
                "player offline, deferring online-only command"
            );
            continue;
        }

        match AssertUnwindSafe(host.execute(&command.command))
            .catch_unwind()
            .await
        {
            Ok(Ok(true)) => {
                history.add(command.attempt_id.clone()).await;
                report.acknowledge(&command.attempt_id);
                report.executed += 1;
                if log_executions {
                    info!(
                        attempt_id = %command.attempt_id,
                        command = %command.command,
                        "executed command"
                    );
                }
            }
            Ok(Ok(false)) => {
                warn!(
                    attempt_id = %command.attempt_id,
                    command = %command.command,
                    "failed to run command"
                );
            }
            Ok(Err(err)) => {
                error!(
                    attempt_id = %command.attempt_id,
                    command = %command.command,
                    error = %err,
                    "command execution errored"
                );
            }
            Err(_) => {
                error!(
                    attempt_id = %command.attempt_id,
                    command = %command.command,
                    "command execution panicked"
                );
            }
        }
    }

    if log_executions {
        info!(
            received = report.received,
            executed = report.executed,
            "received {} and executed {} commands",
            report.received,
            report.executed
        );
    }
    report
}

/// Reports handled attempt ids. Not retried: the ids stay in the history, so
/// a re-delivery is acknowledged on the next poll.
pub async fn acknowledge<T: HttpTransport>(
    api: &ApiClient<T>,
    token: &str,
    attempt_ids: &[String],
) -> bool {
    if attempt_ids.is_empty() {
        return true;
    }
    match api.acknowledge(token, attempt_ids).await {
        Ok(outcome) if outcome.is_success() => {
            debug!(count = attempt_ids.len(), "acknowledged commands");
            true
        }
        Ok(outcome) => {
            error!(count = attempt_ids.len(), outcome = %outcome, "failed to acknowledge commands");
            false
        }
        Err(err) => {
            error!(count = attempt_ids.len(), error = %err, "failed to acknowledge commands");
            false
        }
    }
}
