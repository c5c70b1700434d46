use anyhow::Context;
use async_trait::async_trait;
use delivery_engine::Host;
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Players the game server reported as connected, keyed by steam id.
#[derive(Debug, Default)]
pub(crate) struct PlayerRegistry {
    players: RwLock<HashMap<String, String>>,
}

impl PlayerRegistry {
    pub(crate) fn connect(&self, steam_id: &str, ip_address: &str) {
        let mut players = self.players.write().unwrap_or_else(|err| err.into_inner());
        players.insert(steam_id.to_string(), ip_address.to_string());
    }

    pub(crate) fn disconnect(&self, steam_id: &str) -> bool {
        let mut players = self.players.write().unwrap_or_else(|err| err.into_inner());
        players.remove(steam_id).is_some()
    }

    pub(crate) fn steam_ids(&self) -> Vec<String> {
        let players = self.players.read().unwrap_or_else(|err| err.into_inner());
        players.keys().cloned().collect()
    }
}

/// Runs delivery commands through an external program, e.g. an RCON client.
/// The command text is passed as the final argument.
pub(crate) struct ProcessHost {
    program: Option<(String, Vec<String>)>,
    timeout: Duration,
    players: Arc<PlayerRegistry>,
}

impl ProcessHost {
    pub(crate) fn new(command_line: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let program = match command_line {
            Some(line) => {
                let mut parts = shell_words::split(line)
                    .with_context(|| format!("invalid host command: {line}"))?;
                if parts.is_empty() {
                    anyhow::bail!("host command is empty");
                }
                let program = parts.remove(0);
                Some((program, parts))
            }
            None => None,
        };
        Ok(Self {
            program,
            timeout,
            players: Arc::new(PlayerRegistry::default()),
        })
    }

    pub(crate) fn players(&self) -> &PlayerRegistry {
        &self.players
    }

    async fn run(&self, program: &str, args: &[String], command: &str) -> anyhow::Result<ExitStatus> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;
        let mut stderr_pipe = child.stderr.take();
        let status = match timeout(self.timeout, child.wait()).await {
            Ok(result) => result.with_context(|| format!("{program} failed"))?,
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                anyhow::bail!("{program} timed out after {}s", self.timeout.as_secs())
            }
        };
        if !status.success() {
            let mut stderr = Vec::new();
            if let Some(mut pipe) = stderr_pipe.take() {
                let _ = pipe.read_to_end(&mut stderr).await;
            }
            tracing::debug!(
                program,
                status = %status,
                stderr = %String::from_utf8_lossy(&stderr).trim(),
                "host command exited unsuccessfully"
            );
        }
        Ok(status)
    }
}

#[async_trait]
impl Host for ProcessHost {
    async fn execute(&self, command: &str) -> anyhow::Result<bool> {
        let Some((program, args)) = &self.program else {
            anyhow::bail!("no host command configured");
        };
        let status = self.run(program, args, command).await?;
        Ok(status.success())
    }

    fn online_players(&self) -> Vec<String> {
        self.players.steam_ids()
    }
}
