use async_trait::async_trait;

/// The game server the engine delivers into.
#[async_trait]
pub trait Host: Send + Sync {
    /// Runs one command. `Ok(false)` means the host rejected it.
    async fn execute(&self, command: &str) -> anyhow::Result<bool>;

    /// Steam ids of the players connected right now.
    fn online_players(&self) -> Vec<String>;
}
