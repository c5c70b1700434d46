use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:19320";

/// Who issued an operator command on the game server.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Caller {
    Console,
    Admin,
    Player,
}

impl Caller {
    pub fn is_privileged(self) -> bool {
        matches!(self, Caller::Console | Caller::Admin)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Idle,
    Linking,
    Linked,
    Unauthorized,
    Rejected,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub link: LinkStatus,
    pub token_configured: bool,
    pub poller_running: bool,
    pub batcher_running: bool,
    pub poll_interval_secs: f64,
    pub history_len: usize,
    pub pending_events: usize,
    pub online_players: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    SetToken { caller: Caller, args: Vec<String> },
    PlayerConnected { steam_id: String, ip_address: String },
    PlayerDisconnected { steam_id: String },
    Status,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Reply { message: String },
    Ok,
    Status { snapshot: StatusSnapshot },
    Error { message: String },
}
