use serde::{Deserialize, Deserializer, Serialize};

pub mod control;
pub mod framing;

pub const DEFAULT_API_URL: &str = "https://api.paynow.gg";
pub const LINK_PATH: &str = "/v1/delivery/gameserver/link";
pub const COMMAND_QUEUE_PATH: &str = "/v1/delivery/command-queue/";
pub const EVENTS_PATH: &str = "/v1/delivery/events";

pub const PLAYER_JOIN_EVENT: &str = "player_join";

/// Identity a game server presents when linking its token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkRequest {
    pub ip: String,
    pub hostname: String,
    pub platform: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub update_available: bool,
    #[serde(default)]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub previously_linked: Option<PreviouslyLinked>,
    #[serde(default, alias = "game_server")]
    pub gameserver: Option<GameServer>,
}

/// Where the token was last linked from, when that was a different server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviouslyLinked {
    #[serde(default, deserialize_with = "null_as_default")]
    pub ip: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hostname: String,
    #[serde(default)]
    pub last_linked_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameServer {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub store_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandQueueRequest {
    pub steam_ids: Vec<String>,
}

/// One pending delivery as returned by the command queue.
///
/// `attempt_id` is unique within one response but the backend re-sends it
/// until it has been acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedCommand {
    pub attempt_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub steam_id: String,
    pub command: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub online_only: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub queued_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AckEntry {
    pub attempt_id: String,
}

impl AckEntry {
    pub fn new(attempt_id: impl Into<String>) -> Self {
        Self {
            attempt_id: attempt_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerJoin {
    pub ip_address: String,
    pub steam_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryEvent {
    pub event: String,
    pub player_join: PlayerJoin,
    pub timestamp: String,
}

impl DeliveryEvent {
    pub fn player_join(
        ip_address: impl Into<String>,
        steam_id: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            event: PLAYER_JOIN_EVENT.to_string(),
            player_join: PlayerJoin {
                ip_address: ip_address.into(),
                steam_id: steam_id.into(),
            },
            timestamp: timestamp.into(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
