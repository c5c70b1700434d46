use delivery_protocol::control::Caller;
use tracing::{error, warn};

use crate::engine::DeliveryEngine;
use crate::host::Host;
use crate::transport::HttpTransport;

pub const TOKEN_COMMAND: &str = "paynow.token";

/// The operator's "set API token" command. Returns the reply for the caller.
pub async fn handle_token_command<T, H>(
    engine: &DeliveryEngine<T, H>,
    caller: Caller,
    args: &[String],
) -> String
where
    T: HttpTransport + 'static,
    H: Host + 'static,
{
    if !caller.is_privileged() {
        warn!(?caller, "token command refused");
        return "You do not have permission to use this command.".to_string();
    }
    let [token] = args else {
        return format!("Usage: {TOKEN_COMMAND} <token>");
    };
    match engine.set_token(token.clone()).await {
        Ok(()) => "Token set!".to_string(),
        Err(err) => {
            error!(error = %err, "failed to save api token");
            format!("Token set, but saving it failed: {err}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::engine::EngineOptions;
    use crate::settings::Settings;
    use crate::test_utils::{FakeHost, FakeTransport, MemoryStore};
    use delivery_protocol::LinkRequest;
    use tokio_util::sync::CancellationToken;

    fn engine(store: &MemoryStore) -> DeliveryEngine<FakeTransport, FakeHost> {
        DeliveryEngine::new(
            ApiClient::new(FakeTransport::new(), "https://api.example.test"),
            FakeHost::new(),
            Box::new(store.clone()),
            LinkRequest {
                ip: "127.0.0.1".to_string(),
                hostname: "test".to_string(),
                platform: "oxide".to_string(),
                version: "0.1.0".to_string(),
            },
            Settings::default(),
            EngineOptions::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn players_cannot_set_token() {
        let store = MemoryStore::default();
        let engine = engine(&store);

        let reply = handle_token_command(&engine, Caller::Player, &["tok".to_string()]).await;

        assert!(reply.contains("permission"));
        assert!(store.saved().is_empty());
        assert!(!engine.status().await.token_configured);
    }

    #[tokio::test]
    async fn wrong_argument_count_replies_with_usage() {
        let store = MemoryStore::default();
        let engine = engine(&store);

        let none = handle_token_command(&engine, Caller::Console, &[]).await;
        let two = handle_token_command(
            &engine,
            Caller::Admin,
            &["a".to_string(), "b".to_string()],
        )
        .await;

        assert_eq!(none, "Usage: paynow.token <token>");
        assert_eq!(two, "Usage: paynow.token <token>");
        assert!(store.saved().is_empty());
    }

    #[tokio::test]
    async fn console_sets_and_persists_token() {
        let store = MemoryStore::default();
        let engine = engine(&store);

        let reply = handle_token_command(&engine, Caller::Console, &["tok".to_string()]).await;

        assert_eq!(reply, "Token set!");
        assert_eq!(store.saved().len(), 1);
        assert_eq!(store.saved()[0].api_token, "tok");
        assert!(engine.status().await.token_configured);
        engine.shutdown().await;
    }
}
