use delivery_protocol::{
    AckEntry, CommandQueueRequest, DeliveryEvent, LinkRequest, COMMAND_QUEUE_PATH, EVENTS_PATH,
    LINK_PATH,
};
use serde::Serialize;

use crate::transport::{HttpOutcome, HttpRequest, HttpTransport, Method};

/// Backend endpoints, authenticated with the game server token.
pub struct ApiClient<T> {
    transport: T,
    base_url: String,
}

impl<T: HttpTransport> ApiClient<T> {
    pub fn new(transport: T, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn link(&self, token: &str, request: &LinkRequest) -> anyhow::Result<HttpOutcome> {
        self.send_json(Method::Post, LINK_PATH, token, request).await
    }

    pub async fn fetch_commands(
        &self,
        token: &str,
        steam_ids: Vec<String>,
    ) -> anyhow::Result<HttpOutcome> {
        let request = CommandQueueRequest { steam_ids };
        self.send_json(Method::Post, COMMAND_QUEUE_PATH, token, &request)
            .await
    }

    pub async fn acknowledge(
        &self,
        token: &str,
        attempt_ids: &[String],
    ) -> anyhow::Result<HttpOutcome> {
        let entries: Vec<AckEntry> = attempt_ids.iter().map(AckEntry::new).collect();
        self.send_json(Method::Delete, COMMAND_QUEUE_PATH, token, &entries)
            .await
    }

    pub async fn send_events(
        &self,
        token: &str,
        events: &[DeliveryEvent],
    ) -> anyhow::Result<HttpOutcome> {
        self.send_json(Method::Post, EVENTS_PATH, token, events).await
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: &B,
    ) -> anyhow::Result<HttpOutcome> {
        let body = serde_json::to_string(body)?;
        let request = HttpRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            body: Some(body),
            headers: auth_headers(token),
        };
        Ok(self.transport.send(request).await)
    }
}

pub fn auth_headers(token: &str) -> Vec<(String, String)> {
    vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Authorization".to_string(), format!("Gameserver {token}")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeTransport;
    use serde_json::Value;

    #[tokio::test]
    async fn requests_carry_token_and_json_content_type() {
        let api = ApiClient::new(FakeTransport::new(), "https://api.example.test/");
        api.fetch_commands("secret", vec!["7656".to_string()])
            .await
            .expect("send");
        let sent = api.transport().requests();
        assert_eq!(sent.len(), 1);
        let request = &sent[0];
        assert_eq!(request.method, Method::Post);
        assert_eq!(
            request.url,
            "https://api.example.test/v1/delivery/command-queue/"
        );
        assert!(request
            .headers
            .contains(&("Authorization".to_string(), "Gameserver secret".to_string())));
        assert!(request
            .headers
            .contains(&("Content-Type".to_string(), "application/json".to_string())));
        let body: Value = serde_json::from_str(request.body.as_deref().expect("body")).expect("json");
        assert_eq!(body, serde_json::json!({"steam_ids": ["7656"]}));
    }

    #[tokio::test]
    async fn acknowledge_uses_delete_with_attempt_ids() {
        let api = ApiClient::new(FakeTransport::new(), "https://api.example.test");
        api.acknowledge("secret", &["a1".to_string(), "a2".to_string()])
            .await
            .expect("send");
        let sent = api.transport().requests();
        assert_eq!(sent[0].method, Method::Delete);
        let body: Value = serde_json::from_str(sent[0].body.as_deref().expect("body")).expect("json");
        assert_eq!(
            body,
            serde_json::json!([{"attempt_id": "a1"}, {"attempt_id": "a2"}])
        );
    }
}
