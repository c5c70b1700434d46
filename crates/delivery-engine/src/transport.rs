use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
static HTTP_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

/// Result of one request. Transport failures never carry a status, so they
/// cannot be confused with a backend error code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HttpOutcome {
    Response { status: u16, body: String },
    TransportError(String),
}

impl HttpOutcome {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpOutcome::Response { status, .. } => Some(*status),
            HttpOutcome::TransportError(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status(), Some(status) if status / 100 == 2)
    }
}

impl fmt::Display for HttpOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpOutcome::Response { status, body } => write!(f, "status {status}: {body}"),
            HttpOutcome::TransportError(err) => write!(f, "transport error: {err}"),
        }
    }
}

/// Sends one request and resolves exactly once, with either a status or a
/// transport failure.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> HttpOutcome;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> HttpOutcome {
        let request_id = HTTP_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let method = request.method;
        let body_len = request.body.as_ref().map(|value| value.len()).unwrap_or(0);
        tracing::debug!(
            request_id,
            method = %method,
            url = %request.url,
            body_len,
            "http request start"
        );
        let mut builder = match method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Delete => self.client.delete(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(
                    request_id,
                    timeout = err.is_timeout(),
                    connect = err.is_connect(),
                    error = %err,
                    "http request failed"
                );
                return HttpOutcome::TransportError(err.to_string());
            }
        };
        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => {
                tracing::debug!(request_id, status, body_len = body.len(), "http request done");
                HttpOutcome::Response { status, body }
            }
            Err(err) => {
                tracing::debug!(request_id, status, error = %err, "http body read failed");
                HttpOutcome::TransportError(err.to_string())
            }
        }
    }
}
