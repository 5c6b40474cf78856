//! HTTP + WebSocket client for the debate service.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::orchestrator::traits::{DebateService, EventStream};
use crate::orchestrator::types::{DebateCreated, DebateSetupRequest};

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Post,
}

pub struct HttpDebateService {
    base_url: String,
    agent: ureq::Agent,
    handshake_timeout: Duration,
}

impl HttpDebateService {
    /// `request_timeout` caps each blocking HTTP call; callers bound them again per setup.
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let agent = ureq::AgentBuilder::new().timeout(request_timeout).build();
        Self {
            base_url,
            agent,
            handshake_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stream_url(&self, debate_id: &str) -> String {
        format!("{}/ws/debate/{debate_id}", websocket_base(&self.base_url))
    }

    async fn call(&self, method: Method, path: &str, body: Option<String>) -> Result<String> {
        let agent = self.agent.clone();
        let url = format!("{}{path}", self.base_url);

        tokio::task::spawn_blocking(move || {
            let request = match method {
                Method::Get => agent.get(&url),
                Method::Post => agent.post(&url),
            };
            let response = match body {
                Some(body) => request
                    .set("Content-Type", "application/json")
                    .send_string(&body),
                None => request.call(),
            };

            let response = match response {
                Ok(response) => response,
                Err(ureq::Error::Status(status, response)) => {
                    let detail = response.into_string().unwrap_or_default();
                    return Err(anyhow!("{url} returned HTTP {status}: {}", detail.trim()));
                }
                Err(err) => return Err(anyhow!("request to {url} failed: {err}")),
            };

            response
                .into_string()
                .with_context(|| format!("failed to read response body from {url}"))
        })
        .await
        .context("HTTP worker task failed")?
    }
}

/// Maps the REST base URL onto the matching WebSocket scheme.
pub(crate) fn websocket_base(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    }
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<String>,
}

#[async_trait]
impl DebateService for HttpDebateService {
    async fn create_debate(&self, request: &DebateSetupRequest) -> Result<DebateCreated> {
        let body = serde_json::to_string(request).context("failed to encode debate setup")?;
        let raw = self.call(Method::Post, "/api/debates", Some(body)).await?;
        let created: DebateCreated =
            serde_json::from_str(&raw).context("malformed debate creation response")?;
        info!(
            target: "debate_service",
            debate_id = %created.id,
            status = %created.status,
            "debate created"
        );
        Ok(created)
    }

    async fn start_debate(&self, debate_id: &str) -> Result<()> {
        self.call(Method::Post, &format!("/api/debates/{debate_id}/start"), None)
            .await?;
        Ok(())
    }

    async fn open_stream(&self, debate_id: &str) -> Result<Box<dyn EventStream>> {
        let url = self.stream_url(debate_id);
        let (socket, _response) = timeout(self.handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                anyhow!(
                    "websocket handshake with {url} did not finish within {:?}",
                    self.handshake_timeout
                )
            })?
            .map_err(|err| anyhow!("failed to connect to {url}: {err}"))?;
        debug!(target: "debate_service", %url, "event stream open");
        Ok(Box::new(WebSocketEventStream { socket }))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let raw = self.call(Method::Get, "/api/models", None).await?;
        let list: ModelList = serde_json::from_str(&raw).context("malformed model list")?;
        Ok(list.models)
    }
}

pub struct WebSocketEventStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl EventStream for WebSocketEventStream {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(
                        String::from_utf8(bytes).context("binary frame is not valid UTF-8"),
                    )
                }
                Ok(Message::Close(frame)) => {
                    debug!(target: "debate_service", ?frame, "remote closed event stream");
                    return None;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(err) => return Some(Err(anyhow!("websocket read failed: {err}"))),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.socket
            .close(None)
            .await
            .map_err(|err| anyhow!("failed to close websocket: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_follows_http_scheme() {
        let service = HttpDebateService::new(
            "http://localhost:8000/",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert_eq!(service.base_url(), "http://localhost:8000");
        assert_eq!(
            service.stream_url("abc"),
            "ws://localhost:8000/ws/debate/abc"
        );
        assert_eq!(
            websocket_base("https://debates.example.org"),
            "wss://debates.example.org"
        );
    }

    #[tokio::test]
    async fn unreachable_service_reports_error() {
        let service = HttpDebateService::new(
            "http://127.0.0.1:9",
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        assert!(service.list_models().await.is_err());
        assert!(service.open_stream("abc").await.is_err());
    }

    #[tokio::test]
    async fn secure_stream_connects_before_failing_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let port = listener.local_addr().expect("listener address").port();
        let server = tokio::spawn(async move {
            // Plain TCP: accept, then hang up before any TLS exchange.
            listener.accept().await.is_ok()
        });

        let service = HttpDebateService::new(
            format!("https://127.0.0.1:{port}"),
            Duration::from_millis(500),
            Duration::from_secs(2),
        );
        let error = match service.open_stream("abc").await {
            Err(err) => format!("{err:#}"),
            Ok(_) => panic!("plain TCP listener cannot complete a TLS handshake"),
        };

        assert!(error.contains(&format!("wss://127.0.0.1:{port}/ws/debate/abc")));
        assert!(!error.contains("TLS support not compiled in"), "{error}");
        let accepted = timeout(Duration::from_secs(1), server)
            .await
            .expect("client reached the listener")
            .expect("listener task");
        assert!(accepted);
    }
}
