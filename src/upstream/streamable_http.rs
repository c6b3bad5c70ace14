//! Streamable HTTP transport: every message is a POST, responses come back as
//! JSON or as a short-lived event stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::protocol::{JsonRpcId, JsonRpcRequest, JsonRpcResponse, McpMessage};

use super::client::Transport;
use super::sse::{is_event_stream, SseDecoder};

const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";

/// Streamable HTTP connection state for one upstream session.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<Option<String>>,
}

impl StreamableHttpTransport {
    /// Create an unconnected transport; the first request opens the session.
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
            session_id: RwLock::new(None),
            protocol_version: RwLock::new(None),
        }
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, JSON_AND_SSE_ACCEPT)
            .json(message);

        if let Some(session_id) = self.session_id.read().await.as_ref() {
            request = request.header(SESSION_HEADER, session_id);
        }
        if let Some(version) = self.protocol_version.read().await.as_ref() {
            request = request.header(PROTOCOL_VERSION_HEADER, version);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("POST {} failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::NOT_FOUND && self.session_id.read().await.is_some() {
                *self.session_id.write().await = None;
                return Err(Error::Transport("upstream session expired".into()));
            }
            return Err(Error::Transport(format!(
                "POST {} returned HTTP {}",
                self.url, status
            )));
        }

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self.session_id.write().await = Some(session_id.to_string());
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request
            .id
            .clone()
            .ok_or_else(|| Error::Internal("request without id".into()))?;
        let response = self.post(&request).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        let reply = if is_event_stream(&content_type) {
            read_event_stream(response, &id).await?
        } else {
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::Transport(format!("reading response body: {e}")))?;
            serde_json::from_slice::<JsonRpcResponse>(&body)
                .map_err(|e| Error::Transport(format!("invalid JSON-RPC response: {e}")))?
        };

        if request.method == "initialize" {
            if let Some(version) = reply
                .result
                .as_ref()
                .and_then(|r| r.get("protocolVersion"))
                .and_then(|v| v.as_str())
            {
                *self.protocol_version.write().await = Some(version.to_string());
            }
        }
        Ok(reply)
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        self.post(&notification).await.map(|_| ())
    }

    async fn close(&self) {
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };
        let result = self
            .client
            .delete(&self.url)
            .timeout(Duration::from_secs(5))
            .header(SESSION_HEADER, session_id)
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!("Ignoring session close failure: {}", e);
        }
    }

    fn kind(&self) -> &'static str {
        "streamable-http"
    }
}

/// Read events until the response for `id` arrives.
async fn read_event_stream(response: reqwest::Response, id: &JsonRpcId) -> Result<JsonRpcResponse> {
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Transport(format!("event stream broke: {e}")))?;
        for event in decoder.push(&chunk) {
            if let Some(reply) = match_response(&event.data, id) {
                return Ok(reply);
            }
        }
    }
    for event in decoder.finish() {
        if let Some(reply) = match_response(&event.data, id) {
            return Ok(reply);
        }
    }

    Err(Error::Transport(
        "event stream ended without a response".into(),
    ))
}

fn match_response(data: &str, id: &JsonRpcId) -> Option<JsonRpcResponse> {
    match McpMessage::parse(data) {
        Ok(McpMessage::Response(reply)) if reply.id.as_ref() == Some(id) => Some(reply),
        Ok(McpMessage::Request(request)) | Ok(McpMessage::Notification(request)) => {
            tracing::debug!(method = %request.method, "Ignoring server-initiated message");
            None
        }
        _ => None,
    }
}
