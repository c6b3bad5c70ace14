//! Legacy HTTP+SSE transport: one long-lived event stream carries responses,
//! requests are POSTed to the endpoint announced by the stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{JsonRpcId, JsonRpcRequest, JsonRpcResponse, McpMessage};

use super::client::Transport;
use super::sse::{is_event_stream, SseDecoder};

type Pending = Arc<Mutex<HashMap<JsonRpcId, oneshot::Sender<JsonRpcResponse>>>>;

/// An open SSE session.
pub struct LegacySseTransport {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
    pending: Pending,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl LegacySseTransport {
    /// Open the event stream and wait for the `endpoint` event.
    pub async fn connect(client: reqwest::Client, url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(url).map_err(|e| Error::Config(format!("invalid URL {url}: {e}")))?;
        let response = client
            .get(base.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::Transport(format!("GET {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "GET {url} returned HTTP {}",
                response.status()
            )));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !is_event_stream(content_type) {
            return Err(Error::Transport(format!(
                "GET {url} did not return an event stream ({content_type})"
            )));
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::default();

        let announced = tokio::time::timeout(timeout, async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| Error::Transport(format!("event stream broke: {e}")))?;
                for event in decoder.push(&chunk) {
                    if event.event == "endpoint" {
                        return Ok(event.data);
                    }
                }
            }
            Err(Error::Transport("event stream closed before endpoint event".into()))
        })
        .await
        .map_err(|_| Error::Timeout {
            operation: format!("SSE endpoint event from {url}"),
            ms: timeout.as_millis() as u64,
        })??;

        let endpoint = base
            .join(announced.trim())
            .map_err(|e| Error::Transport(format!("invalid endpoint {announced:?}: {e}")))?;
        tracing::debug!(%endpoint, "SSE endpoint announced");

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_events(stream, decoder, pending.clone(), alive.clone()));

        Ok(Self {
            client,
            endpoint,
            timeout,
            pending,
            alive,
            reader,
        })
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(message)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("POST {} failed: {e}", self.endpoint)))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "POST {} returned HTTP {}",
                self.endpoint,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LegacySseTransport {
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::Transport("SSE stream closed".into()));
        }
        let id = request
            .id
            .clone()
            .ok_or_else(|| Error::Internal("request without id".into()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.post(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Transport(
                "SSE stream closed before the response arrived".into(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout {
                    operation: format!("{} response", request.method),
                    ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        self.post(&notification).await
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.pending.lock().await.clear();
    }

    fn kind(&self) -> &'static str {
        "sse"
    }
}

impl Drop for LegacySseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_events<S, B>(mut stream: S, mut decoder: SseDecoder, pending: Pending, alive: Arc<AtomicBool>)
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("SSE stream error: {}", e);
                break;
            }
        };
        for event in decoder.push(chunk.as_ref()) {
            deliver(&pending, &event.event, &event.data).await;
        }
    }
    for event in decoder.finish() {
        deliver(&pending, &event.event, &event.data).await;
    }

    tracing::info!("Upstream SSE stream ended");
    alive.store(false, Ordering::SeqCst);
    pending.lock().await.clear();
}

async fn deliver(pending: &Pending, event: &str, data: &str) {
    if event != "message" {
        tracing::debug!(event, "Ignoring SSE event");
        return;
    }
    match McpMessage::parse(data) {
        Ok(McpMessage::Response(reply)) => {
            let Some(id) = reply.id.clone() else {
                return;
            };
            if let Some(tx) = pending.lock().await.remove(&id) {
                let _ = tx.send(reply);
            }
        }
        Ok(McpMessage::Request(request)) | Ok(McpMessage::Notification(request)) => {
            tracing::debug!(method = %request.method, "Ignoring server-initiated message");
        }
        Err(e) => tracing::warn!("Undecodable SSE message: {}", e),
    }
}
