//! Client side of the proxy: connections to the upstream MCP server.
//!
//! The [`Connector`] seam lets the gateway open fresh connections without
//! knowing which transport ends up carrying them; [`HttpConnector`] prefers
//! Streamable HTTP and falls back to the legacy SSE transport.

pub mod client;
pub mod legacy_sse;
pub mod sse;
pub mod streamable_http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::{ClientInfo, ToolDefinition};

pub use client::{McpClient, Transport};
pub use legacy_sse::LegacySseTransport;
pub use streamable_http::StreamableHttpTransport;

/// A live, initialized upstream MCP session.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Fetch every advertised tool.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Invoke a tool and return the raw `tools/call` result.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;

    /// Close the session. Never fails.
    async fn close(&self);

    /// Transport name for logs.
    fn transport(&self) -> &'static str;
}

/// Opens upstream sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new session.
    async fn connect(&self) -> Result<Arc<dyn UpstreamClient>>;

    /// Upstream URL, for messages.
    fn url(&self) -> &str;
}

/// HTTP connector with Streamable HTTP first and SSE as fallback.
pub struct HttpConnector {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
    client_info: ClientInfo,
}

impl HttpConnector {
    /// Create a connector for `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
            timeout,
            client_info: ClientInfo {
                name: "penpot-mcp-proxy".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self) -> Result<Arc<dyn UpstreamClient>> {
        let streamable = StreamableHttpTransport::new(self.client.clone(), &self.url, self.timeout);
        let streamable_err = match McpClient::initialize(streamable, self.client_info.clone()).await {
            Ok(client) => return Ok(Arc::new(client)),
            Err(e) => e,
        };
        tracing::debug!(
            url = %self.url,
            "Streamable HTTP failed ({}), falling back to SSE",
            streamable_err
        );

        let sse_err = match LegacySseTransport::connect(self.client.clone(), &self.url, self.timeout).await {
            Ok(transport) => match McpClient::initialize(transport, self.client_info.clone()).await {
                Ok(client) => return Ok(Arc::new(client)),
                Err(e) => e,
            },
            Err(e) => e,
        };

        Err(Error::Connection {
            url: self.url.clone(),
            reason: format!("streamable HTTP: {streamable_err}; SSE: {sse_err}"),
        })
    }

    fn url(&self) -> &str {
        &self.url
    }
}
