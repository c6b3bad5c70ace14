//! Transport-independent MCP client.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::protocol::{
    ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, ServerInfo, ToolDefinition,
};

use super::UpstreamClient;

/// Protocol version offered to upstream servers.
pub const CLIENT_PROTOCOL_VERSION: &str = "2025-03-26";

/// Upper bound on `tools/list` pages followed for one listing.
const MAX_LIST_PAGES: usize = 64;

/// A JSON-RPC channel to one upstream MCP server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the matching response.
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification.
    async fn notify(&self, notification: JsonRpcRequest) -> Result<()>;

    /// Tear the channel down. Never fails.
    async fn close(&self);

    /// Short transport name for logs.
    fn kind(&self) -> &'static str;
}

/// MCP client over an arbitrary [`Transport`].
pub struct McpClient<T> {
    transport: T,
    next_id: AtomicI64,
    server_info: ServerInfo,
}

impl<T: Transport> McpClient<T> {
    /// Run the `initialize` handshake; the transport is closed if it fails.
    pub async fn initialize(transport: T, client_info: ClientInfo) -> Result<Self> {
        let mut client = Self {
            transport,
            next_id: AtomicI64::new(1),
            server_info: ServerInfo {
                name: String::new(),
                version: String::new(),
            },
        };
        match client.handshake(client_info).await {
            Ok(server_info) => {
                client.server_info = server_info;
                Ok(client)
            }
            Err(e) => {
                client.transport.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self, client_info: ClientInfo) -> Result<ServerInfo> {
        let params = InitializeParams {
            protocol_version: CLIENT_PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info,
        };
        let result = self
            .send("initialize", Some(serde_json::to_value(params)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| Error::Transport(format!("invalid initialize result: {e}")))?;
        self.transport
            .notify(JsonRpcRequest::notification("notifications/initialized", None))
            .await?;
        tracing::info!(
            transport = self.transport.kind(),
            server = %init.server_info.name,
            version = %init.server_info.version,
            protocol = %init.protocol_version,
            "Upstream MCP session initialized"
        );
        Ok(init.server_info)
    }

    /// Server info reported during the handshake.
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .transport
            .request(JsonRpcRequest::new(id, method, params))
            .await?;
        response.into_result()
    }
}

#[async_trait]
impl<T: Transport> UpstreamClient for McpClient<T> {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult = serde_json::from_value(self.send("tools/list", params).await?)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!("tools/list pagination stopped after {} pages", MAX_LIST_PAGES);
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        self.send(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    async fn close(&self) {
        self.transport.close().await;
    }

    fn transport(&self) -> &'static str {
        self.transport.kind()
    }
}
