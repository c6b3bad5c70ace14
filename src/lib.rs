//! # penpot-mcp-bridge
//!
//! Plumbing that lets an AI coding assistant drive a self-hosted Penpot
//! instance through its MCP plugin.
//!
//! Two binaries ship with the crate:
//!
//! - `penpot-mcp-proxy`: a stdio MCP server that relays to the Penpot MCP
//!   server over streamable HTTP (falling back to legacy SSE). Tool calls stay
//!   locked until the client calls `activate`, which connects upstream, caches
//!   the tool schemas and runs an optional init script.
//! - `penpot-mcp-connect`: keeps a headless browser logged into Penpot with
//!   the MCP plugin connected, and exposes a small HTTP control API.
//!
//! ## Usage with Claude Desktop or VS Code
//!
//! ```json
//! {
//!   "servers": {
//!     "penpot": {
//!       "command": "penpot-mcp-proxy",
//!       "args": ["--upstream=http://localhost:4401/mcp", "--skill=penpot"]
//!     }
//!   }
//! }
//! ```
//!
//! Without `--skill` the proxy is transparent: no gate, lazy connection and
//! one automatic reconnect-and-retry on connection loss.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod error;
pub mod gate;
pub mod logging;
pub mod protocol;
pub mod router;
pub mod server;
pub mod upstream;

#[cfg(feature = "http")]
pub mod bridge;

pub use config::{ProxyConfig, RetryPolicy, ToolPolicy};
pub use error::{Error, Result};
pub use gate::{GateState, Gateway};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, McpMessage};
pub use server::McpServer;
pub use upstream::{Connector, HttpConnector, UpstreamClient};
