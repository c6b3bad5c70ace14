//! Error types for the proxy and the browser bridge.

use thiserror::Error;

use crate::protocol::{ContentItem, ToolCallResult};

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Proxy and bridge errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Neither upstream transport could be established.
    #[error("cannot connect to upstream MCP at {url}: {reason}")]
    Connection {
        /// Upstream URL that was tried.
        url: String,
        /// Last transport failure.
        reason: String,
    },

    /// A tool was called before `activate` succeeded.
    #[error("tool {tool} called before activation")]
    GateLocked {
        /// Requested tool.
        tool: String,
        /// Skill that has to be loaded first.
        skill: String,
    },

    /// The tool is not part of the exposure whitelist.
    #[error("tool not exposed: {0}")]
    ToolNotExposed(String),

    /// The upstream connection dropped mid-session.
    #[error("upstream disconnected while calling {tool}: {reason}")]
    UpstreamDisconnected {
        /// Tool whose call failed.
        tool: String,
        /// Transport failure.
        reason: String,
        /// Whether the client has to call `activate` (gate mode).
        reactivate: bool,
    },

    /// The automatic reconnect-and-retry failed (transparent mode).
    #[error("reconnect to {url} failed: {reason}")]
    ReconnectFailed {
        /// Upstream URL.
        url: String,
        /// Failure of the reconnect or of the retried call.
        reason: String,
    },

    /// No live upstream handle, or the tool listing failed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Transport-level failure talking to an MCP peer.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON-RPC protocol error.
    #[error("JSON-RPC error: {code} - {message}")]
    JsonRpc {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
        /// Additional data.
        data: Option<serde_json::Value>,
    },

    /// An operation exceeded its deadline.
    #[error("timed out after {ms}ms: {operation}")]
    Timeout {
        /// What was being waited on.
        operation: String,
        /// Deadline in milliseconds.
        ms: u64,
    },

    /// Browser automation could not find or drive an expected UI element.
    #[error("automation error: {0}")]
    Automation(String),

    /// Penpot REST API returned a non-success status.
    #[error("API {method} {path} => {status}")]
    Api {
        /// HTTP method.
        method: String,
        /// Request path.
        path: String,
        /// Response status.
        status: u16,
    },

    /// Invalid parameters.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::JsonRpc { code, .. } => *code,
            Error::ToolNotExposed(_) => codes::METHOD_NOT_FOUND,
            Error::InvalidParams(_) => codes::INVALID_PARAMS,
            Error::GateLocked { .. } => -32000,
            Error::Connection { .. }
            | Error::UpstreamDisconnected { .. }
            | Error::ReconnectFailed { .. }
            | Error::UpstreamUnavailable(_)
            | Error::Transport(_) => -32001,
            Error::Timeout { .. } => -32002,
            Error::Automation(_) | Error::Api { .. } => -32003,
            Error::Serialization(_) => codes::PARSE_ERROR,
            Error::Http(_) | Error::Io(_) => -32004,
            Error::Config(_) | Error::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Whether the failure means the upstream connection should be considered dead.
    ///
    /// Protocol-level errors (the upstream answered with a JSON-RPC error) leave
    /// the connection usable.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Http(_) | Error::Io(_) | Error::Timeout { .. }
        )
    }

    /// Render as a user-facing tool result with `isError` set.
    pub fn to_tool_result(&self) -> ToolCallResult {
        let text = match self {
            Error::GateLocked { tool, skill } => format!(
                "The /{skill} skill is not loaded, so `{tool}` is unavailable.\n\
                 Run the /{skill} skill, call `activate`, then retry."
            ),
            Error::ToolNotExposed(tool) => {
                format!("Tool `{tool}` is not exposed by this proxy.")
            }
            Error::UpstreamDisconnected { reactivate: true, .. } => {
                "The upstream MCP server disconnected.\nCall `activate` to reconnect.".to_string()
            }
            Error::UpstreamDisconnected { tool, .. } => format!(
                "The upstream MCP server disconnected and `{tool}` was not retried.\n\
                 The next call reconnects automatically."
            ),
            Error::ReconnectFailed { url, reason } => format!(
                "The upstream MCP server disconnected and reconnecting failed: {reason}\nURL: {url}"
            ),
            Error::Connection { url, reason } => format!(
                "Cannot connect to the upstream MCP server: {reason}\nURL: {url}\n\
                 Check that the Penpot MCP server is running."
            ),
            other => other.to_string(),
        };
        ToolCallResult {
            content: vec![ContentItem::text(text)],
            is_error: true,
        }
    }
}

/// Standard JSON-RPC error codes.
pub mod codes {
    /// Parse error.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i32 = -32603;
}
