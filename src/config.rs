//! Proxy configuration.
//!
//! Every flag falls back to an `MCP_*` environment variable so the proxy can be
//! launched from an MCP client `env` block without arguments.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{Parser, ValueEnum};

/// Name of the pseudo-tool that opens the gate.
pub const ACTIVATE_TOOL: &str = "activate";

/// Default upstream tool used to run the init script.
pub const DEFAULT_INIT_TOOL: &str = "execute_code";

/// Gated MCP proxy in front of the Penpot MCP server.
#[derive(Parser, Debug, Clone)]
#[command(name = "penpot-mcp-proxy")]
#[command(author, version, about, long_about = None)]
pub struct ProxyConfig {
    /// Upstream MCP server URL (Streamable HTTP or SSE endpoint).
    #[arg(long, env = "MCP_UPSTREAM")]
    pub upstream: String,

    /// Server name reported to the client.
    #[arg(long, env = "MCP_NAME", default_value = "penpot-official")]
    pub name: String,

    /// Skill that must be loaded before use; enables gate mode.
    #[arg(long, env = "MCP_SKILL")]
    pub skill: Option<String>,

    /// Skip the one-time init script.
    #[arg(long, env = "MCP_NO_INIT", value_parser = BoolishValueParser::new())]
    pub no_init: bool,

    /// Script sent to the init tool after every (re)connect.
    #[arg(long, env = "MCP_INIT_SCRIPT")]
    pub init_script: Option<PathBuf>,

    /// Upstream tool that executes the init script.
    #[arg(long, env = "MCP_INIT_TOOL", default_value = DEFAULT_INIT_TOOL)]
    pub init_tool: String,

    /// Comma-separated tool names to expose, or `*` for all.
    #[arg(long, env = "MCP_TOOLS", default_value = "*")]
    pub tools: ToolPolicy,

    /// Which calls transparent mode may repeat after reconnecting.
    #[arg(long, env = "MCP_RETRY", value_enum, default_value_t = RetryPolicy::Always)]
    pub retry: RetryPolicy,

    /// Upstream request timeout in seconds.
    #[arg(long, env = "MCP_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Log output file (default: stderr).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl ProxyConfig {
    /// Minimal configuration for a given upstream, as if only `--upstream` was passed.
    pub fn for_upstream(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            name: "penpot-official".into(),
            skill: None,
            no_init: false,
            init_script: None,
            init_tool: DEFAULT_INIT_TOOL.into(),
            tools: ToolPolicy::All,
            retry: RetryPolicy::Always,
            timeout_secs: 60,
            verbose: false,
            log_json: false,
            log_file: None,
        }
    }

    /// Whether the `activate` handshake is required.
    pub fn gated(&self) -> bool {
        self.skill.is_some()
    }

    /// Skill name used in user-facing messages.
    pub fn skill_name(&self) -> &str {
        self.skill.as_deref().unwrap_or("penpot")
    }

    /// Init script to run after connecting, if any.
    pub fn init_script(&self) -> Option<&PathBuf> {
        if self.no_init {
            None
        } else {
            self.init_script.as_ref()
        }
    }

    /// Upstream request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Which upstream tools are exposed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPolicy {
    /// Expose every upstream tool.
    All,
    /// Expose only these tools, in this order.
    Allowed(Vec<String>),
}

impl ToolPolicy {
    /// Whether a tool name passes the policy.
    pub fn allows(&self, name: &str) -> bool {
        match self {
            ToolPolicy::All => true,
            ToolPolicy::Allowed(names) => names.iter().any(|n| n == name),
        }
    }
}

impl FromStr for ToolPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "*" {
            return Ok(ToolPolicy::All);
        }
        let mut names: Vec<String> = Vec::new();
        for name in trimmed.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name == "*" {
                return Ok(ToolPolicy::All);
            }
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        if names.is_empty() {
            return Err("tool list must be `*` or at least one tool name".into());
        }
        Ok(ToolPolicy::Allowed(names))
    }
}

impl fmt::Display for ToolPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolPolicy::All => f.write_str("*"),
            ToolPolicy::Allowed(names) => f.write_str(&names.join(",")),
        }
    }
}

/// Automatic retry behaviour after a transparent-mode reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RetryPolicy {
    /// Retry every failed call once.
    Always,
    /// Retry only tools annotated `readOnlyHint` or `idempotentHint`.
    Idempotent,
    /// Reconnect but never repeat the call.
    Never,
}
