//! Bridge configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::plugin::ConnectTimings;

/// Keeps a headless Penpot session with the MCP plugin connected.
#[derive(Parser, Debug, Clone)]
#[command(name = "penpot-mcp-connect")]
#[command(author, version, about, long_about = None)]
pub struct BridgeConfig {
    /// Public Penpot URL.
    #[arg(long, env = "PENPOT_PUBLIC_URI", default_value = "http://localhost:9001")]
    pub penpot_uri: String,

    /// Login email of the MCP user.
    #[arg(long, env = "PENPOT_MCP_EMAIL")]
    pub email: Option<String>,

    /// Login password of the MCP user.
    #[arg(long, env = "PENPOT_MCP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Port serving the MCP plugin manifest.
    #[arg(long, env = "PENPOT_MCP_PLUGIN_PORT", default_value_t = 4400)]
    pub plugin_port: u16,

    /// Host used in the default manifest URL.
    #[arg(long, env = "PENPOT_MCP_MANIFEST_HOST", default_value = "localhost")]
    pub manifest_host: String,

    /// Full manifest URL; overrides host and port.
    #[arg(long, env = "PENPOT_MCP_MANIFEST_URL")]
    pub manifest_url: Option<String>,

    /// Team preferred when picking the workspace file.
    #[arg(long, env = "PENPOT_SHARED_TEAM_NAME", default_value = "Shared Workspace")]
    pub shared_team: String,

    /// Directory for screenshots and HTML dumps on failure.
    #[arg(long, env = "PENPOT_MCP_DEBUG_DIR", default_value = "/tmp")]
    pub debug_dir: PathBuf,

    /// Bridge HTTP listen address.
    #[arg(long, env = "PENPOT_BRIDGE_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// W3C WebDriver endpoint (chromedriver).
    #[arg(long, env = "WEBDRIVER_URL", default_value = "http://localhost:9515")]
    pub webdriver_url: String,

    /// Run the browser with a visible window.
    #[arg(long)]
    pub visible: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Log output file (default: stderr).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(flatten)]
    pub timings: BridgeTimings,
}

/// Polling intervals and deadlines, in milliseconds on the command line.
#[derive(clap::Args, Debug, Clone)]
pub struct BridgeTimings {
    /// Interval between service readiness probes.
    #[arg(long, default_value_t = 2_000)]
    pub service_poll_ms: u64,
    /// Budget for Penpot and the manifest to come up.
    #[arg(long, default_value_t = 120_000)]
    pub service_timeout_ms: u64,
    /// Page navigation and selector deadline.
    #[arg(long, default_value_t = 30_000)]
    pub nav_timeout_ms: u64,
    /// Deadline for plugin manager interactions.
    #[arg(long, default_value_t = 15_000)]
    pub plugin_action_timeout_ms: u64,
    /// Delay between login attempts.
    #[arg(long, default_value_t = 5_000)]
    pub login_retry_ms: u64,
    /// Budget for all login attempts.
    #[arg(long, default_value_t = 300_000)]
    pub login_timeout_ms: u64,
    /// Plugin liveness check interval.
    #[arg(long, default_value_t = 5_000)]
    pub monitor_interval_ms: u64,
    /// Quiet period after a reconnect attempt.
    #[arg(long, default_value_t = 15_000)]
    pub reconnect_cooldown_ms: u64,
    /// Penpot REST call deadline.
    #[arg(long, default_value_t = 10_000)]
    pub api_timeout_ms: u64,
}

impl Default for BridgeTimings {
    fn default() -> Self {
        Self {
            service_poll_ms: 2_000,
            service_timeout_ms: 120_000,
            nav_timeout_ms: 30_000,
            plugin_action_timeout_ms: 15_000,
            login_retry_ms: 5_000,
            login_timeout_ms: 300_000,
            monitor_interval_ms: 5_000,
            reconnect_cooldown_ms: 15_000,
            api_timeout_ms: 10_000,
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

impl BridgeTimings {
    /// Service probe interval.
    pub fn service_poll(&self) -> Duration {
        ms(self.service_poll_ms)
    }
    /// Service readiness budget.
    pub fn service_timeout(&self) -> Duration {
        ms(self.service_timeout_ms)
    }
    /// Navigation deadline.
    pub fn nav_timeout(&self) -> Duration {
        ms(self.nav_timeout_ms)
    }
    /// Login retry interval.
    pub fn login_retry(&self) -> Duration {
        ms(self.login_retry_ms)
    }
    /// Login budget.
    pub fn login_timeout(&self) -> Duration {
        ms(self.login_timeout_ms)
    }
    /// Monitor tick.
    pub fn monitor_interval(&self) -> Duration {
        ms(self.monitor_interval_ms)
    }
    /// Reconnect cooldown.
    pub fn reconnect_cooldown(&self) -> Duration {
        ms(self.reconnect_cooldown_ms)
    }
    /// REST deadline.
    pub fn api_timeout(&self) -> Duration {
        ms(self.api_timeout_ms)
    }

    /// Budget for a background navigation plus plugin reconnect.
    pub fn navigation_budget(&self) -> Duration {
        ms(self.nav_timeout_ms * 3 + self.plugin_action_timeout_ms * 4)
    }

    /// Plugin connect timings derived from these values.
    pub fn connect(&self) -> ConnectTimings {
        ConnectTimings {
            action_timeout: ms(self.plugin_action_timeout_ms),
            nav_timeout: ms(self.nav_timeout_ms),
            ..ConnectTimings::default()
        }
    }
}

impl BridgeConfig {
    /// Default configuration, as if launched without flags or environment.
    pub fn for_penpot(penpot_uri: impl Into<String>) -> Self {
        Self {
            penpot_uri: penpot_uri.into(),
            email: None,
            password: None,
            plugin_port: 4400,
            manifest_host: "localhost".into(),
            manifest_url: None,
            shared_team: "Shared Workspace".into(),
            debug_dir: PathBuf::from("/tmp"),
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            webdriver_url: "http://localhost:9515".into(),
            visible: false,
            verbose: false,
            log_json: false,
            log_file: None,
            timings: BridgeTimings::default(),
        }
    }

    /// Login email: `PENPOT_MCP_EMAIL`, then `PENPOT_DEFAULT_EMAIL`.
    pub fn email(&self) -> String {
        self.email
            .clone()
            .or_else(|| non_empty_env("PENPOT_DEFAULT_EMAIL"))
            .unwrap_or_else(|| "mcp@penpot.local".into())
    }

    /// Login password: `PENPOT_MCP_PASSWORD`, then `PENPOT_DEFAULT_PASSWORD`.
    pub fn password(&self) -> String {
        self.password
            .clone()
            .or_else(|| non_empty_env("PENPOT_DEFAULT_PASSWORD"))
            .unwrap_or_else(|| "mcpmcp123".into())
    }

    /// Plugin manifest URL.
    pub fn manifest_url(&self) -> String {
        self.manifest_url.clone().unwrap_or_else(|| {
            format!("http://{}:{}/manifest.json", self.manifest_host, self.plugin_port)
        })
    }

    /// Penpot base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.penpot_uri.trim_end_matches('/')
    }

    /// Login page URL.
    pub fn login_url(&self) -> String {
        format!("{}/#/auth/login", self.base_url())
    }

    /// Workspace URL of a file.
    pub fn workspace_url(&self, project_id: &str, file_id: &str) -> String {
        format!("{}/#/workspace/{}/{}", self.base_url(), project_id, file_id)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
