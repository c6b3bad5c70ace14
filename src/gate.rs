//! Activation gate: session state, the `activate` handshake and tool listing.
//!
//! State machine:
//!
//! ```text
//! Locked ──activate──▶ Activating ──ok──▶ Unlocked
//!   ▲                      │                 │ forwarding failure (gate mode)
//!   └──────── error ───────┘                 ▼
//!                          Activating ◀── Disconnected
//! ```
//!
//! `Disconnected` is represented by an absent upstream handle while the gate
//! stays unlocked. Every transition happens under the session mutex, so
//! `activate` and the router's reconnect path never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;

use crate::cache::ToolSchemaCache;
use crate::config::{ProxyConfig, ACTIVATE_TOOL};
use crate::error::{Error, Result};
use crate::protocol::{result_is_error, ContentItem, ToolCallResult, ToolDefinition};
use crate::upstream::{Connector, UpstreamClient};

/// Hint appended to every real tool description in gate mode.
pub const WORKFLOW_SUFFIX: &str = "\n[WORKFLOW] Returns an error until `activate` has been called.";

/// Observable gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Never activated (or the last activation failed).
    Locked,
    /// An activation is in flight.
    Activating,
    /// Activated with a live upstream.
    Unlocked,
    /// Activated, but the upstream dropped; `activate` must be called again.
    Disconnected,
}

/// Mutable per-gateway session state.
#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) upstream: Option<Arc<dyn UpstreamClient>>,
    pub(crate) unlocked: bool,
    pub(crate) init_done: bool,
    pub(crate) cache: Option<ToolSchemaCache>,
}

impl SessionState {
    fn gate_state(&self) -> GateState {
        match (self.unlocked, self.upstream.is_some()) {
            (false, _) => GateState::Locked,
            (true, true) => GateState::Unlocked,
            (true, false) => GateState::Disconnected,
        }
    }
}

/// The proxy service: owns configuration, the connector and session state.
pub struct Gateway {
    pub(crate) config: ProxyConfig,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) session: Mutex<SessionState>,
    activating: AtomicBool,
}

impl Gateway {
    /// Create a gateway; nothing connects until the first activation or call.
    pub fn new(config: ProxyConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            session: Mutex::new(SessionState::default()),
            activating: AtomicBool::new(false),
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Current gate state.
    pub async fn state(&self) -> GateState {
        if self.activating.load(Ordering::SeqCst) {
            return GateState::Activating;
        }
        self.session.lock().await.gate_state()
    }

    /// Whether the init script has completed on the current connection.
    pub async fn init_done(&self) -> bool {
        self.session.lock().await.init_done
    }

    /// The `activate` pseudo-tool. Idempotent while unlocked with a live upstream.
    pub async fn activate(&self) -> ToolCallResult {
        let mut session = self.session.lock().await;
        if session.unlocked && session.upstream.is_some() {
            return ToolCallResult::text("Already activated.");
        }

        self.activating.store(true, Ordering::SeqCst);
        let outcome = self.bring_up(&mut session).await;
        self.activating.store(false, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                session.unlocked = true;
                tracing::info!(url = %self.connector.url(), "Gate unlocked");
                let mut text = format!("{} MCP activated. Ready.", self.config.name);
                if !session.init_done {
                    text.push_str("\nWarning: the init script reported an error.");
                }
                ToolCallResult::text(text)
            }
            Err(e) => {
                tracing::warn!("Activation failed: {}", e);
                match e {
                    Error::Connection { .. } => e.to_tool_result(),
                    other => ToolCallResult {
                        content: vec![ContentItem::text(format!(
                            "Activation failed after connecting: {other}\nURL: {}",
                            self.connector.url()
                        ))],
                        is_error: true,
                    },
                }
            }
        }
    }

    /// Tools advertised to the client in the current state.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let policy = &self.config.tools;

        if !self.config.gated() {
            let mut session = self.session.lock().await;
            if session.upstream.is_none() {
                if let Err(e) = self.bring_up(&mut session).await {
                    tracing::warn!("Upstream not reachable for tools/list: {}", e);
                }
            }
            return session
                .cache
                .as_ref()
                .map(|cache| cache.exposed(policy).into_iter().cloned().collect())
                .unwrap_or_default();
        }

        let session = self.session.lock().await;
        let mut tools = vec![self.activate_tool()];
        match session.cache.as_ref() {
            Some(cache) if !cache.is_empty() => {
                tools.extend(cache.exposed(policy).into_iter().map(|tool| {
                    let mut tool = tool.clone();
                    tool.description.push_str(WORKFLOW_SUFFIX);
                    tool
                }));
            }
            _ => tools.extend(fallback_tools().into_iter().filter(|t| policy.allows(&t.name))),
        }
        tools
    }

    /// Connect (closing any previous handle), refresh the cache and run init.
    ///
    /// On error the session holds no upstream handle and keeps its previous cache.
    pub(crate) async fn bring_up(&self, session: &mut SessionState) -> Result<()> {
        if let Some(previous) = session.upstream.take() {
            previous.close().await;
        }
        session.init_done = false;

        let client = self.connector.connect().await?;
        tracing::info!(
            url = %self.connector.url(),
            transport = client.transport(),
            "Connected to upstream"
        );

        let cache = match ToolSchemaCache::refresh(Some(client.as_ref())).await {
            Ok(cache) => cache,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };
        session.upstream = Some(client.clone());

        // The cache is only published once init went through.
        if let Err(e) = self.run_init(session).await {
            session.upstream = None;
            client.close().await;
            return Err(e);
        }
        session.cache = Some(cache);
        Ok(())
    }

    /// Send the init script through the init tool, once per connection.
    async fn run_init(&self, session: &mut SessionState) -> Result<()> {
        if session.init_done {
            return Ok(());
        }
        let Some(path) = self.config.init_script() else {
            session.init_done = true;
            return Ok(());
        };

        let code = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("cannot read init script {}: {e}", path.display()))
        })?;
        let client = session
            .upstream
            .clone()
            .ok_or_else(|| Error::UpstreamUnavailable("no upstream connection".into()))?;

        let result = client
            .call_tool(&self.config.init_tool, json!({ "code": code }))
            .await?;
        if result_is_error(&result) {
            tracing::warn!(tool = %self.config.init_tool, "Init script reported an error");
        } else {
            session.init_done = true;
            tracing::info!(script = %path.display(), "Init script completed");
        }
        Ok(())
    }

    fn activate_tool(&self) -> ToolDefinition {
        ToolDefinition::new(
            ACTIVATE_TOOL,
            format!(
                "Start or reconnect the {} MCP session. Call after loading the /{} skill; \
                 the init script runs automatically.",
                self.config.name,
                self.config.skill_name()
            ),
            json!({ "type": "object", "properties": {} }),
        )
    }
}

/// Placeholder schemas shown in gate mode before the first successful listing.
pub fn fallback_tools() -> Vec<ToolDefinition> {
    let described = |text: &str| format!("{text}{WORKFLOW_SUFFIX}");
    vec![
        ToolDefinition::new(
            "execute_code",
            described("Run JavaScript inside the Penpot plugin."),
            json!({
                "type": "object",
                "properties": { "code": { "type": "string", "minLength": 1 } },
                "required": ["code"]
            }),
        ),
        ToolDefinition::new(
            "export_shape",
            described("Export a shape as PNG or SVG."),
            json!({
                "type": "object",
                "properties": {
                    "shapeId": { "type": "string", "minLength": 1 },
                    "format": { "type": "string", "enum": ["png", "svg"], "default": "png" },
                    "mode": { "type": "string", "enum": ["shape", "fill"], "default": "shape" }
                },
                "required": ["shapeId"]
            }),
        ),
        ToolDefinition::new(
            "penpot_api_info",
            described("Get type information for the Penpot API."),
            json!({
                "type": "object",
                "properties": {
                    "type": { "type": "string", "minLength": 1 },
                    "member": { "type": "string" }
                },
                "required": ["type"]
            }),
        ),
        ToolDefinition::new(
            "high_level_overview",
            described("Get an overview of the Penpot Plugin API."),
            json!({ "type": "object", "properties": {} }),
        ),
    ]
}
