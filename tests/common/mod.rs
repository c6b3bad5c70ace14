//! Shared fakes: a scripted upstream MCP server and a scripted browser.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use penpot_mcp_bridge::error::{Error, Result};
use penpot_mcp_bridge::protocol::ToolDefinition;
use penpot_mcp_bridge::upstream::{Connector, UpstreamClient};

// ============================================================================
// Upstream
// ============================================================================

/// Knobs and observations shared by every connection of a [`FakeConnector`].
#[derive(Default)]
pub struct ScriptState {
    /// Successful connects so far.
    pub connects: usize,
    /// Connections closed so far.
    pub closes: usize,
    /// The next N connects fail.
    pub fail_connects: usize,
    /// The next N tool calls fail with a transport error.
    pub fail_calls: usize,
    /// The next N tool calls fail with a JSON-RPC error.
    pub protocol_errors: usize,
    /// The init tool answers with `isError`.
    pub init_error: bool,
    /// Every forwarded call, in order.
    pub calls: Vec<(String, Value)>,
}

pub type Script = Arc<Mutex<ScriptState>>;

pub struct FakeConnector {
    pub script: Script,
    pub tools: Vec<ToolDefinition>,
    pub init_tool: String,
}

impl FakeConnector {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self {
            script: Arc::new(Mutex::new(ScriptState::default())),
            tools,
            init_tool: "execute_code".into(),
        }
    }

    pub fn with(self, edit: impl FnOnce(&mut ScriptState)) -> Self {
        edit(&mut self.script.lock().unwrap());
        self
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn UpstreamClient>> {
        let mut script = self.script.lock().unwrap();
        if script.fail_connects > 0 {
            script.fail_connects -= 1;
            return Err(Error::Connection {
                url: self.url().to_string(),
                reason: "connection refused".into(),
            });
        }
        script.connects += 1;
        Ok(Arc::new(FakeUpstream {
            script: self.script.clone(),
            tools: self.tools.clone(),
            init_tool: self.init_tool.clone(),
            generation: script.connects,
        }))
    }

    fn url(&self) -> &str {
        "http://penpot-mcp.test/mcp"
    }
}

pub struct FakeUpstream {
    script: Script,
    tools: Vec<ToolDefinition>,
    init_tool: String,
    generation: usize,
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let mut script = self.script.lock().unwrap();
        script.calls.push((name.to_string(), arguments.clone()));
        if script.fail_calls > 0 {
            script.fail_calls -= 1;
            return Err(Error::Transport("connection reset by peer".into()));
        }
        if script.protocol_errors > 0 {
            script.protocol_errors -= 1;
            return Err(Error::JsonRpc {
                code: -32602,
                message: "bad arguments".into(),
                data: None,
            });
        }
        if name == self.init_tool && arguments.get("code").is_some() && script.init_error {
            return Ok(json!({
                "content": [{"type": "text", "text": "ReferenceError"}],
                "isError": true
            }));
        }
        Ok(json!({
            "content": [{
                "type": "text",
                "text": format!("{name} ok on connection {}", self.generation)
            }]
        }))
    }

    async fn close(&self) {
        self.script.lock().unwrap().closes += 1;
    }

    fn transport(&self) -> &'static str {
        "fake"
    }
}

pub fn tool(name: &str) -> ToolDefinition {
    ToolDefinition::new(
        name,
        format!("{name} from upstream"),
        json!({"type": "object", "properties": {}}),
    )
}

pub fn penpot_tools() -> Vec<ToolDefinition> {
    vec![
        tool("execute_code"),
        tool("export_shape"),
        tool("penpot_api_info"),
        tool("high_level_overview"),
    ]
}

pub fn result_text(result: &Value) -> String {
    result
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string()
}

pub fn is_error(result: &Value) -> bool {
    result.get("isError").and_then(Value::as_bool).unwrap_or(false)
}

// ============================================================================
// Browser
// ============================================================================

#[cfg(feature = "http")]
pub use browser::*;

#[cfg(feature = "http")]
mod browser {
    use super::*;

    use penpot_mcp_bridge::bridge::driver::{BrowserDriver, Cookie, Key, KeyChord, Locator};
    use penpot_mcp_bridge::bridge::plugin::selectors;

    /// Simulated Penpot workspace with the plugin manager and plugin frame.
    #[derive(Default)]
    pub struct BrowserState {
        /// Ctrl+Alt+P opens the manager without a reload.
        pub shortcut_works: bool,
        /// The plugin is in the installed list.
        pub installed: bool,
        /// Install shows the permission dialog.
        pub permission_dialog: bool,
        /// The plugin frame has a Connect button.
        pub connect_button: bool,
        /// Navigation fails.
        pub navigation_fails: bool,
        /// Navigation never completes.
        pub navigation_hangs: bool,
        pub manager_open: bool,
        pub dialog_open: bool,
        pub plugin_open: bool,
        pub connected: bool,
        pub reloads: usize,
        pub manifest: Option<String>,
        pub url: String,
        pub visited: Vec<String>,
        pub clicked: Vec<String>,
    }

    pub struct FakeDriver {
        pub state: Mutex<BrowserState>,
    }

    impl FakeDriver {
        /// Logged in, workspace open, plugin installed, shortcut working.
        pub fn healthy() -> Self {
            Self::with(|s| {
                s.shortcut_works = true;
                s.installed = true;
                s.permission_dialog = true;
                s.connect_button = true;
            })
        }

        pub fn with(edit: impl FnOnce(&mut BrowserState)) -> Self {
            let mut state = BrowserState::default();
            edit(&mut state);
            Self {
                state: Mutex::new(state),
            }
        }

        pub fn disconnect_plugin(&self) {
            let mut state = self.state.lock().unwrap();
            state.connected = false;
            state.plugin_open = false;
        }
    }

    fn css(locator: &Locator) -> Option<&str> {
        match locator {
            Locator::Css { selector } => Some(selector.as_str()),
            _ => None,
        }
    }

    fn visible(state: &BrowserState, locator: &Locator) -> bool {
        match locator {
            Locator::Css { selector } => match selector.as_str() {
                selectors::VIEWPORT => !state.navigation_fails,
                selectors::PLUGIN_MANAGER => state.manager_open,
                selectors::MANIFEST_INPUT => state.manager_open,
                selectors::INSTALL_BUTTON => state.manager_open,
                selectors::CONNECT_HANDLER => state.plugin_open && state.connect_button,
                _ => false,
            },
            Locator::Text { within, text, .. } => match (within.as_deref(), text.as_str()) {
                (Some(selectors::PLUGIN_LIST), selectors::PLUGIN_NAME) => {
                    state.manager_open && state.installed
                }
                (_, "Allow") => state.dialog_open,
                (_, "Install") => state.manager_open,
                (_, "Open") => state.manager_open && state.installed,
                (_, "Connect") => state.plugin_open && state.connect_button,
                _ => false,
            },
            Locator::EntryButton { .. } => state.manager_open && state.installed,
            Locator::AnyOf { locators } => locators.iter().any(|l| visible(state, l)),
        }
    }

    fn activate(state: &mut BrowserState, locator: &Locator) {
        state
            .clicked
            .push(css(locator).map(str::to_string).unwrap_or_else(|| locator.to_string()));
        match locator {
            Locator::Text { text, .. } if text == "Allow" => {
                state.dialog_open = false;
                state.installed = true;
            }
            Locator::Text { text, .. } if text == "Install" => {
                state.dialog_open = state.permission_dialog;
                if !state.permission_dialog {
                    state.installed = true;
                }
            }
            Locator::Text { text, .. } if text == "Open" => {
                state.manager_open = false;
                state.plugin_open = true;
            }
            Locator::EntryButton { .. } => {
                state.manager_open = false;
                state.plugin_open = true;
            }
            Locator::AnyOf { locators } => {
                if let Some(first) = locators.iter().find(|l| visible(state, l)).cloned() {
                    activate(state, &first);
                }
            }
            Locator::Css { selector } if selector == selectors::CONNECT_HANDLER => {
                state.connected = true;
            }
            Locator::Text { text, .. } if text == "Connect" => {
                state.connected = true;
            }
            _ => {}
        }
    }

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn navigate(&self, url: &str) -> Result<()> {
            let hangs = {
                let mut state = self.state.lock().unwrap();
                state.visited.push(url.to_string());
                state.url = url.to_string();
                state.manager_open = false;
                state.plugin_open = false;
                state.connected = false;
                if state.navigation_fails {
                    return Err(Error::Automation("net::ERR_CONNECTION_REFUSED".into()));
                }
                state.navigation_hangs
            };
            if hangs {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn reload(&self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.reloads += 1;
            state.manager_open = false;
            state.plugin_open = false;
            state.connected = false;
            state.shortcut_works = true;
            Ok(())
        }

        async fn current_url(&self) -> Result<String> {
            Ok(self.state.lock().unwrap().url.clone())
        }

        async fn is_visible(&self, locator: &Locator) -> Result<bool> {
            Ok(visible(&self.state.lock().unwrap(), locator))
        }

        async fn click(&self, locator: &Locator) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if css(locator) == Some(selectors::VIEWPORT) {
                return Ok(());
            }
            if !visible(&state, locator) {
                return Err(Error::Automation(format!("element not found: {locator}")));
            }
            activate(&mut state, locator);
            Ok(())
        }

        async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if css(locator) == Some(selectors::MANIFEST_INPUT) {
                state.manifest = Some(value.to_string());
            }
            Ok(())
        }

        async fn press(&self, chord: &KeyChord) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if chord.0 == [Key::Escape] {
                state.manager_open = false;
                state.dialog_open = false;
            } else if *chord == KeyChord::plugin_manager() && state.shortcut_works {
                state.manager_open = !state.manager_open;
            }
            Ok(())
        }

        async fn evaluate(&self, _script: &str) -> Result<Value> {
            Ok(Value::Bool(true))
        }

        async fn frame_count(&self) -> Result<usize> {
            Ok(usize::from(self.state.lock().unwrap().plugin_open))
        }

        async fn frame_click(&self, _frame: usize, locator: &Locator) -> Result<bool> {
            let mut state = self.state.lock().unwrap();
            if !visible(&state, locator) {
                return Ok(false);
            }
            activate(&mut state, locator);
            Ok(true)
        }

        async fn frame_text(&self, _frame: usize, locator: &Locator) -> Result<Option<String>> {
            let state = self.state.lock().unwrap();
            if css(locator) != Some(selectors::CONNECTION_STATUS) || !state.plugin_open {
                return Ok(None);
            }
            Ok(Some(if state.connected { "Connected" } else { "Disconnected" }.into()))
        }

        async fn cookies(&self) -> Result<Vec<Cookie>> {
            Ok(vec![Cookie {
                name: "auth-token".into(),
                value: "fake".into(),
            }])
        }

        async fn screenshot(&self) -> Result<Vec<u8>> {
            Ok(b"\x89PNG".to_vec())
        }

        async fn page_source(&self) -> Result<String> {
            Ok("<html><body>workspace</body></html>".into())
        }

        async fn is_alive(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    /// Connect timings with no settle delays and short deadlines.
    pub fn fast_timings() -> penpot_mcp_bridge::bridge::ConnectTimings {
        use std::time::Duration;
        penpot_mcp_bridge::bridge::ConnectTimings {
            action_timeout: Duration::from_millis(300),
            nav_timeout: Duration::from_millis(300),
            shortcut_timeout: Duration::from_millis(100),
            phase_timeout: Duration::from_secs(5),
            settle_short: Duration::ZERO,
            settle: Duration::ZERO,
            dialog_wait: Duration::ZERO,
            plugin_load: Duration::ZERO,
            poll: Duration::from_millis(10),
        }
    }

}
