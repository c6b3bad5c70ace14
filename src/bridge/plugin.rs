//! Install, open and connect the MCP plugin inside the workspace editor.
//!
//! The sequence is an explicit state machine:
//!
//! ```text
//! PrepareManager ─┬─(initial)──────▶ CheckInstalled ─┬─▶ OpenPlugin
//!                 │                                  └─▶ Install ─▶ ReopenManager ─▶ OpenPlugin
//!                 ├─(reconnect, shortcut ok)────────────────────────────────────────▶ OpenPlugin
//!                 └─(reconnect, shortcut failed)─▶ ReloadWorkspace ─────────────────▶ OpenPlugin
//! OpenPlugin ─▶ ConnectFrame ─▶ Verify ─▶ Connected
//! ```
//!
//! Any step error, or a phase overrunning its budget, ends in `Failed`.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use super::driver::{BrowserDriver, KeyChord, Locator};
use super::session::DebugArtifacts;
use crate::error::{Error, Result};

/// Selectors for the Penpot UI and the plugin page.
pub mod selectors {
    /// Workspace canvas.
    pub const VIEWPORT: &str = r#"[class*="viewport"]"#;
    /// Plugin manager modal.
    pub const PLUGIN_MANAGER: &str = r#"[class*="plugin-management"]"#;
    /// Installed plugin list inside the manager.
    pub const PLUGIN_LIST: &str = r#"[class*="plugin-management"] [class*="plugins-list"], [class*="plugin-management"] [class*="installed-plugins"]"#;
    /// Single plugin entries.
    pub const PLUGIN_ENTRY: &str = r#"[class*="plugin-entry"], [class*="plugin-item"], [class*="plugins-list-element"]"#;
    /// Manifest URL field.
    pub const MANIFEST_INPUT: &str = r#"[class*="plugin-management"] input[placeholder*="URL"], [class*="plugin-management"] input[placeholder*="url"], [class*="plugin-management"] input[type="url"], [class*="plugin-management"] input[type="text"]"#;
    /// Install button fallback.
    pub const INSTALL_BUTTON: &str = r#"[class*="plugin-management"] [class*="install-button"]"#;
    /// Connect button by handler attribute, inside the plugin frame.
    pub const CONNECT_HANDLER: &str = r#"button[data-handler="connect-mcp"]"#;
    /// Connection indicator inside the plugin frame.
    pub const CONNECTION_STATUS: &str = "#connection-status";
    /// Text identifying the plugin entry.
    pub const PLUGIN_NAME: &str = "MCP";
}

/// Suppresses "not extensible" errors from `Object.defineProperty` once SES
/// lockdown has frozen objects the plugin runtime still extends.
pub const SES_WORKAROUND: &str = r#"
const original = Object.defineProperty;
Object.defineProperty = function (obj, prop, desc) {
  try {
    return original.call(this, obj, prop, desc);
  } catch (e) {
    if (e instanceof TypeError && e.message.includes('not extensible')) {
      return obj;
    }
    throw e;
  }
};
return true;
"#;

/// Phases of the connect sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    /// Open the plugin manager with the shortcut.
    PrepareManager,
    /// Reload the workspace and reopen the manager.
    ReloadWorkspace,
    /// Look for the plugin in the installed list.
    CheckInstalled,
    /// Install from the manifest URL and accept the permission dialog.
    Install,
    /// Close and reopen the manager to refresh the list.
    ReopenManager,
    /// Open the plugin panel.
    OpenPlugin,
    /// Click Connect inside the plugin frame.
    ConnectFrame,
    /// Read the connection indicator.
    Verify,
    /// Done.
    Connected,
    /// Aborted.
    Failed,
}

impl fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which entry path to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// First connect after opening the workspace; installs when needed.
    Initial,
    /// Re-open an installed plugin, reloading if the shortcut does not respond.
    Reconnect,
}

/// Deadlines and settle delays.
#[derive(Debug, Clone)]
pub struct ConnectTimings {
    /// Deadline for plugin manager interactions.
    pub action_timeout: Duration,
    /// Deadline for page loads.
    pub nav_timeout: Duration,
    /// Deadline for the shortcut fast path on reconnect.
    pub shortcut_timeout: Duration,
    /// Upper bound for any single phase.
    pub phase_timeout: Duration,
    /// Short UI settle delay.
    pub settle_short: Duration,
    /// UI settle delay.
    pub settle: Duration,
    /// Wait before looking for the permission dialog.
    pub dialog_wait: Duration,
    /// Wait for the plugin frame to load after Open.
    pub plugin_load: Duration,
    /// Frame polling interval.
    pub poll: Duration,
}

impl Default for ConnectTimings {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(15),
            nav_timeout: Duration::from_secs(30),
            shortcut_timeout: Duration::from_secs(5),
            phase_timeout: Duration::from_secs(90),
            settle_short: Duration::from_millis(500),
            settle: Duration::from_secs(1),
            dialog_wait: Duration::from_secs(2),
            plugin_load: Duration::from_secs(3),
            poll: Duration::from_secs(1),
        }
    }
}

/// Outcome of one run: the phases visited and the final result.
#[derive(Debug)]
pub struct ConnectReport {
    /// Phases in visiting order, ending in `Connected` or `Failed`.
    pub phases: Vec<ConnectPhase>,
    /// Error that ended the run, if any.
    pub result: Result<()>,
}

impl ConnectReport {
    /// Phases on success, the error otherwise.
    pub fn into_result(self) -> Result<Vec<ConnectPhase>> {
        self.result.map(|()| self.phases)
    }
}

/// Whether a connection indicator text means connected.
///
/// "Disconnected" and "Not connected" contain "connected" and must not count.
pub fn is_connected_text(text: &str) -> bool {
    let text = text.trim().to_lowercase();
    !text.contains("disconnected") && !text.contains("not connected") && text.contains("connected")
}

/// Check every child frame for a connected indicator.
pub async fn plugin_connected(driver: &dyn BrowserDriver) -> Result<bool> {
    let status = Locator::css(selectors::CONNECTION_STATUS);
    for frame in 0..driver.frame_count().await? {
        match driver.frame_text(frame, &status).await {
            Ok(Some(text)) if is_connected_text(&text) => return Ok(true),
            Ok(_) => {}
            Err(e) => tracing::debug!(frame, "Frame not readable: {}", e),
        }
    }
    Ok(false)
}

/// Drives the connect sequence.
pub struct PluginConnector<'a> {
    driver: &'a dyn BrowserDriver,
    manifest_url: &'a str,
    debug: &'a DebugArtifacts,
    timings: ConnectTimings,
}

impl<'a> PluginConnector<'a> {
    /// Create a connector.
    pub fn new(
        driver: &'a dyn BrowserDriver,
        manifest_url: &'a str,
        debug: &'a DebugArtifacts,
        timings: ConnectTimings,
    ) -> Self {
        Self {
            driver,
            manifest_url,
            debug,
            timings,
        }
    }

    /// Run the sequence to completion.
    pub async fn run(&self, mode: ConnectMode) -> ConnectReport {
        let mut phases = Vec::new();
        let mut phase = ConnectPhase::PrepareManager;
        loop {
            phases.push(phase);
            if phase == ConnectPhase::Connected {
                tracing::info!(?mode, "MCP plugin connected");
                return ConnectReport {
                    phases,
                    result: Ok(()),
                };
            }

            tracing::debug!(%phase, "Plugin connect phase");
            let step = tokio::time::timeout(self.timings.phase_timeout, self.step(phase, mode)).await;
            let outcome = step.unwrap_or_else(|_| {
                Err(Error::Timeout {
                    operation: format!("plugin connect phase {phase}"),
                    ms: self.timings.phase_timeout.as_millis() as u64,
                })
            });
            match outcome {
                Ok(next) => phase = next,
                Err(e) => {
                    tracing::warn!(%phase, "Plugin connect failed: {}", e);
                    phases.push(ConnectPhase::Failed);
                    return ConnectReport {
                        phases,
                        result: Err(e),
                    };
                }
            }
        }
    }

    async fn step(&self, phase: ConnectPhase, mode: ConnectMode) -> Result<ConnectPhase> {
        match phase {
            ConnectPhase::PrepareManager => self.prepare_manager(mode).await,
            ConnectPhase::ReloadWorkspace => {
                self.reload_workspace().await?;
                Ok(ConnectPhase::OpenPlugin)
            }
            ConnectPhase::CheckInstalled => {
                let entry = Locator::containing(selectors::PLUGIN_LIST, selectors::PLUGIN_NAME);
                if self.driver.is_visible(&entry).await.unwrap_or(false) {
                    tracing::info!("MCP plugin already installed");
                    Ok(ConnectPhase::OpenPlugin)
                } else {
                    tracing::info!("MCP plugin not found, installing");
                    Ok(ConnectPhase::Install)
                }
            }
            ConnectPhase::Install => {
                self.install().await?;
                Ok(ConnectPhase::ReopenManager)
            }
            ConnectPhase::ReopenManager => {
                self.driver.press(&KeyChord::escape()).await?;
                self.settle(self.timings.settle_short).await;
                self.open_manager(self.timings.action_timeout).await?;
                Ok(ConnectPhase::OpenPlugin)
            }
            ConnectPhase::OpenPlugin => {
                self.open_plugin().await?;
                Ok(ConnectPhase::ConnectFrame)
            }
            ConnectPhase::ConnectFrame => {
                self.connect_frame().await?;
                Ok(ConnectPhase::Verify)
            }
            ConnectPhase::Verify => {
                self.verify().await;
                Ok(ConnectPhase::Connected)
            }
            ConnectPhase::Connected | ConnectPhase::Failed => Err(Error::Internal(format!(
                "no step for terminal phase {phase}"
            ))),
        }
    }

    async fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn open_manager(&self, timeout: Duration) -> Result<()> {
        self.driver.press(&KeyChord::plugin_manager()).await?;
        self.settle(self.timings.settle).await;
        self.driver
            .wait_visible(&Locator::css(selectors::PLUGIN_MANAGER), timeout)
            .await
    }

    async fn prepare_manager(&self, mode: ConnectMode) -> Result<ConnectPhase> {
        match mode {
            ConnectMode::Initial => {
                self.open_manager(self.timings.action_timeout).await?;
                tracing::info!("Plugin manager opened");
                Ok(ConnectPhase::CheckInstalled)
            }
            ConnectMode::Reconnect => {
                self.driver.press(&KeyChord::escape()).await?;
                self.settle(self.timings.settle_short).await;
                if let Err(e) = self.driver.click(&Locator::css(selectors::VIEWPORT)).await {
                    tracing::debug!("Viewport focus click failed: {}", e);
                }
                self.driver.press(&KeyChord::plugin_manager()).await?;
                let opened = self
                    .driver
                    .wait_visible(
                        &Locator::css(selectors::PLUGIN_MANAGER),
                        self.timings.shortcut_timeout,
                    )
                    .await
                    .is_ok();
                if opened {
                    Ok(ConnectPhase::OpenPlugin)
                } else {
                    tracing::info!("Shortcut failed, reloading workspace");
                    Ok(ConnectPhase::ReloadWorkspace)
                }
            }
        }
    }

    async fn reload_workspace(&self) -> Result<()> {
        self.driver.reload().await?;
        self.driver
            .wait_visible(&Locator::css(selectors::VIEWPORT), self.timings.nav_timeout)
            .await?;
        self.settle(self.timings.settle).await;
        self.open_manager(self.timings.action_timeout).await
    }

    async fn install(&self) -> Result<()> {
        let input = Locator::css(selectors::MANIFEST_INPUT);
        self.driver
            .wait_visible(&input, self.timings.action_timeout)
            .await?;
        self.driver.fill(&input, self.manifest_url).await?;

        let install = Locator::AnyOf {
            locators: vec![
                Locator::button(Some(selectors::PLUGIN_MANAGER), "Install"),
                Locator::css(selectors::INSTALL_BUTTON),
            ],
        };
        self.driver.click(&install).await?;
        tracing::info!(manifest = %self.manifest_url, "Install clicked, waiting for permission dialog");

        self.settle(self.timings.dialog_wait).await;
        let allow = Locator::button(None, "Allow");
        if self.driver.is_visible(&allow).await.unwrap_or(false) {
            self.driver.click(&allow).await?;
            tracing::info!("Plugin permissions allowed");
            self.settle(self.timings.settle).await;
        } else {
            tracing::warn!("No permission dialog found, saving debug snapshot");
            self.debug.save(self.driver, "mcp-install-debug").await;
        }
        self.settle(self.timings.settle).await;
        tracing::info!("Plugin installed");
        Ok(())
    }

    async fn open_plugin(&self) -> Result<()> {
        if let Err(e) = self.driver.evaluate(SES_WORKAROUND).await {
            tracing::warn!("SES workaround failed: {}", e);
        }

        let entry_open = Locator::EntryButton {
            entries: selectors::PLUGIN_ENTRY.into(),
            entry_text: selectors::PLUGIN_NAME.into(),
            button_text: "Open".into(),
        };
        let any_open = Locator::button(Some(selectors::PLUGIN_MANAGER), "Open");

        if self.driver.is_visible(&entry_open).await.unwrap_or(false) {
            self.driver.click(&entry_open).await?;
            tracing::info!("Opened MCP plugin entry");
        } else if self.driver.is_visible(&any_open).await.unwrap_or(false) {
            self.driver.click(&any_open).await?;
            tracing::info!("Opened first plugin in manager");
        } else {
            tracing::info!("No Open button, reopening plugin manager");
            self.driver.press(&KeyChord::escape()).await?;
            self.settle(self.timings.settle_short).await;
            self.driver.press(&KeyChord::plugin_manager()).await?;
            self.settle(self.timings.settle).await;
            let retry = Locator::button(None, "Open");
            self.driver
                .wait_visible(&retry, self.timings.action_timeout)
                .await?;
            self.driver.click(&retry).await?;
            tracing::info!("Opened plugin on retry");
        }

        self.settle(self.timings.plugin_load).await;
        Ok(())
    }

    async fn connect_frame(&self) -> Result<()> {
        let connect = Locator::AnyOf {
            locators: vec![
                Locator::css(selectors::CONNECT_HANDLER),
                Locator::button(None, "Connect"),
            ],
        };
        let deadline = Instant::now() + self.timings.action_timeout;
        let mut frames = 0;
        loop {
            frames = self.driver.frame_count().await.unwrap_or(frames);
            for frame in 0..frames {
                match self.driver.frame_click(frame, &connect).await {
                    Ok(true) => {
                        tracing::info!(frame, "Clicked Connect in MCP plugin frame");
                        return Ok(());
                    }
                    Ok(false) => {}
                    Err(e) => tracing::debug!(frame, "Frame not ready: {}", e),
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::Automation(format!(
                    "could not find MCP Connect button in any of {frames} frames"
                )));
            }
            self.settle(self.timings.poll).await;
        }
    }

    async fn verify(&self) {
        let deadline = Instant::now() + self.timings.action_timeout;
        loop {
            if plugin_connected(self.driver).await.unwrap_or(false) {
                tracing::info!("MCP connection verified");
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!("Could not verify connection status; it may still be active");
                return;
            }
            self.settle(self.timings.poll).await;
        }
    }
}
