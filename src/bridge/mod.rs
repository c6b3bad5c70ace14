//! Browser session bridge.
//!
//! Keeps a logged-in Penpot workspace open in a WebDriver-controlled browser
//! with the MCP plugin connected, and serves a local HTTP API that lets code
//! running inside the plugin reach the Penpot REST API and switch files.

pub mod api;
pub mod config;
pub mod driver;
pub mod http;
pub mod monitor;
pub mod plugin;
pub mod session;
pub mod state;
pub mod webdriver;

use std::sync::Arc;

use crate::error::Result;

pub use api::{PenpotApi, WorkspaceFile};
pub use config::BridgeConfig;
pub use driver::{BrowserDriver, Locator};
pub use plugin::{ConnectMode, ConnectPhase, ConnectTimings, PluginConnector};
pub use session::DebugArtifacts;
pub use state::{BridgeState, NavigationStatus};
pub use webdriver::{BrowserOptions, WebDriverSession};

/// Everything the HTTP handlers and the monitor share.
pub struct Bridge {
    config: BridgeConfig,
    driver: Arc<dyn BrowserDriver>,
    api: PenpotApi,
    state: BridgeState,
    debug: DebugArtifacts,
    timings: ConnectTimings,
}

impl Bridge {
    /// Bridge over an already logged-in browser.
    pub fn new(config: BridgeConfig, driver: Arc<dyn BrowserDriver>) -> Result<Self> {
        let api = PenpotApi::new(
            config.base_url(),
            driver.clone(),
            config.timings.api_timeout(),
        )?;
        Ok(Self {
            debug: DebugArtifacts::new(&config.debug_dir),
            timings: config.timings.connect(),
            api,
            driver,
            config,
            state: BridgeState::default(),
        })
    }

    /// Replace the plugin connect timings.
    pub fn with_connect_timings(mut self, timings: ConnectTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Browser driver.
    pub fn driver(&self) -> &dyn BrowserDriver {
        self.driver.as_ref()
    }

    /// REST client.
    pub fn api(&self) -> &PenpotApi {
        &self.api
    }

    /// Shared status.
    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    /// Debug artifact writer.
    pub fn debug(&self) -> &DebugArtifacts {
        &self.debug
    }

    /// Run the plugin connect sequence in `mode`.
    pub async fn connect_plugin(&self, mode: ConnectMode) -> Result<Vec<ConnectPhase>> {
        let manifest = self.config.manifest_url();
        PluginConnector::new(self.driver(), &manifest, &self.debug, self.timings.clone())
            .run(mode)
            .await
            .into_result()
    }

    /// Reconnect the plugin, tracking the outcome in the status.
    ///
    /// The caller holds the operations guard.
    pub async fn reconnect_plugin(&self) -> Result<()> {
        self.state.set_status(NavigationStatus::Reconnecting).await;
        tracing::info!("Reconnecting MCP plugin");
        match self.connect_plugin(ConnectMode::Reconnect).await {
            Ok(_) => {
                self.state.set_status(NavigationStatus::Ready).await;
                tracing::info!("MCP plugin reconnected");
                Ok(())
            }
            Err(e) => {
                self.state.set_status(NavigationStatus::Error).await;
                tracing::warn!("Reconnect failed: {}", e);
                Err(e)
            }
        }
    }

    /// Open another file and reconnect the plugin there.
    ///
    /// The caller holds the operations guard.
    pub async fn navigate(&self, file: &WorkspaceFile) -> Result<()> {
        if let Err(e) = session::open_file(self.driver(), &self.config, file).await {
            self.state.set_status(NavigationStatus::Error).await;
            tracing::warn!("Navigation failed: {}", e);
            return Err(e);
        }
        self.reconnect_plugin().await
    }
}
