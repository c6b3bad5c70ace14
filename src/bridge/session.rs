//! Browser session bring-up: service readiness, login and workspace.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use super::api::{PenpotApi, WorkspaceFile};
use super::config::BridgeConfig;
use super::driver::{BrowserDriver, Locator};
use super::plugin::selectors;
use crate::error::{Error, Result};

const EMAIL_INPUT: &str = r#"input[type="email"], input[id="email"]"#;
const PASSWORD_INPUT: &str = r#"input[type="password"], input[id="password"]"#;
const LOGIN_SUBMIT: &str = r#"[data-testid="login-submit"], button[type="submit"]"#;

/// Writes screenshots and HTML dumps for post-mortem inspection.
#[derive(Debug, Clone)]
pub struct DebugArtifacts {
    dir: PathBuf,
}

impl DebugArtifacts {
    /// Artifacts go to `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of an artifact.
    pub fn path(&self, stem: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{extension}"))
    }

    /// Save `{stem}.png` and `{stem}.html`; failures are only logged.
    pub async fn save(&self, driver: &dyn BrowserDriver, stem: &str) {
        match driver.screenshot().await {
            Ok(png) => {
                if let Err(e) = tokio::fs::write(self.path(stem, "png"), png).await {
                    tracing::warn!("Cannot write screenshot: {}", e);
                }
            }
            Err(e) => tracing::debug!("Screenshot unavailable: {}", e),
        }
        match driver.page_source().await {
            Ok(html) if !html.is_empty() => {
                if let Err(e) = tokio::fs::write(self.path(stem, "html"), html).await {
                    tracing::warn!("Cannot write page source: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Page source unavailable: {}", e),
        }
        tracing::info!(
            "Debug saved: {}",
            self.dir.join(format!("{stem}.{{png,html}}")).display()
        );
    }
}

/// Poll `url` until it answers 200.
pub async fn wait_for_service(
    http: &reqwest::Client,
    url: &str,
    label: &str,
    poll: Duration,
    timeout: Duration,
) -> Result<()> {
    tracing::info!(%url, "Waiting for {}", label);
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match http.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!("{} is ready", label);
                return Ok(());
            }
            Ok(response) => tracing::debug!(status = %response.status(), "{} not ready", label),
            Err(e) => tracing::debug!("{} not reachable: {}", label, e),
        }
        tokio::time::sleep(poll).await;
    }
    Err(Error::Timeout {
        operation: format!("waiting for {label} at {url}"),
        ms: timeout.as_millis() as u64,
    })
}

fn is_logged_in_url(url: &str) -> bool {
    let hash = url.split_once('#').map(|(_, hash)| hash).unwrap_or("");
    ["/dashboard", "/workspace", "/view"]
        .iter()
        .any(|route| hash.contains(route))
}

async fn login_once(driver: &dyn BrowserDriver, config: &BridgeConfig) -> Result<()> {
    let nav = config.timings.nav_timeout();
    driver.navigate(&config.login_url()).await?;

    let email = Locator::css(EMAIL_INPUT);
    driver.wait_visible(&email, nav).await?;
    driver.fill(&email, &config.email()).await?;

    // Some versions ask for the password on a second step.
    let submit = Locator::css(LOGIN_SUBMIT);
    driver.click(&submit).await?;

    let password = Locator::css(PASSWORD_INPUT);
    driver.wait_visible(&password, nav).await?;
    driver.fill(&password, &config.password()).await?;
    driver.click(&submit).await?;

    driver.wait_url(&is_logged_in_url, nav).await
}

/// Log in through the form, retrying until the login budget runs out.
pub async fn login(driver: &dyn BrowserDriver, config: &BridgeConfig) -> Result<()> {
    let retry = config.timings.login_retry();
    let deadline = Instant::now() + config.timings.login_timeout();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        tracing::info!(attempt, email = %config.email(), "Login attempt");
        match login_once(driver, config).await {
            Ok(()) => {
                tracing::info!("Logged in");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(attempt, "Login failed: {}", e);
                if Instant::now() + retry > deadline {
                    return Err(Error::Automation(format!(
                        "login failed after {attempt} attempts: {e}"
                    )));
                }
                tokio::time::sleep(retry).await;
            }
        }
    }
}

/// Navigate to a workspace file and wait for the editor viewport.
pub async fn open_file(
    driver: &dyn BrowserDriver,
    config: &BridgeConfig,
    file: &WorkspaceFile,
) -> Result<()> {
    tracing::info!(project = %file.project_id, file = %file.file_id, "Navigating to workspace");
    driver
        .navigate(&config.workspace_url(&file.project_id, &file.file_id))
        .await?;
    driver
        .wait_visible(&Locator::css(selectors::VIEWPORT), config.timings.nav_timeout())
        .await?;
    tracing::info!("Workspace is open");
    Ok(())
}

/// Resolve the workspace file over REST and open it.
pub async fn open_workspace(
    driver: &dyn BrowserDriver,
    api: &PenpotApi,
    config: &BridgeConfig,
) -> Result<WorkspaceFile> {
    let file = api.ensure_workspace_file(&config.shared_team).await?;
    open_file(driver, config, &file).await?;
    Ok(file)
}
