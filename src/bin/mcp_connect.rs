//! penpot-mcp-connect - keeps the Penpot MCP plugin connected in a headless browser
//!
//! Logs in, opens the workspace, installs and connects the plugin, then serves
//! the bridge HTTP API until interrupted. Exits 1 when the browser goes away so
//! a supervisor can restart it.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use penpot_mcp_bridge::bridge::{
    http, monitor, session, Bridge, BridgeConfig, BrowserDriver, BrowserOptions, ConnectMode,
    WebDriverSession,
};
use penpot_mcp_bridge::logging::init_logging;

const LIVENESS_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    let config = BridgeConfig::parse();

    if let Err(e) = init_logging(config.verbose, config.log_json, config.log_file.as_deref()) {
        eprintln!("cannot initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => {
            tracing::info!("Bridge exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let timings = config.timings.clone();
    let probe = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    session::wait_for_service(
        &probe,
        &config.penpot_uri,
        "Penpot frontend",
        timings.service_poll(),
        timings.service_timeout(),
    )
    .await?;
    session::wait_for_service(
        &probe,
        &config.manifest_url(),
        "MCP plugin manifest",
        timings.service_poll(),
        timings.service_timeout(),
    )
    .await?;

    tracing::info!(webdriver = %config.webdriver_url, "Launching browser");
    let options = BrowserOptions {
        headless: !config.visible,
        page_load_timeout: timings.nav_timeout(),
        ..BrowserOptions::default()
    };
    let driver: Arc<dyn BrowserDriver> = Arc::new(
        WebDriverSession::start(&config.webdriver_url, &options)
            .await
            .context("cannot start browser session")?,
    );

    let listen = config.listen;
    let bridge = Arc::new(Bridge::new(config, driver.clone())?);

    if let Err(e) = bring_up(&bridge).await {
        bridge.debug().save(bridge.driver(), "mcp-connect-error").await;
        driver.close().await;
        return Err(e);
    }

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot bind bridge server to {listen}"))?;
    tracing::info!("Bridge server listening on http://{}", listen);
    let app = http::router(bridge.clone());
    let mut server = tokio::spawn(async move { axum::serve(listener, app).await });

    let monitor = monitor::spawn(bridge.clone());
    tracing::info!("MCP connected. Browser will stay open. Press Ctrl+C to exit.");

    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutting down");
            Ok(())
        }
        _ = browser_gone(driver.as_ref()) => {
            Err(anyhow::anyhow!("browser disconnected unexpectedly, exiting for restart"))
        }
        result = &mut server => {
            match result {
                Ok(Ok(())) => Err(anyhow::anyhow!("bridge server stopped")),
                Ok(Err(e)) => Err(anyhow::Error::new(e).context("bridge server failed")),
                Err(e) => Err(anyhow::Error::new(e).context("bridge server task failed")),
            }
        }
    };

    monitor.abort();
    server.abort();
    if outcome.is_ok() {
        driver.close().await;
    }
    outcome
}

async fn bring_up(bridge: &Bridge) -> anyhow::Result<()> {
    session::login(bridge.driver(), bridge.config())
        .await
        .context("login")?;
    session::open_workspace(bridge.driver(), bridge.api(), bridge.config())
        .await
        .context("open workspace")?;
    tracing::info!("Installing and connecting MCP plugin");
    bridge
        .connect_plugin(ConnectMode::Initial)
        .await
        .context("connect MCP plugin")?;
    Ok(())
}

async fn browser_gone(driver: &dyn BrowserDriver) {
    let mut interval = tokio::time::interval(LIVENESS_INTERVAL);
    loop {
        interval.tick().await;
        if !driver.is_alive().await {
            return;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
