//! penpot-mcp-proxy - stdio MCP proxy for the Penpot MCP server
//!
//! Relays tools/list and tools/call to an upstream MCP server, optionally
//! behind an `activate` gate.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use penpot_mcp_bridge::logging::init_logging;
use penpot_mcp_bridge::server::SERVER_VERSION;
use penpot_mcp_bridge::{Gateway, HttpConnector, McpServer, ProxyConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let config = ProxyConfig::parse();

    if let Err(e) = init_logging(config.verbose, config.log_json, config.log_file.as_deref()) {
        eprintln!("cannot initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        "Starting penpot-mcp-proxy v{} ({} mode, upstream {})",
        SERVER_VERSION,
        if config.gated() { "gate" } else { "transparent" },
        config.upstream
    );
    tracing::info!(tools = %config.tools, retry = ?config.retry, "Exposure policy");

    let connector = match HttpConnector::new(config.upstream.clone(), config.timeout()) {
        Ok(connector) => connector,
        Err(e) => {
            tracing::error!("Cannot build upstream client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let gateway = Arc::new(Gateway::new(config, Arc::new(connector)));
    let server = McpServer::new(gateway);

    match server.run_stdio().await {
        Ok(()) => {
            tracing::info!("Server exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
