//! Tracing setup shared by both binaries.
//!
//! Logs never go to stdout: the proxy speaks MCP there.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `verbose`. With `log_file` set, output is appended
/// to that file instead of stderr.
pub fn init_logging(verbose: bool, json: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let registry = tracing_subscriber::registry().with(filter);

    match (log_file, json) {
        (Some(path), json) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            if json {
                registry.with(layer.json()).init();
            } else {
                registry.with(layer).init();
            }
        }
        (None, true) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        (None, false) => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}
