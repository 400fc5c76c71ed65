//! # huddle-gateway
//!
//! Gateway binary: opens the record store, registers the message catalog
//! and serves WebSocket clients until Ctrl-C.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use huddle_core::logging::{DEFAULT_LEVEL, init_subscriber};
use huddle_server::handlers::register_all;
use huddle_server::shutdown::DEFAULT_SHUTDOWN_TIMEOUT;
use huddle_server::{Dispatcher, GatewayServer, ServerConfig};
use huddle_store::{ConnectionConfig, SqliteStore};

/// Real-time chat session gateway.
#[derive(Parser, Debug)]
#[command(name = "huddle-gateway", about = "Real-time chat session gateway")]
struct Cli {
    /// Path to the `SQLite` database, or `:memory:`.
    #[arg(long, default_value = "huddle.db")]
    db_path: String,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings, default 8888).
    #[arg(long)]
    port: Option<u16>,

    /// Optional JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = DEFAULT_LEVEL)]
    log_level: String,
}

impl Cli {
    /// Apply flags on top of file and environment settings.
    fn apply_overrides(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }
}

fn ensure_parent_dir(db_path: &str) -> Result<()> {
    if db_path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_subscriber(&cli.log_level);

    let mut config =
        ServerConfig::load(cli.config.as_deref()).context("failed to load settings")?;
    cli.apply_overrides(&mut config);

    ensure_parent_dir(&cli.db_path)?;
    let store = SqliteStore::open(&cli.db_path, &ConnectionConfig::default())
        .with_context(|| format!("failed to open store at {}", cli.db_path))?;

    let mut dispatcher = Dispatcher::new();
    register_all(&mut dispatcher);
    let handler_count = dispatcher.len();

    let mut server = GatewayServer::new(config, Arc::new(store), dispatcher);
    match huddle_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics disabled"),
    }

    let handle = server.listen().await.context("failed to bind server")?;
    tracing::info!(
        "huddle gateway listening on ws://{}/ws ({handler_count} handlers registered)",
        handle.local_addr()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    if !handle.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await {
        tracing::warn!("some sessions did not close in time");
    }
    Ok(())
}
