/// MCP Server Entry Point
///
/// Parses the command line (with environment fallbacks and an optional
/// `.env` file), builds the tool registry for the selected service and
/// serves it over the selected transport.
///
/// Services:
/// - `gcp`: GCP Manager tools (list/start/stop/get Compute Engine instances)
/// - `boomi`: Demo `add` tool backed by a Boomi process
///
/// Environment Variables:
/// - GCP_CREDENTIALS_PATH: service account key file (default: "credentials.json")
/// - BOOMI_TOKEN: basic-auth token for the Boomi endpoint
/// - MCP_TRANSPORT_MODE: "stdio", "http", or "both" (default: "http")
/// - SERVER_NAME: override the reported server name
/// - WORKER_THREADS: HTTP worker threads
/// - RUST_LOG: log filter (default: "info"); logs always go to stderr

mod clients;
mod core;
mod tools;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::core::config::{Cli, ServiceConfig, TransportMode};
use crate::core::server::{self, AppState};

fn init_logging() {
    // stdout belongs to the STDIO transport
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::load();
    init_logging();

    let (config, service) = cli.into_config();

    if let ServiceConfig::Boomi(boomi) = &service {
        info!("Boomi MCP server initialized");
        info!("Boomi token loaded: {}", if boomi.token.is_some() { "Yes" } else { "No" });
    }

    let registry = Arc::new(
        tools::build_registry(&service).context("Failed to initialize tool clients")?,
    );
    let state = AppState {
        server_name: config.name.clone(),
        server_version: config.version.clone(),
    };

    info!("Starting {} on {} ({:?})", config.name, config.bind_addr(), config.transport);

    match config.transport {
        TransportMode::Stdio => server::run_server_stdio(state, registry).await?,
        TransportMode::Http => server::run_server_http(state, registry, &config).await?,
        TransportMode::Both => {
            let stdio_state = state.clone();
            let stdio_registry = registry.clone();

            // STDIO in the background, HTTP in the foreground
            let stdio_handle = tokio::spawn(async move {
                if let Err(e) = server::run_server_stdio(stdio_state, stdio_registry).await {
                    error!("STDIO server error: {}", e);
                }
            });

            let http_result = server::run_server_http(state, registry, &config).await;

            // If HTTP server exits, abort STDIO task
            stdio_handle.abort();

            http_result?
        }
    }

    Ok(())
}
