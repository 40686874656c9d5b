// ABOUTME: Gateway server binary: HTTP transports + admin API, or stdio mode
// ABOUTME: Configuration comes from the environment; logging from RUST_LOG
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

use anyhow::Result;
use clap::Parser;
use mcp_gateway::config::GatewayConfig;
use mcp_gateway::plugins::InProcessPluginSet;
use mcp_gateway::routes::build_router;
use mcp_gateway::state::AppState;
use mcp_gateway::transports::stdio;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "mcp-gateway", about = "Federated MCP gateway", version)]
struct Args {
    /// Serve a single MCP session over stdio instead of HTTP
    #[arg(long)]
    stdio: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mcp_gateway=debug"));
    if args.log_json {
        // stdio mode owns stdout for the protocol; logs must go to stderr
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = GatewayConfig::from_env()?;
    let bind_address = config.http.bind_address.clone();
    let port = config.http.port;

    let state = AppState::initialize(config, InProcessPluginSet::new()).await?;
    state.spawn_background_tasks();

    if args.stdio {
        stdio::run(state).await?;
        return Ok(());
    }

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind((bind_address.as_str(), port)).await?;
    info!(%bind_address, port, "MCP Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    Ok(())
}

async fn shutdown_signal(state: std::sync::Arc<AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
    state.shutdown.cancel();
}
