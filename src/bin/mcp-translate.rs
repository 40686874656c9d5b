// ABOUTME: Transport translation binary: stdio child <-> SSE/Streamable HTTP
// ABOUTME: Forward mode spawns a child server; reverse mode bridges a remote SSE URL
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

use anyhow::{bail, Result};
use clap::Parser;
use mcp_gateway::bridge;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "mcp-translate",
    about = "Bridge a stdio MCP server to SSE/Streamable HTTP, or the reverse",
    version
)]
struct Args {
    /// Forward mode: spawn this stdio MCP server command
    #[arg(long, value_name = "COMMAND")]
    stdio: Option<String>,

    /// Reverse mode: bridge this remote SSE endpoint to local stdio
    #[arg(long, value_name = "URL")]
    sse: Option<String>,

    /// Listen port for forward mode
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Bind address for forward mode
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // The protocol owns stdout in reverse mode; logs always go to stderr
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match (args.stdio, args.sse) {
        (Some(command), None) => {
            bridge::run_forward(&command, &args.bind, args.port).await?;
        }
        (None, Some(url)) => {
            bridge::run_reverse(&url).await?;
        }
        _ => bail!("Exactly one of --stdio or --sse is required"),
    }
    Ok(())
}
