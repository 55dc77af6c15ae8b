use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcp_proxy::cli::{Cli, GatewayMode, LogLevel};
use mcp_proxy::gateway;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting MCP proxy");

    match cli.resolve()? {
        GatewayMode::StdioToSse(options) => gateway::stdio_to_sse::run(options).await?,
        GatewayMode::StdioToWs(options) => gateway::stdio_to_ws::run(options).await?,
        GatewayMode::SseToStdio(options) => gateway::sse_to_stdio::run(options).await?,
        GatewayMode::StreamableHttpToStdio(options) => {
            gateway::streamable_http_to_stdio::run(options).await?;
        }
    }
    Ok(())
}

/// stdout belongs to the protocol in the stdio output modes, so logs
/// always go to stderr. `RUST_LOG` overrides `--log-level` when set.
fn init_tracing(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive())),
        )
        .with_writer(std::io::stderr)
        .init();
}
