use std::sync::Arc;

use clap::Parser;
use tracing::warn;

use emissary_core::config::EmissaryConfig;
use emissary_server::{app, lifecycle, mcp};

/// MCP server exposing remote generative models as typed tools.
#[derive(Parser)]
#[command(name = "emissary-server", version, about)]
struct Cli {
    /// Config file path (default: ~/.emissary/emissary.toml).
    #[arg(long)]
    config: Option<String>,

    /// Bind host. Accepted for launcher parity; the stdio transport
    /// ignores it.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port. Accepted for launcher parity; the stdio transport
    /// ignores it.
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// Log filter, e.g. `info` or `emissary=debug`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = EmissaryConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("config load failed ({e}), using defaults");
        EmissaryConfig::default()
    });

    // Stdout carries JSON-RPC only; all logging goes to stderr.
    let filter = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.server.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.port != 0 {
        warn!(host = %cli.host, port = cli.port, "HTTP transport flags are ignored by the stdio server");
    }

    let services = app::Services::init(config).await?;
    lifecycle::install_signal_handlers(Arc::clone(&services.ops));
    emissary_server::ops::OperationManager::spawn_monitor(Arc::clone(&services.ops));

    mcp::serve(services).await
}
