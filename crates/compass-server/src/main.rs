//! Compass server binary
//!
//! Binds the HTTP API first, then initializes the agent. Until that
//! finishes `/health` reports `agent_ready: false` and `/chat` answers 503.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use compass_core::config::{Config, DEFAULT_CONFIG_FILE};
use compass_core::AgentService;

#[derive(Parser)]
#[command(name = "compass-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tool-augmented chat agent over MCP tool hosts", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn init_logging(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = if cli.verbose {
        "info,compass_core=debug,compass_mcp=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = match &cli.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "compass.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Environment may come from a .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let _log_guard = init_logging(&cli);

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.apply_env_overrides();
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let server_config = config.server.clone();
    let service = Arc::new(AgentService::new(config));
    let handle = compass_server::start(&server_config, service.clone())
        .await
        .context("Failed to bind HTTP server")?;

    match service.initialize().await {
        Ok(report) => tracing::info!(
            tools = report.tool_count,
            unavailable_hosts = report.warnings.len(),
            "Agent initialized"
        ),
        Err(e) => {
            tracing::error!("Agent initialization failed: {}", e);
            handle.abort();
            return Err(e).context("Agent initialization failed");
        }
    }

    tokio::select! {
        _ = handle.wait() => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }
    Ok(())
}
