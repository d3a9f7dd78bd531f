//! chat-relay - single-room TCP broadcast relay

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_relay::{config::ConfigManager, RelayServer, ShutdownCoordinator};

/// CLI arguments for chat-relay
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(about = "Single-room TCP broadcast relay")]
#[command(version)]
#[command(long_about = "
chat-relay accepts any number of TCP connections and forwards every byte
received from one of them to all the others, in the order received.
There is no framing, no authentication and a single shared room.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  RELAY_BIND_ADDR             - Bind address (e.g., 0.0.0.0:5555)
  RELAY_PORT                  - Port to bind to
  RELAY_BACKLOG               - listen(2) backlog
  RELAY_BUFFER_SIZE           - Read buffer size in bytes
  RELAY_MAX_CONNECTIONS       - Maximum concurrent connections
  RELAY_IDLE_TIMEOUT          - Close silent peers after this long (e.g., 5m)
  RELAY_WRITE_FAILURE_POLICY  - ignore | disconnect
  RELAY_LOG_LEVEL             - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "relay.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 0.0.0.0:5555)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Read buffer size in bytes
    #[arg(long, help = "Read buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long, help = "Maximum number of concurrent connections")]
    pub max_connections: Option<usize>,

    /// Idle timeout (e.g., 30s, 5m)
    #[arg(long, value_parser = humantime::parse_duration, help = "Close peers idle for this long")]
    pub idle_timeout: Option<Duration>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.buffer_size,
        args.max_connections,
        args.idle_timeout,
        args.log_level.as_deref(),
    )?;

    init_tracing(&args, &config.logging.level)?;

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Backlog: {}", config.server.backlog);
        info!("  Buffer size: {} bytes", config.server.buffer_size);
        info!(
            "  Max connections: {}",
            config
                .server
                .max_connections
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unlimited".to_string())
        );
        info!(
            "  Idle timeout: {}",
            config
                .server
                .idle_timeout
                .map(|d| humantime::format_duration(d).to_string())
                .unwrap_or_else(|| "disabled".to_string())
        );
        info!(
            "  Write failure policy: {}",
            config.server.write_failure_policy
        );
        return Ok(());
    }

    info!("Starting chat-relay v{}", env!("CARGO_PKG_VERSION"));

    let mut server = RelayServer::bind(&config.server).context("Failed to start relay")?;
    let coordinator = ShutdownCoordinator::new(server.shutdown_handle());

    let mut relay_task = tokio::task::spawn_blocking(move || server.run());

    info!("Press Ctrl+C or send SIGTERM/SIGINT to shut down");

    tokio::select! {
        result = &mut relay_task => {
            return match result {
                Ok(run_result) => run_result,
                Err(e) => Err(anyhow::anyhow!("Relay thread failed: {}", e)),
            };
        }
        signal_result = coordinator.listen_for_signals() => {
            match signal_result {
                Ok(()) => info!("Initiating graceful shutdown..."),
                Err(e) => {
                    error!("Error setting up signal handlers: {}", e);
                    warn!("Relay keeps running without signal handling; stop it externally");
                }
            }
        }
    }

    match relay_task.await {
        Ok(run_result) => run_result?,
        Err(e) => error!("Relay thread failed: {}", e),
    }

    info!("Relay shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, configured_level: &str) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        configured_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
