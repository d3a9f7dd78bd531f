//! Configuration Manager

use super::{Config, WriteFailurePolicy};
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

const MAX_BUFFER_SIZE: usize = 1024 * 1024;
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        Self::load_from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from defaults plus whatever `lookup` returns for
    /// the `RELAY_*` variables
    pub fn load_from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(bind_addr) = lookup("RELAY_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid RELAY_BIND_ADDR: {}", bind_addr))?;
        }

        if let Some(port) = lookup("RELAY_PORT") {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid RELAY_PORT: {}", port))?;
            config.server.bind_addr.set_port(port);
        }

        if let Some(backlog) = lookup("RELAY_BACKLOG") {
            config.server.backlog = backlog
                .parse::<u32>()
                .with_context(|| format!("Invalid RELAY_BACKLOG: {}", backlog))?;
        }

        if let Some(buffer_size) = lookup("RELAY_BUFFER_SIZE") {
            config.server.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid RELAY_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Some(max_conn) = lookup("RELAY_MAX_CONNECTIONS") {
            config.server.max_connections = Some(
                max_conn
                    .parse::<usize>()
                    .with_context(|| format!("Invalid RELAY_MAX_CONNECTIONS: {}", max_conn))?,
            );
        }

        if let Some(timeout) = lookup("RELAY_IDLE_TIMEOUT") {
            config.server.idle_timeout = Some(
                humantime::parse_duration(&timeout)
                    .with_context(|| format!("Invalid RELAY_IDLE_TIMEOUT: {}", timeout))?,
            );
        }

        if let Some(policy) = lookup("RELAY_WRITE_FAILURE_POLICY") {
            config.server.write_failure_policy = policy
                .parse::<WriteFailurePolicy>()
                .with_context(|| format!("Invalid RELAY_WRITE_FAILURE_POLICY: {}", policy))?;
        }

        if let Some(log_level) = lookup("RELAY_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    /// Validate server configuration
    fn validate_server_config(&self) -> Result<()> {
        if self.server.backlog == 0 {
            bail!("backlog must be greater than 0");
        }

        if self.server.buffer_size == 0 {
            bail!("buffer_size must be greater than 0");
        }

        if self.server.buffer_size > MAX_BUFFER_SIZE {
            bail!("buffer_size cannot exceed 1MB");
        }

        if self.server.event_capacity == 0 {
            bail!("event_capacity must be greater than 0");
        }

        if self.server.max_connections == Some(0) {
            bail!("max_connections must be greater than 0 when set");
        }

        if self.server.idle_timeout == Some(Duration::ZERO) {
            bail!("idle_timeout must be greater than 0 when set");
        }

        Ok(())
    }

    /// Validate logging configuration
    fn validate_logging_config(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!(
                "logging.level must be one of: {}",
                VALID_LOG_LEVELS.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        buffer_size: Option<usize>,
        max_connections: Option<usize>,
        idle_timeout: Option<Duration>,
        log_level: Option<&str>,
    ) -> Result<()> {
        if let Some(bind_str) = bind {
            let addr = bind_str
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid bind address: {}", bind_str))?;
            self.server.bind_addr = addr;
            tracing::info!("CLI override: bind address set to {}", addr);
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(buffer_size) = buffer_size {
            self.server.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }

        if let Some(max_conn) = max_connections {
            self.server.max_connections = Some(max_conn);
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        if let Some(timeout) = idle_timeout {
            self.server.idle_timeout = Some(timeout);
            tracing::info!(
                "CLI override: idle timeout set to {}",
                humantime::format_duration(timeout)
            );
        }

        if let Some(level) = log_level {
            self.logging.level = level.to_string();
        }

        Ok(())
    }
}
