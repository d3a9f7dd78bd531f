//! Configuration Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Pending-connection queue length passed to listen(2)
    pub backlog: u32,
    /// Size of the read buffer; not a protocol limit
    pub buffer_size: usize,
    /// Readiness events fetched per poll
    pub event_capacity: usize,
    /// Unlimited when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    /// Disabled when unset
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<Duration>,
    pub write_failure_policy: WriteFailurePolicy,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// What to do with a target whose write fails during fanout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteFailurePolicy {
    /// Log and keep the target; its own read path notices if it is gone
    #[default]
    Ignore,
    /// Tear the target down as soon as the chunk has been fanned out
    Disconnect,
}

impl fmt::Display for WriteFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteFailurePolicy::Ignore => write!(f, "ignore"),
            WriteFailurePolicy::Disconnect => write!(f, "disconnect"),
        }
    }
}

impl std::str::FromStr for WriteFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(WriteFailurePolicy::Ignore),
            "disconnect" => Ok(WriteFailurePolicy::Disconnect),
            other => anyhow::bail!("unknown write failure policy '{}'", other),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5555)),
            backlog: 5,
            buffer_size: 8192,
            event_capacity: 1024,
            max_connections: None,
            idle_timeout: None,
            write_failure_policy: WriteFailurePolicy::Ignore,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
