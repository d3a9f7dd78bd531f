//! Relay Module
//!
//! Broadcast fanout, statistics, and the dispatch context shared by the
//! listener and the connection handler.

pub mod fanout;
pub mod stats;

pub use fanout::{broadcast, FanoutReport};
pub use stats::{RelayStats, StatsSnapshot};

use std::fmt;
use std::io;

use tracing::{info, warn};

use crate::connection::{ConnectionId, Registry};
use crate::event_loop::{EventLoop, EventTarget};

/// Why a connection is being torn down
#[derive(Debug)]
pub enum DisconnectReason {
    PeerClosed,
    ReadError(io::Error),
    WriteError,
    IdleTimeout,
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => write!(f, "peer closed"),
            DisconnectReason::ReadError(e) => write!(f, "read error: {}", e),
            DisconnectReason::WriteError => write!(f, "write error"),
            DisconnectReason::IdleTimeout => write!(f, "idle timeout"),
            DisconnectReason::Shutdown => write!(f, "relay shutting down"),
        }
    }
}

/// Mutable relay state a callback may touch while it runs
pub struct Context<'a> {
    pub registry: &'a mut Registry,
    pub event_loop: &'a mut EventLoop,
    pub stats: &'a RelayStats,
}

impl Context<'_> {
    /// Stop watching, unregister and close a connection.
    ///
    /// Returns false if the connection was already gone; teardown happens at
    /// most once per connection.
    pub fn teardown(&mut self, id: ConnectionId, reason: DisconnectReason) -> bool {
        let Some(mut connection) = self.registry.remove(id) else {
            return false;
        };

        if let Err(e) = self
            .event_loop
            .unwatch(connection.stream_mut(), EventTarget::Connection(id))
        {
            warn!(conn = %id, "Failed to stop watching connection: {}", e);
        }

        info!(
            conn = %id,
            peer = %connection.peer_addr(),
            bytes_received = connection.bytes_received(),
            bytes_sent = connection.bytes_sent(),
            age_ms = connection.age().as_millis() as u64,
            "Connection closed: {}",
            reason
        );

        self.stats.record_close();
        // Dropping the connection closes its socket
        drop(connection);
        true
    }
}
