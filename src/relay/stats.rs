//! Relay Statistics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::info;

/// Counters shared between the relay thread and observers
#[derive(Debug, Default)]
pub struct RelayStats {
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    accept_errors: AtomicU64,
    connections_closed: AtomicU64,
    active_connections: AtomicUsize,
    bytes_received: AtomicU64,
    bytes_relayed: AtomicU64,
    bytes_dropped: AtomicU64,
    write_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub accept_errors: u64,
    pub connections_closed: u64,
    pub active_connections: usize,
    pub bytes_received: u64,
    pub bytes_relayed: u64,
    pub bytes_dropped: u64,
    pub write_failures: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_fanout(&self, relayed: usize, dropped: usize, failures: usize) {
        self.bytes_relayed.fetch_add(relayed as u64, Ordering::Relaxed);
        self.bytes_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        self.write_failures.fetch_add(failures as u64, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            bytes_dropped: self.bytes_dropped.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Log a one-line summary
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            accepted = s.connections_accepted,
            rejected = s.connections_rejected,
            closed = s.connections_closed,
            active = s.active_connections,
            bytes_received = s.bytes_received,
            bytes_relayed = s.bytes_relayed,
            bytes_dropped = s.bytes_dropped,
            write_failures = s.write_failures,
            "Relay statistics"
        );
    }
}
