//! Broadcast Fanout
//!
//! Writes one chunk to every live connection except the one it came from.
//! Best effort: each target gets a single non-blocking write, and whatever
//! the kernel does not take is dropped for that target.

use tracing::{debug, warn};

use crate::connection::{ConnectionId, Registry};
use crate::io::WriteOutcome;

/// What happened to one chunk
#[derive(Debug, Default)]
pub struct FanoutReport {
    /// Connections the chunk was offered to
    pub recipients: usize,
    /// Connections that took the whole chunk
    pub delivered: usize,
    /// Bytes written across all targets
    pub bytes_relayed: usize,
    /// Bytes lost to short writes, full buffers or failures
    pub bytes_dropped: usize,
    /// Targets whose write failed outright, in traversal order
    pub failed: Vec<ConnectionId>,
}

/// Write `data` to every connection in `registry` other than `source`
pub fn broadcast(registry: &mut Registry, source: ConnectionId, data: &[u8]) -> FanoutReport {
    let mut report = FanoutReport::default();
    let mut cursor = registry.cursor();

    while let Some(target) = registry.advance(&mut cursor) {
        if target.id() == source {
            continue;
        }
        report.recipients += 1;

        let outcome = target.send(data);
        let dropped = outcome.dropped(data.len());
        report.bytes_relayed += data.len() - dropped;
        report.bytes_dropped += dropped;

        match outcome {
            WriteOutcome::Complete => report.delivered += 1,
            WriteOutcome::Short { written } => {
                debug!(conn = %target.id(), written, dropped, "Short write, remainder dropped");
            }
            WriteOutcome::WouldBlock => {
                debug!(conn = %target.id(), dropped, "Send buffer full, chunk dropped");
            }
            WriteOutcome::Failed(e) => {
                warn!(conn = %target.id(), peer = %target.peer_addr(), "Write error: {}", e);
                report.failed.push(target.id());
            }
        }
    }

    report
}
