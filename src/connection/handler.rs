//! Connection Read Handler
//!
//! Runs when a connection is readable: reads until the socket would block,
//! fanning out each chunk before the next read, and tears the connection
//! down on EOF or a read error.

use tracing::{debug, warn};

use super::ConnectionId;
use crate::config::WriteFailurePolicy;
use crate::event_loop::Readiness;
use crate::io::ReadOutcome;
use crate::relay::{broadcast, Context, DisconnectReason, FanoutReport};

pub struct ConnectionHandler {
    buffer: Vec<u8>,
    policy: WriteFailurePolicy,
}

impl ConnectionHandler {
    pub fn new(buffer_size: usize, policy: WriteFailurePolicy) -> Self {
        Self {
            buffer: vec![0u8; buffer_size],
            policy,
        }
    }

    pub fn policy(&self) -> WriteFailurePolicy {
        self.policy
    }

    /// Drain `id` until it would block or is torn down
    pub fn on_readable(&mut self, ctx: &mut Context<'_>, id: ConnectionId) -> Readiness {
        loop {
            let Some(connection) = ctx.registry.get_mut(id) else {
                return Readiness::Drained;
            };

            match connection.read_chunk(&mut self.buffer) {
                ReadOutcome::Data(n) => {
                    ctx.stats.record_received(n);
                    let report = broadcast(ctx.registry, id, &self.buffer[..n]);
                    debug!(
                        conn = %id,
                        bytes = n,
                        recipients = report.recipients,
                        delivered = report.delivered,
                        "Chunk relayed"
                    );
                    self.settle(ctx, report);
                }
                ReadOutcome::WouldBlock => return Readiness::Drained,
                ReadOutcome::Interrupted => continue,
                ReadOutcome::Closed => {
                    ctx.teardown(id, DisconnectReason::PeerClosed);
                    return Readiness::Drained;
                }
                ReadOutcome::Failed(e) => {
                    warn!(conn = %id, "Read error: {}", e);
                    ctx.teardown(id, DisconnectReason::ReadError(e));
                    return Readiness::Drained;
                }
            }
        }
    }

    /// Account for a fanout and apply the write failure policy to its targets
    fn settle(&self, ctx: &mut Context<'_>, report: FanoutReport) {
        ctx.stats
            .record_fanout(report.bytes_relayed, report.bytes_dropped, report.failed.len());

        if self.policy == WriteFailurePolicy::Disconnect {
            for target in report.failed {
                ctx.teardown(target, DisconnectReason::WriteError);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{connection_pair, reset};
    use crate::connection::Registry;
    use crate::event_loop::{EventLoop, EventTarget};
    use crate::relay::RelayStats;
    use mio::Interest;
    use std::io::{Read, Write};
    use std::time::Duration;

    struct Fixture {
        registry: Registry,
        event_loop: EventLoop,
        stats: RelayStats,
        clients: Vec<std::net::TcpStream>,
        ids: Vec<ConnectionId>,
    }

    impl Fixture {
        fn new(peers: usize) -> Self {
            let mut registry = Registry::new(crate::event_loop::FIRST_CONNECTION_TOKEN);
            let event_loop = EventLoop::new(64).unwrap();
            let stats = RelayStats::new();
            let mut clients = Vec::new();
            let mut ids = Vec::new();
            for _ in 0..peers {
                let id = registry.insert_with(|id| {
                    let (conn, client) = connection_pair(id.as_usize());
                    clients.push(client);
                    conn
                });
                let conn = registry.get_mut(id).unwrap();
                event_loop
                    .watch(conn.stream_mut(), EventTarget::Connection(id), Interest::READABLE)
                    .unwrap();
                stats.record_accept();
                ids.push(id);
            }
            Self {
                registry,
                event_loop,
                stats,
                clients,
                ids,
            }
        }

        fn ctx(&mut self) -> Context<'_> {
            Context {
                registry: &mut self.registry,
                event_loop: &mut self.event_loop,
                stats: &self.stats,
            }
        }
    }

    fn read_exactly(client: &mut std::net::TcpStream, len: usize) -> Vec<u8> {
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_would_block_keeps_connection() {
        let mut fixture = Fixture::new(2);
        let mut handler = ConnectionHandler::new(1024, WriteFailurePolicy::Ignore);
        let id = fixture.ids[0];

        let readiness = handler.on_readable(&mut fixture.ctx(), id);
        assert_eq!(readiness, Readiness::Drained);
        assert!(fixture.registry.contains(id));
        assert_eq!(fixture.stats.snapshot().connections_closed, 0);
    }

    #[test]
    fn test_small_buffer_drains_everything() {
        let mut fixture = Fixture::new(2);
        let mut handler = ConnectionHandler::new(16, WriteFailurePolicy::Ignore);
        let payload: Vec<u8> = (0..200u8).collect();
        fixture.clients[0].write_all(&payload).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let id = fixture.ids[0];
        assert_eq!(handler.on_readable(&mut fixture.ctx(), id), Readiness::Drained);

        let received = read_exactly(&mut fixture.clients[1], payload.len());
        assert_eq!(received, payload);
        assert_eq!(fixture.stats.snapshot().bytes_received, 200);
        assert_eq!(fixture.stats.snapshot().bytes_relayed, 200);
    }

    #[test]
    fn test_peer_close_tears_down_once() {
        let mut fixture = Fixture::new(2);
        let mut handler = ConnectionHandler::new(64, WriteFailurePolicy::Ignore);
        let id = fixture.ids[1];
        let gone = fixture.clients.remove(1);
        drop(gone);
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(handler.on_readable(&mut fixture.ctx(), id), Readiness::Drained);
        assert!(!fixture.registry.contains(id));

        // A stale callback for the same connection is a no-op
        assert_eq!(handler.on_readable(&mut fixture.ctx(), id), Readiness::Drained);
        assert!(!fixture.ctx().teardown(id, DisconnectReason::PeerClosed));

        let snapshot = fixture.stats.snapshot();
        assert_eq!(snapshot.connections_closed, 1);
        assert_eq!(snapshot.active_connections, 1);
    }

    #[test]
    fn test_peer_reset_tears_down_once() {
        let mut fixture = Fixture::new(3);
        let mut handler = ConnectionHandler::new(64, WriteFailurePolicy::Ignore);
        let id = fixture.ids[0];
        reset(fixture.clients.remove(0));
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(handler.on_readable(&mut fixture.ctx(), id), Readiness::Drained);
        assert!(!fixture.registry.contains(id));
        assert_eq!(handler.on_readable(&mut fixture.ctx(), id), Readiness::Drained);

        let snapshot = fixture.stats.snapshot();
        assert_eq!(snapshot.connections_closed, 1);
        assert_eq!(snapshot.active_connections, 2);

        // The survivors still relay to each other
        let sender = fixture.ids[1];
        fixture.clients[0].write_all(b"after").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        handler.on_readable(&mut fixture.ctx(), sender);
        assert_eq!(read_exactly(&mut fixture.clients[1], 5), b"after");
    }

    fn failed_write_report(target: ConnectionId) -> FanoutReport {
        FanoutReport {
            recipients: 1,
            bytes_dropped: 4,
            failed: vec![target],
            ..FanoutReport::default()
        }
    }

    #[test]
    fn test_ignore_policy_keeps_failed_target() {
        let mut fixture = Fixture::new(2);
        let handler = ConnectionHandler::new(64, WriteFailurePolicy::Ignore);
        let target = fixture.ids[1];

        handler.settle(&mut fixture.ctx(), failed_write_report(target));
        assert!(fixture.registry.contains(target));

        let snapshot = fixture.stats.snapshot();
        assert_eq!(snapshot.write_failures, 1);
        assert_eq!(snapshot.bytes_dropped, 4);
        assert_eq!(snapshot.connections_closed, 0);
    }

    #[test]
    fn test_disconnect_policy_tears_down_failed_target() {
        let mut fixture = Fixture::new(3);
        let handler = ConnectionHandler::new(64, WriteFailurePolicy::Disconnect);
        let target = fixture.ids[1];

        handler.settle(&mut fixture.ctx(), failed_write_report(target));
        assert!(!fixture.registry.contains(target));
        assert_eq!(fixture.registry.len(), 2);

        // The target's socket was closed by the relay
        let mut buf = [0u8; 4];
        fixture.clients[1]
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(fixture.clients[1].read(&mut buf).unwrap(), 0);

        let snapshot = fixture.stats.snapshot();
        assert_eq!(snapshot.connections_closed, 1);
        assert_eq!(snapshot.active_connections, 2);
    }
}
