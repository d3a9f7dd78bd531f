//! Connection Module
//!
//! Per-peer state, the live-connection registry and the read handler.

pub mod handler;
pub mod registry;

pub use handler::ConnectionHandler;
pub use registry::{Cursor, Registry};

use std::fmt;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::TcpStream;

use crate::io::{ReadOutcome, WriteOutcome};

/// Identity of a live connection. Allocated once, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub(crate) usize);

impl ConnectionId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// One accepted peer. The socket is closed when the value is dropped,
/// which only happens once it has left the registry.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    peer_addr: SocketAddr,
    connected_at: Instant,
    last_activity: Instant,
    bytes_received: u64,
    bytes_sent: u64,
}

impl Connection {
    pub fn new(id: ConnectionId, stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id,
            stream,
            peer_addr,
            connected_at: now,
            last_activity: now,
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Time since the connection was accepted
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Time since the peer last sent anything
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Socket handle, for registering with the event loop
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// One non-blocking read into `buf`
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> ReadOutcome {
        let outcome = ReadOutcome::classify(self.stream.read(buf));
        if let ReadOutcome::Data(n) = outcome {
            self.bytes_received += n as u64;
            self.last_activity = Instant::now();
        }
        outcome
    }

    /// One best-effort, non-blocking write of `data`. Short writes are not retried.
    pub fn send(&mut self, data: &[u8]) -> WriteOutcome {
        let outcome = loop {
            match self.stream.write(data) {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                result => break WriteOutcome::classify(result, data.len()),
            }
        };
        self.bytes_sent += (data.len() - outcome.dropped(data.len())) as u64;
        outcome
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A relay-side `Connection` plus the std client socket on the other end.
    pub fn connection_pair(id: usize) -> (Connection, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, peer_addr) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let stream = TcpStream::from_std(accepted);
        (Connection::new(ConnectionId(id), stream, peer_addr), client)
    }

    /// Close `client` with an RST instead of a FIN
    pub fn reset(client: std::net::TcpStream) {
        socket2::SockRef::from(&client)
            .set_linger(Some(Duration::ZERO))
            .unwrap();
        drop(client);
    }
}
