//! Listening Socket
//!
//! Owns the bound socket. Each readiness callback accepts exactly one pending
//! connection and hands it to the registry; the event loop calls back again
//! while more are queued.

use std::net::SocketAddr;

use anyhow::Context as _;
use mio::net::{TcpListener, TcpStream};
use mio::Interest;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::event_loop::{EventTarget, Readiness};
use crate::io::would_block;
use crate::relay::Context;
use crate::Result;

pub struct Listener {
    socket: TcpListener,
    local_addr: SocketAddr,
    max_connections: Option<usize>,
}

impl Listener {
    /// Create, configure, bind and listen. Any failure here is fatal to startup.
    pub fn bind(addr: SocketAddr, backlog: u32, max_connections: Option<usize>) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .context("Failed to create listening socket")?;
        socket
            .set_reuse_address(true)
            .context("Failed to set SO_REUSEADDR")?;
        socket
            .set_nonblocking(true)
            .context("Failed to make listening socket non-blocking")?;
        socket
            .bind(&addr.into())
            .with_context(|| format!("Failed to bind to {}", addr))?;
        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        socket
            .listen(backlog)
            .with_context(|| format!("Failed to listen on {}", addr))?;

        let socket = TcpListener::from_std(socket.into());
        let local_addr = socket
            .local_addr()
            .context("Failed to read listener address")?;

        info!("Listening on {} (backlog {})", local_addr, backlog);
        Ok(Self {
            socket,
            local_addr,
            max_connections,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn socket_mut(&mut self) -> &mut TcpListener {
        &mut self.socket
    }

    /// Accept one pending connection, register it and start watching it
    pub fn on_readable(&mut self, ctx: &mut Context<'_>) -> Readiness {
        let (stream, peer_addr) = match self.socket.accept() {
            Ok(accepted) => accepted,
            Err(ref e) if would_block(e) => return Readiness::Drained,
            Err(e) => {
                // One failed accept must not take the relay down
                error!("Accept error: {}", e);
                ctx.stats.record_accept_error();
                return Readiness::Pending;
            }
        };

        info!("Accepted connection from {}", peer_addr);

        if let Some(max) = self.max_connections {
            if ctx.registry.len() >= max {
                warn!(
                    "Connection from {} rejected: limit of {} connections reached",
                    peer_addr, max
                );
                ctx.stats.record_rejected();
                drop(stream);
                return Readiness::Pending;
            }
        }

        self.admit(ctx, stream, peer_addr);
        Readiness::Pending
    }

    fn admit(&self, ctx: &mut Context<'_>, stream: TcpStream, peer_addr: SocketAddr) {
        let id = ctx
            .registry
            .insert_with(|id| Connection::new(id, stream, peer_addr));

        let watched = match ctx.registry.get_mut(id) {
            Some(connection) => ctx.event_loop.watch(
                connection.stream_mut(),
                EventTarget::Connection(id),
                Interest::READABLE,
            ),
            None => return,
        };

        match watched {
            Ok(()) => {
                ctx.stats.record_accept();
                debug!(conn = %id, peer = %peer_addr, "Connection registered");
            }
            Err(e) => {
                // Registered iff watched: never keep a connection the loop cannot see
                error!("Failed to watch connection from {}: {}", peer_addr, e);
                ctx.stats.record_accept_error();
                ctx.registry.remove(id);
            }
        }
    }
}
