//! Relay Server
//!
//! Owns the listener, the registry and the event loop, and runs the
//! single-threaded dispatch loop. Every callback runs to completion on the
//! thread that called [`RelayServer::run`], so none of the state needs locking.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use mio::Interest;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::{ConnectionHandler, Registry};
use crate::event_loop::{EventLoop, EventTarget, Readiness, FIRST_CONNECTION_TOKEN};
use crate::listener::Listener;
use crate::relay::{Context, DisconnectReason, RelayStats};
use crate::shutdown::ShutdownHandle;
use crate::Result;

/// How often idle connections are looked for, when an idle timeout is set
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct RelayServer {
    event_loop: EventLoop,
    listener: Option<Listener>,
    local_addr: SocketAddr,
    registry: Registry,
    handler: ConnectionHandler,
    stats: Arc<RelayStats>,
    shutdown: ShutdownHandle,
    idle_timeout: Option<Duration>,
}

impl RelayServer {
    /// Bind the listening socket and prepare the event loop.
    /// Failures here are startup failures and are returned to the caller.
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        let event_loop =
            EventLoop::new(config.event_capacity).context("Failed to create event loop")?;
        let mut listener =
            Listener::bind(config.bind_addr, config.backlog, config.max_connections)?;
        event_loop
            .watch(listener.socket_mut(), EventTarget::Listener, Interest::READABLE)
            .context("Failed to watch listening socket")?;

        let shutdown = ShutdownHandle::new(event_loop.waker());
        let handler = ConnectionHandler::new(config.buffer_size, config.write_failure_policy);

        Ok(Self {
            local_addr: listener.local_addr(),
            listener: Some(listener),
            event_loop,
            registry: Registry::new(FIRST_CONNECTION_TOKEN),
            handler,
            stats: Arc::new(RelayStats::new()),
            shutdown,
            idle_timeout: config.idle_timeout,
        })
    }

    /// Address the relay actually listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Run until shutdown is requested. Blocks the calling thread.
    pub fn run(&mut self) -> Result<()> {
        info!(
            "Relay running on {} (write failure policy: {})",
            self.local_addr,
            self.handler.policy()
        );

        let mut ready = Vec::new();
        let mut last_sweep = Instant::now();
        let poll_timeout = self.idle_timeout.map(|_| IDLE_SWEEP_INTERVAL);

        while !self.shutdown.is_requested() {
            self.event_loop
                .wait(poll_timeout, &mut ready)
                .context("Event loop poll failed")?;

            for target in ready.drain(..) {
                if self.dispatch(target) == Readiness::Pending {
                    self.event_loop.rearm(target);
                }
            }

            if let Some(idle_timeout) = self.idle_timeout {
                if last_sweep.elapsed() >= IDLE_SWEEP_INTERVAL {
                    self.sweep_idle(idle_timeout);
                    last_sweep = Instant::now();
                }
            }
        }

        self.close_all();
        Ok(())
    }

    fn dispatch(&mut self, target: EventTarget) -> Readiness {
        let mut ctx = Context {
            registry: &mut self.registry,
            event_loop: &mut self.event_loop,
            stats: &self.stats,
        };

        match target {
            EventTarget::Waker => Readiness::Drained,
            EventTarget::Listener => match self.listener.as_mut() {
                Some(listener) => listener.on_readable(&mut ctx),
                None => Readiness::Drained,
            },
            EventTarget::Connection(id) => {
                if !ctx.registry.contains(id) {
                    // Torn down earlier in this batch
                    debug!(conn = %id, "Dropping event for closed connection");
                    return Readiness::Drained;
                }
                self.handler.on_readable(&mut ctx, id)
            }
        }
    }

    fn sweep_idle(&mut self, idle_timeout: Duration) {
        let now = Instant::now();
        let expired: Vec<_> = self
            .registry
            .iter()
            .filter(|c| c.idle_for(now) >= idle_timeout)
            .map(|c| c.id())
            .collect();

        if expired.is_empty() {
            return;
        }

        debug!("Closing {} idle connections", expired.len());
        let mut ctx = Context {
            registry: &mut self.registry,
            event_loop: &mut self.event_loop,
            stats: &self.stats,
        };
        for id in expired {
            ctx.teardown(id, DisconnectReason::IdleTimeout);
        }
    }

    /// Stop accepting, then tear down every live connection
    fn close_all(&mut self) {
        info!("Shutting down relay on {}", self.local_addr);

        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self
                .event_loop
                .unwatch(listener.socket_mut(), EventTarget::Listener)
            {
                warn!("Failed to stop watching listener: {}", e);
            }
        }

        let mut ctx = Context {
            registry: &mut self.registry,
            event_loop: &mut self.event_loop,
            stats: &self.stats,
        };
        let mut cursor = ctx.registry.cursor();
        while let Some(connection) = ctx.registry.advance(&mut cursor) {
            let id = connection.id();
            ctx.teardown(id, DisconnectReason::Shutdown);
        }

        self.stats.log_summary();
    }
}
