//! Chat Relay Library
//!
//! A single-room TCP broadcast relay. Every byte received from one connected
//! peer is written, in order, to every other connected peer.
//!
//! The relay runs on one thread over a readiness-based event loop (mio):
//! the listener accepts peers into the registry, the connection handler
//! drains readable peers and fans each chunk out to the rest.

pub mod config;
pub mod connection;
pub mod event_loop;
pub mod io;
pub mod listener;
pub mod relay;
pub mod server;
pub mod shutdown;

pub use config::Config;
pub use connection::{ConnectionId, Registry};
pub use relay::{RelayStats, StatsSnapshot};
pub use server::RelayServer;
pub use shutdown::{ShutdownCoordinator, ShutdownHandle};

/// Common error type for the relay
pub type Result<T> = anyhow::Result<T>;
