//! Graceful Shutdown Handling
//!
//! The relay loop runs on its own thread and blocks in `poll`. A
//! [`ShutdownHandle`] flips a flag and wakes that poll; the
//! [`ShutdownCoordinator`] fires the handle on SIGTERM/SIGINT/Ctrl+C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::Waker;
use tokio::signal;
use tracing::{info, warn};

use crate::Result;

/// Cloneable trigger that asks a running relay to stop
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn new(waker: Arc<Waker>) -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            waker,
        }
    }

    /// Request shutdown. Safe to call from any thread, any number of times.
    pub fn shutdown(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.waker.wake() {
            warn!("Failed to wake relay loop for shutdown: {}", e);
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Translates process signals into a relay shutdown
pub struct ShutdownCoordinator {
    handle: ShutdownHandle,
}

impl ShutdownCoordinator {
    pub fn new(handle: ShutdownHandle) -> Self {
        Self { handle }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, then trigger the shutdown handle
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.handle.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll, Token};
    use std::time::Duration;

    #[test]
    fn test_shutdown_wakes_poll() {
        let mut poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(1)).unwrap());
        let handle = ShutdownHandle::new(waker);
        assert!(!handle.is_requested());

        let remote = handle.clone();
        let thread = std::thread::spawn(move || remote.shutdown());

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        thread.join().unwrap();

        assert!(handle.is_requested());
        assert_eq!(events.iter().next().map(|e| e.token()), Some(Token(1)));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(1)).unwrap());
        let handle = ShutdownHandle::new(waker);

        handle.shutdown();
        handle.shutdown();
        assert!(handle.is_requested());
        assert!(handle.clone().is_requested());
    }
}
