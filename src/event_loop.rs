//! Event Loop Adapter
//!
//! Thin layer over `mio::Poll`. Callers register interest per [`EventTarget`]
//! and get back a batch of ready targets from [`EventLoop::wait`].
//!
//! mio reports readiness edge-triggered. The relay's handlers are written
//! against level-triggered semantics instead: a handler that stops before the
//! source would block reports [`Readiness::Pending`], and the target is handed
//! out again on the next `wait` without blocking.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::trace;

use crate::connection::ConnectionId;

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);

/// First token value available for connections
pub const FIRST_CONNECTION_TOKEN: usize = 2;

/// What a readiness notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Listener,
    Connection(ConnectionId),
    Waker,
}

impl EventTarget {
    fn token(self) -> Token {
        match self {
            EventTarget::Listener => LISTENER_TOKEN,
            EventTarget::Waker => WAKER_TOKEN,
            EventTarget::Connection(id) => Token(id.as_usize()),
        }
    }

    fn from_token(token: Token) -> Self {
        match token {
            LISTENER_TOKEN => EventTarget::Listener,
            WAKER_TOKEN => EventTarget::Waker,
            Token(n) => EventTarget::Connection(ConnectionId(n)),
        }
    }
}

/// Reported by a callback after it ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The source would block now, or is gone
    Drained,
    /// The callback stopped early; more work is waiting
    Pending,
}

pub struct EventLoop {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    pending: Vec<EventTarget>,
    seen: HashSet<EventTarget>,
}

impl EventLoop {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(event_capacity),
            waker,
            pending: Vec::new(),
            seen: HashSet::new(),
        })
    }

    /// Start watching `source` for the given interest
    pub fn watch<S>(&self, source: &mut S, target: EventTarget, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        trace!(?target, "watch");
        self.poll.registry().register(source, target.token(), interest)
    }

    /// Stop watching `source`; no further readiness is reported for `target`
    pub fn unwatch<S>(&mut self, source: &mut S, target: EventTarget) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        trace!(?target, "unwatch");
        self.pending.retain(|t| *t != target);
        self.poll.registry().deregister(source)
    }

    /// Mark `target` as still ready so the next `wait` returns it immediately
    pub fn rearm(&mut self, target: EventTarget) {
        if !self.pending.contains(&target) {
            self.pending.push(target);
        }
    }

    /// Handle that interrupts a blocked `wait` from another thread
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Block until something is ready (or `timeout` passes) and fill `ready`
    /// with the targets to dispatch, in notification order followed by any
    /// rearmed targets. Never blocks while rearmed targets are outstanding.
    pub fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<EventTarget>) -> io::Result<()> {
        ready.clear();
        let timeout = if self.pending.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        self.seen.clear();
        let notified = self
            .events
            .iter()
            .map(|event| EventTarget::from_token(event.token()));
        for target in notified.chain(self.pending.drain(..)) {
            if self.seen.insert(target) {
                ready.push(target);
            }
        }
        Ok(())
    }
}
