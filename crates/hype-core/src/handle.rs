//! Outbound session handles.
//!
//! Every live connection owns a bounded queue of [`ServerEvent`]s. Other
//! components hold a cloned [`SessionHandle`] and push into it without ever
//! waiting, so one slow client cannot stall delivery to anybody else.

use hype_protocol::ServerEvent;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Default outbound queue capacity per session.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Atomic counter for session identifiers.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Generate a process-unique session identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess_{}", self.0)
    }
}

/// Routing target for events destined to one connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    sender: mpsc::Sender<ServerEvent>,
}

impl SessionHandle {
    /// Wrap an existing sender.
    #[must_use]
    pub fn new(id: SessionId, sender: mpsc::Sender<ServerEvent>) -> Self {
        Self { id, sender }
    }

    /// Create a handle with a fresh id and the receiving end of its queue.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(SessionId::generate(), sender), receiver)
    }

    /// Get the session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue an event for the connection without waiting.
    ///
    /// Returns `false` if the queue is full or the connection is gone; the
    /// event is dropped in both cases.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(session = %self.id, event = event.kind(), "Outbound queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                trace!(session = %self.id, event = event.kind(), "Session closed, dropping event");
                false
            }
        }
    }

    /// Check whether the receiving side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
