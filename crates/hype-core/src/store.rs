//! Durable store boundary.
//!
//! The relay keeps users, messages and friendship edges in a [`Store`]. The
//! trait is intentionally thin: it holds no business rules, those live in the
//! coordinators that call it.

use crate::message::Message;
use crate::user::{User, UserId};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A referenced record does not exist.
    #[error("Record not found")]
    NotFound,
}

impl StoreError {
    /// Error code reported to clients.
    #[must_use]
    pub fn code(&self) -> u16 {
        5000
    }
}

/// Status of a directed friend edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FriendStatus {
    /// A request is waiting for the target's answer.
    Pending,
    /// The friendship is established.
    Accepted,
}

impl FriendStatus {
    /// Get the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendStatus::Pending => "pending",
            FriendStatus::Accepted => "accepted",
        }
    }
}

impl fmt::Display for FriendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FriendStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FriendStatus::Pending),
            "accepted" => Ok(FriendStatus::Accepted),
            other => Err(StoreError::Backend(format!("invalid friend status {other:?}"))),
        }
    }
}

/// A directed friendship record keyed by `(from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FriendEdge {
    /// User who expressed the intent.
    pub from: UserId,
    /// User the intent is directed at.
    pub to: UserId,
    /// Current status.
    pub status: FriendStatus,
}

impl FriendEdge {
    /// Create a new edge.
    #[must_use]
    pub fn new(from: UserId, to: UserId, status: FriendStatus) -> Self {
        Self { from, to, status }
    }
}

/// Friend state of one user, as pushed to a client at connect time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FriendState {
    /// Users `X` with an accepted edge `(user, X)`, ordered by name.
    pub friends: Vec<User>,
    /// Users `X` with a pending edge `(X, user)`, ordered by name.
    pub pending_incoming: Vec<User>,
}

/// Persistence for users, messages and friendship edges.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a user with a unique display name and an access token.
    ///
    /// Fails with [`StoreError::Conflict`] if the name is taken.
    async fn insert_user(&self, name: &str, token: &str) -> Result<User, StoreError>;

    /// Look a user up by display name.
    async fn user_by_name(&self, name: &str) -> Result<Option<User>, StoreError>;

    /// Look a user up by identifier.
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Return the user if `token` matches the one stored for `name`.
    async fn verify_token(&self, name: &str, token: &str) -> Result<Option<User>, StoreError>;

    /// Append a message. The returned message carries the assigned id.
    async fn insert_message(
        &self,
        from: &User,
        to: &User,
        body: &str,
        sent_at: u64,
    ) -> Result<Message, StoreError>;

    /// The most recent `limit` messages exchanged between `a` and `b`,
    /// oldest first.
    async fn query_history(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError>;

    /// Fetch the edge `(from, to)` if present.
    async fn friend_edge(&self, from: UserId, to: UserId)
        -> Result<Option<FriendEdge>, StoreError>;

    /// Insert or update all given edges atomically.
    async fn upsert_friend_edges(&self, edges: &[FriendEdge]) -> Result<(), StoreError>;

    /// Delete the edge `(from, to)` if it has the given status.
    ///
    /// Returns `true` if an edge was removed.
    async fn delete_friend_edge(
        &self,
        from: UserId,
        to: UserId,
        status: FriendStatus,
    ) -> Result<bool, StoreError>;

    /// Friends and pending incoming requests of `user`.
    async fn query_friend_state(&self, user: UserId) -> Result<FriendState, StoreError>;
}
