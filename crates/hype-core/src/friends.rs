//! Friend request workflow.
//!
//! Per unordered pair of users the state machine is:
//!
//! ```text
//!   None ──request(A,B)──▶ Pending(A→B) ──accept(B,A)──▶ Accepted
//!                               │
//!                               └──reject(B,A)──▶ None
//! ```
//!
//! An accepted friendship is stored as two mirrored `accepted` edges, and at
//! most one direction of a pair is ever `pending`. Check-then-write sequences
//! for a pair run under that pair's lock, so two concurrent requests between
//! the same users cannot both pass the checks.

use crate::identity::Identity;
use crate::presence::PresenceRegistry;
use crate::store::{FriendEdge, FriendState, FriendStatus, Store, StoreError};
use crate::user::{User, UserId};
use dashmap::DashMap;
use hype_protocol::ServerEvent;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Friend workflow errors.
#[derive(Debug, Error)]
pub enum FriendError {
    /// The target does not resolve to a known user.
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// A user asked to befriend themselves.
    #[error("Cannot send a friend request to yourself")]
    SelfRequest,

    /// A request was already sent, or the users are already friends.
    #[error("Already requested or already friends")]
    AlreadyRequestedOrFriends,

    /// The target already asked the requester; accept or reject instead.
    #[error("{0} already sent you a request")]
    ReciprocalPending(String),

    /// There is no request to answer.
    #[error("No pending request from {0}")]
    NoPendingRequest(String),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FriendError {
    /// Error code reported to clients.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            FriendError::UnknownUser(_) => 2001,
            FriendError::SelfRequest => 2002,
            FriendError::AlreadyRequestedOrFriends => 2003,
            FriendError::ReciprocalPending(_) => 2004,
            FriendError::NoPendingRequest(_) => 2005,
            FriendError::Store(e) => e.code(),
        }
    }
}

type PairKey = (UserId, UserId);

fn pair_key(a: UserId, b: UserId) -> PairKey {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Holds a pair lock; prunes the lock entry once nobody else wants it.
struct PairGuard<'a> {
    locks: &'a DashMap<PairKey, Arc<Mutex<()>>>,
    key: PairKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PairGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Coordinates friend requests on top of the store.
pub struct FriendGraph {
    store: Arc<dyn Store>,
    identity: Arc<dyn Identity>,
    presence: Arc<PresenceRegistry>,
    locks: DashMap<PairKey, Arc<Mutex<()>>>,
}

impl FriendGraph {
    /// Create a new coordinator.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<dyn Identity>,
        presence: Arc<PresenceRegistry>,
    ) -> Self {
        Self {
            store,
            identity,
            presence,
            locks: DashMap::new(),
        }
    }

    async fn lock_pair(&self, a: UserId, b: UserId) -> PairGuard<'_> {
        let key = pair_key(a, b);
        let lock = self.locks.entry(key).or_default().clone();
        let guard = lock.lock_owned().await;
        PairGuard {
            locks: &self.locks,
            key,
            guard: Some(guard),
        }
    }

    async fn resolve(&self, name: &str) -> Result<User, FriendError> {
        self.identity
            .resolve(name)
            .await?
            .ok_or_else(|| FriendError::UnknownUser(name.to_string()))
    }

    /// `from` asks the user named `to` to become friends.
    ///
    /// Returns the target user. The target is notified if online.
    ///
    /// # Errors
    ///
    /// Preconditions are checked in order and the first failure wins:
    /// [`FriendError::UnknownUser`], [`FriendError::SelfRequest`],
    /// [`FriendError::AlreadyRequestedOrFriends`],
    /// [`FriendError::ReciprocalPending`].
    pub async fn request(&self, from: &User, to: &str) -> Result<User, FriendError> {
        let target = self.resolve(to).await?;
        if target.id == from.id {
            return Err(FriendError::SelfRequest);
        }

        {
            let _pair = self.lock_pair(from.id, target.id).await;

            if self.store.friend_edge(from.id, target.id).await?.is_some() {
                return Err(FriendError::AlreadyRequestedOrFriends);
            }
            if let Some(reverse) = self.store.friend_edge(target.id, from.id).await? {
                if reverse.status == FriendStatus::Pending {
                    return Err(FriendError::ReciprocalPending(target.name));
                }
            }

            self.store
                .upsert_friend_edges(&[FriendEdge::new(from.id, target.id, FriendStatus::Pending)])
                .await?;
        }

        let notified = self.presence.deliver(
            target.id,
            ServerEvent::NewFriendRequest {
                from: from.name.clone(),
            },
        );
        info!(from = %from.name, to = %target.name, notified, "Friend request sent");

        Ok(target)
    }

    /// `recipient` accepts the request sent by the user named `requester`.
    ///
    /// Returns `true` if the friendship was newly established and `false` if
    /// the pair already were friends. The requester is notified if online.
    ///
    /// # Errors
    ///
    /// Returns [`FriendError::UnknownUser`] or
    /// [`FriendError::NoPendingRequest`] when there is nothing to accept.
    pub async fn accept(&self, recipient: &User, requester: &str) -> Result<bool, FriendError> {
        let requester = self.resolve(requester).await?;

        {
            let _pair = self.lock_pair(recipient.id, requester.id).await;

            match self.store.friend_edge(requester.id, recipient.id).await? {
                None => return Err(FriendError::NoPendingRequest(requester.name)),
                Some(edge) if edge.status == FriendStatus::Accepted => {
                    let mirrored = self
                        .store
                        .friend_edge(recipient.id, requester.id)
                        .await?
                        .is_some_and(|e| e.status == FriendStatus::Accepted);
                    if mirrored {
                        debug!(user = %recipient.name, requester = %requester.name, "Already friends");
                        return Ok(false);
                    }
                }
                Some(_) => {}
            }

            self.store
                .upsert_friend_edges(&[
                    FriendEdge::new(requester.id, recipient.id, FriendStatus::Accepted),
                    FriendEdge::new(recipient.id, requester.id, FriendStatus::Accepted),
                ])
                .await?;
        }

        let notified = self.presence.deliver(
            requester.id,
            ServerEvent::RequestAccepted {
                from: recipient.name.clone(),
            },
        );
        info!(user = %recipient.name, requester = %requester.name, notified, "Friend request accepted");

        Ok(true)
    }

    /// `recipient` rejects the request sent by the user named `requester`.
    ///
    /// Silent towards the requester. Returns `false` if nothing was pending;
    /// accepted friendships are never touched.
    ///
    /// # Errors
    ///
    /// Returns [`FriendError::UnknownUser`] for an unknown requester.
    pub async fn reject(&self, recipient: &User, requester: &str) -> Result<bool, FriendError> {
        let requester = self.resolve(requester).await?;

        let removed = {
            let _pair = self.lock_pair(recipient.id, requester.id).await;
            self.store
                .delete_friend_edge(requester.id, recipient.id, FriendStatus::Pending)
                .await?
        };

        debug!(user = %recipient.name, requester = %requester.name, removed, "Friend request rejected");
        Ok(removed)
    }

    /// Friends and pending incoming requests of `user`, read from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn initial_state(&self, user: &User) -> Result<FriendState, StoreError> {
        self.store.query_friend_state(user.id).await
    }

    /// Number of pair locks currently held or awaited.
    #[must_use]
    pub fn active_pairs(&self) -> usize {
        self.locks.len()
    }
}
