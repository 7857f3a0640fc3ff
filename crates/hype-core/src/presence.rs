//! Presence tracking for Hype.
//!
//! The registry maps each user to the set of their live connections. A user
//! is online while that set is non-empty; directed events go to the most
//! recently registered connection.

use crate::handle::{SessionHandle, SessionId};
use crate::message::now_millis;
use crate::user::{User, UserId};
use dashmap::DashMap;
use hype_protocol::ServerEvent;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// One live connection of a user.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    /// The connected user.
    pub user: User,
    /// Routing target for the connection.
    pub handle: SessionHandle,
    /// Unix milliseconds when the connection registered.
    pub connected_at: u64,
}

impl PresenceEntry {
    /// Create a new entry stamped with the current time.
    #[must_use]
    pub fn new(user: User, handle: SessionHandle) -> Self {
        Self {
            user,
            handle,
            connected_at: now_millis(),
        }
    }
}

/// Presence statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceStats {
    /// Users with at least one connection.
    pub online_users: usize,
    /// Live connections across all users.
    pub sessions: usize,
}

/// Registry of live connections, the single source of truth for "online".
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// Entries per user, oldest first.
    users: DashMap<UserId, Vec<PresenceEntry>>,
    /// Held across a register/unregister and its broadcast, so peers see
    /// online/offline transitions in the order they happened.
    transitions: Mutex<()>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a live connection for `user`.
    ///
    /// Returns `true` if the user just came online, in which case every
    /// other online user is sent `user_online`. Registering a handle that is
    /// already present changes nothing.
    pub fn register(&self, user: &User, handle: SessionHandle) -> bool {
        let _transition = self.transition();
        let came_online = {
            let mut entries = self.users.entry(user.id).or_default();
            if entries.iter().any(|e| e.handle.id() == handle.id()) {
                return false;
            }
            let was_empty = entries.is_empty();
            entries.push(PresenceEntry::new(user.clone(), handle));
            was_empty
        };

        debug!(user = %user.name, came_online, "Presence: session registered");

        if came_online {
            info!(user = %user.name, "User online");
            self.broadcast_except(
                user.id,
                ServerEvent::UserOnline {
                    username: user.name.clone(),
                },
            );
        }

        came_online
    }

    /// Remove the connection `session` of `user`.
    ///
    /// Returns `true` if this was the user's last connection, in which case
    /// every remaining online user is sent `user_offline`.
    pub fn unregister(&self, user: &User, session: SessionId) -> bool {
        let _transition = self.transition();
        let mut removed = false;
        let went_offline = self
            .users
            .remove_if_mut(&user.id, |_, entries| {
                let before = entries.len();
                entries.retain(|e| e.handle.id() != session);
                removed = entries.len() != before;
                entries.is_empty()
            })
            .is_some();

        if !removed {
            return false;
        }

        debug!(user = %user.name, session = %session, went_offline, "Presence: session unregistered");

        if went_offline {
            info!(user = %user.name, "User offline");
            self.broadcast_except(
                user.id,
                ServerEvent::UserOffline {
                    username: user.name.clone(),
                },
            );
        }

        went_offline
    }

    /// Current routing target for `user`: the most recent connection whose
    /// socket task is still draining its queue.
    #[must_use]
    pub fn lookup(&self, user: UserId) -> Option<SessionHandle> {
        self.users.get(&user).and_then(|entries| {
            entries
                .iter()
                .rev()
                .find(|e| !e.handle.is_closed())
                .map(|e| e.handle.clone())
        })
    }

    /// Check if a user has at least one live connection.
    #[must_use]
    pub fn is_online(&self, user: UserId) -> bool {
        self.users.get(&user).is_some_and(|entries| !entries.is_empty())
    }

    /// Number of live connections of a user.
    #[must_use]
    pub fn session_count(&self, user: UserId) -> usize {
        self.users.get(&user).map(|e| e.len()).unwrap_or(0)
    }

    /// Deliver an event to the current routing target of `user`.
    ///
    /// Returns `false` if the user is offline or the event was dropped.
    pub fn deliver(&self, user: UserId, event: ServerEvent) -> bool {
        match self.lookup(user) {
            Some(handle) => handle.deliver(event),
            None => false,
        }
    }

    /// All online users, ordered by name.
    #[must_use]
    pub fn online_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter_map(|entries| entries.first().map(|e| e.user.clone()))
            .collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }

    /// Deliver an event to every live connection.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        self.fan_out(None, event)
    }

    /// Deliver an event to every live connection of every user except `user`.
    pub fn broadcast_except(&self, user: UserId, event: ServerEvent) -> usize {
        self.fan_out(Some(user), event)
    }

    fn fan_out(&self, skip: Option<UserId>, event: ServerEvent) -> usize {
        let handles: Vec<SessionHandle> = self
            .users
            .iter()
            .filter(|entry| Some(*entry.key()) != skip)
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|e| e.handle.clone())
                    .collect::<Vec<_>>()
            })
            .collect();

        handles
            .iter()
            .filter(|handle| handle.deliver(event.clone()))
            .count()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> PresenceStats {
        PresenceStats {
            online_users: self.users.len(),
            sessions: self.users.iter().map(|e| e.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_register_unregister() {
        let presence = PresenceRegistry::new();
        let alice = User::new(1, "alice");
        let (handle, _rx) = SessionHandle::channel(8);
        let session = handle.id();

        assert!(presence.register(&alice, handle.clone()));
        assert!(!presence.register(&alice, handle)); // Already present
        assert!(presence.is_online(alice.id));
        assert_eq!(presence.session_count(alice.id), 1);

        assert!(presence.unregister(&alice, session));
        assert!(!presence.is_online(alice.id));
        assert!(!presence.unregister(&alice, session));
    }

    #[test]
    fn test_online_notification_fires_once() {
        let presence = PresenceRegistry::new();
        let alice = User::new(1, "alice");
        let bob = User::new(2, "bob");

        let (bob_handle, mut bob_rx) = SessionHandle::channel(8);
        presence.register(&bob, bob_handle);

        let (phone, _phone_rx) = SessionHandle::channel(8);
        let (laptop, _laptop_rx) = SessionHandle::channel(8);
        assert!(presence.register(&alice, phone));
        assert!(!presence.register(&alice, laptop));

        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::UserOnline {
                username: "alice".to_string()
            }]
        );
    }

    #[test]
    fn test_multi_device_routing_and_offline() {
        let presence = PresenceRegistry::new();
        let alice = User::new(1, "alice");
        let bob = User::new(2, "bob");

        let (bob_handle, mut bob_rx) = SessionHandle::channel(8);
        presence.register(&bob, bob_handle);

        let (phone, _phone_rx) = SessionHandle::channel(8);
        let (laptop, _laptop_rx) = SessionHandle::channel(8);
        let (phone_id, laptop_id) = (phone.id(), laptop.id());
        presence.register(&alice, phone);
        presence.register(&alice, laptop);

        assert_eq!(presence.lookup(alice.id).unwrap().id(), laptop_id);

        assert!(!presence.unregister(&alice, laptop_id));
        assert_eq!(presence.lookup(alice.id).unwrap().id(), phone_id);

        assert!(presence.unregister(&alice, phone_id));
        assert!(presence.lookup(alice.id).is_none());

        let events = drain(&mut bob_rx);
        assert_eq!(
            events.last(),
            Some(&ServerEvent::UserOffline {
                username: "alice".to_string()
            })
        );
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_lookup_skips_closed_connection() {
        let presence = PresenceRegistry::new();
        let alice = User::new(1, "alice");

        let (phone, mut phone_rx) = SessionHandle::channel(8);
        let (laptop, laptop_rx) = SessionHandle::channel(8);
        let phone_id = phone.id();
        presence.register(&alice, phone);
        presence.register(&alice, laptop);

        // The laptop's socket task is gone but has not unregistered yet.
        drop(laptop_rx);
        assert_eq!(presence.lookup(alice.id).unwrap().id(), phone_id);
        assert!(presence.deliver(alice.id, ServerEvent::pong(None)));
        assert_eq!(drain(&mut phone_rx), vec![ServerEvent::pong(None)]);

        drop(phone_rx);
        assert!(presence.lookup(alice.id).is_none());
        assert!(presence.is_online(alice.id));
    }

    #[test]
    fn test_broadcast_and_stats() {
        let presence = PresenceRegistry::new();
        let (h1, mut rx1) = SessionHandle::channel(8);
        let (h2, mut rx2) = SessionHandle::channel(8);
        presence.register(&User::new(1, "alice"), h1);
        presence.register(&User::new(2, "bob"), h2);
        drain(&mut rx1);

        assert_eq!(presence.broadcast(ServerEvent::pong(None)), 2);
        assert_eq!(drain(&mut rx1), vec![ServerEvent::pong(None)]);
        assert_eq!(drain(&mut rx2), vec![ServerEvent::pong(None)]);

        let stats = presence.stats();
        assert_eq!(stats.online_users, 2);
        assert_eq!(stats.sessions, 2);
        assert_eq!(
            presence
                .online_users()
                .into_iter()
                .map(|u| u.name)
                .collect::<Vec<_>>(),
            vec!["alice", "bob"]
        );
    }

    #[test]
    fn test_reconnect_race_ends_online() {
        use std::sync::Barrier;

        let presence = PresenceRegistry::new();
        let alice = User::new(1, "alice");
        let bob = User::new(2, "bob");
        let (bob_handle, mut bob_rx) = SessionHandle::channel(64);
        presence.register(&bob, bob_handle);

        let (first, _first_rx) = SessionHandle::channel(8);
        presence.register(&alice, first.clone());
        drain(&mut bob_rx);
        let mut current = first;

        for _ in 0..200 {
            let (next, _next_rx) = SessionHandle::channel(8);
            let barrier = Barrier::new(2);
            std::thread::scope(|s| {
                s.spawn(|| {
                    barrier.wait();
                    presence.unregister(&alice, current.id());
                });
                s.spawn(|| {
                    barrier.wait();
                    presence.register(&alice, next.clone());
                });
            });
            current = next;

            assert!(presence.is_online(alice.id));
            if let Some(last) = drain(&mut bob_rx).last() {
                assert_eq!(
                    last,
                    &ServerEvent::UserOnline {
                        username: "alice".to_string()
                    }
                );
            }
        }
    }
}
