//! The shared state of a running relay.
//!
//! A [`Hub`] owns one instance of every coordinator and hands them out to
//! connection sessions. It is built once at startup and shared behind an
//! `Arc`; there is no other global state.

use crate::calls::{CallCoordinator, OfferOutcome};
use crate::friends::FriendGraph;
use crate::handle::SessionId;
use crate::identity::Identity;
use crate::presence::{PresenceRegistry, PresenceStats};
use crate::router::{MessageRouter, RouterConfig};
use crate::store::{Store, StoreError};
use crate::user::User;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of messages returned by one history query.
    pub history_limit: u32,
    /// Heartbeat interval announced to clients, in milliseconds.
    pub heartbeat_interval_ms: u32,
    /// How long a call may stay unanswered. Zero disables expiry.
    pub offer_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            history_limit: RouterConfig::default().history_limit,
            heartbeat_interval_ms: 30_000,
            offer_timeout: Duration::from_secs(60),
        }
    }
}

/// Snapshot of hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Presence counters.
    pub presence: PresenceStats,
    /// Ongoing calls.
    pub calls: usize,
}

/// Owner of the relay's coordinators.
pub struct Hub {
    identity: Arc<dyn Identity>,
    presence: Arc<PresenceRegistry>,
    router: MessageRouter,
    friends: FriendGraph,
    calls: CallCoordinator,
    config: HubConfig,
}

impl Hub {
    /// Wire up a hub over a store and an identity service.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, identity: Arc<dyn Identity>, config: HubConfig) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let router = MessageRouter::new(
            store.clone(),
            identity.clone(),
            presence.clone(),
            RouterConfig {
                history_limit: config.history_limit,
            },
        );
        let friends = FriendGraph::new(store.clone(), identity.clone(), presence.clone());
        let calls = CallCoordinator::new(presence.clone());

        Self {
            identity,
            presence,
            router,
            friends,
            calls,
            config,
        }
    }

    /// Get the presence registry.
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Get the message router.
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Get the friend graph.
    pub fn friends(&self) -> &FriendGraph {
        &self.friends
    }

    /// Get the call coordinator.
    pub fn calls(&self) -> &CallCoordinator {
        &self.calls
    }

    /// Get the identity service.
    pub fn identity(&self) -> &dyn Identity {
        self.identity.as_ref()
    }

    /// Get the configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// `caller` rings the user named `callee`. Unknown names are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the name lookup fails.
    pub async fn ring(&self, caller: &User, callee: &str) -> Result<bool, StoreError> {
        match self.identity.resolve(callee).await? {
            Some(callee) => Ok(self.calls.ring(caller, &callee)),
            None => Ok(false),
        }
    }

    /// `caller` offers a call to the user named `callee`.
    ///
    /// Returns `None` if the callee is unknown; the offer is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the name lookup fails.
    pub async fn offer(
        &self,
        caller: &User,
        callee: &str,
        sdp: Value,
    ) -> Result<Option<OfferOutcome>, StoreError> {
        Ok(self
            .identity
            .resolve(callee)
            .await?
            .map(|callee| self.calls.offer(caller, &callee, sdp)))
    }

    /// `from` ends the call with the user named `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name lookup fails.
    pub async fn end_call(&self, from: &User, to: &str) -> Result<bool, StoreError> {
        match self.identity.resolve(to).await? {
            Some(to) => Ok(self.calls.end(from, &to)),
            None => Ok(false),
        }
    }

    /// Drop the connection `session` of `user`.
    ///
    /// When this was the user's last connection, any call they were in is
    /// ended as if they had hung up. A call placed after the user came back
    /// online survives. Returns `true` if the user went offline.
    pub fn disconnect(&self, user: &User, session: SessionId) -> bool {
        let went_offline = self.presence.unregister(user, session);
        if went_offline {
            let offline_at = Instant::now();
            if let Some(partner) = self.calls.end_all_for(user, offline_at) {
                debug!(user = %user.name, partner = %partner.name, "Call torn down on disconnect");
            }
        }
        went_offline
    }

    /// End calls left unanswered past the configured timeout.
    ///
    /// Returns the number of calls ended.
    pub fn sweep_offers(&self) -> usize {
        if self.config.offer_timeout.is_zero() {
            return 0;
        }
        let expired = self
            .calls
            .expire_stale_offers(Instant::now(), self.config.offer_timeout);
        if expired > 0 {
            info!(expired, "Expired unanswered calls");
        }
        expired
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            presence: self.presence.stats(),
            calls: self.calls.active_calls(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connect, drain, hub, hub_with, user, FlakyStore};
    use hype_protocol::ServerEvent;
    use serde_json::json;

    #[tokio::test]
    async fn test_offer_resolves_names() {
        let (store, hub) = hub();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let (_b, mut bob_rx) = connect(&hub, &bob);

        assert_eq!(hub.offer(&alice, "ghost", json!("sdp")).await.unwrap(), None);
        assert_eq!(
            hub.offer(&alice, "bob", json!("sdp")).await.unwrap(),
            Some(OfferOutcome::Forwarded)
        );
        assert_eq!(drain(&mut bob_rx).len(), 1);
        assert_eq!(hub.stats().calls, 1);

        assert!(hub.end_call(&bob, "alice").await.unwrap());
        assert!(!hub.end_call(&bob, "ghost").await.unwrap());
        assert_eq!(hub.stats().calls, 0);
    }

    #[tokio::test]
    async fn test_disconnect_ends_call_only_when_offline() {
        let (store, hub) = hub();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let (phone, _phone_rx) = connect(&hub, &alice);
        let (laptop, _laptop_rx) = connect(&hub, &alice);
        let (_b, mut bob_rx) = connect(&hub, &bob);

        hub.offer(&alice, "bob", json!("sdp")).await.unwrap();
        drain(&mut bob_rx);

        // Another device is still connected.
        assert!(!hub.disconnect(&alice, phone.id()));
        assert_eq!(hub.stats().calls, 1);

        assert!(hub.disconnect(&alice, laptop.id()));
        assert_eq!(hub.stats().calls, 0);
        assert_eq!(
            drain(&mut bob_rx),
            vec![
                ServerEvent::UserOffline {
                    username: "alice".to_string()
                },
                ServerEvent::call_end("alice"),
            ]
        );
    }

    #[tokio::test]
    async fn test_sweep_respects_disabled_timeout() {
        let store = Arc::new(FlakyStore::default());
        let hub = hub_with(
            store.clone(),
            HubConfig {
                offer_timeout: Duration::ZERO,
                ..HubConfig::default()
            },
        );
        let alice = user(&store, "alice").await;
        user(&store, "bob").await;

        hub.offer(&alice, "bob", json!("sdp")).await.unwrap();
        assert_eq!(hub.sweep_offers(), 0);
        assert_eq!(hub.stats().calls, 1);
    }

    #[tokio::test]
    async fn test_sweep_expires_old_offers() {
        let store = Arc::new(FlakyStore::default());
        let hub = hub_with(
            store.clone(),
            HubConfig {
                offer_timeout: Duration::from_millis(5),
                ..HubConfig::default()
            },
        );
        let alice = user(&store, "alice").await;
        user(&store, "bob").await;
        let (_a, mut alice_rx) = connect(&hub, &alice);
        hub.offer(&alice, "bob", json!("sdp")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.sweep_offers(), 1);
        assert_eq!(drain(&mut alice_rx), vec![ServerEvent::call_end("bob")]);
        assert_eq!(hub.stats().calls, 0);
    }
}
