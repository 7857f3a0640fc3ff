//! Direct message routing for Hype.
//!
//! Every message is persisted before anything is delivered. Live delivery to
//! an online recipient is best-effort on top of that; an offline recipient
//! finds the message through history on their next fetch.

use crate::handle::SessionHandle;
use crate::identity::Identity;
use crate::message::{now_millis, Message};
use crate::presence::PresenceRegistry;
use crate::store::{Store, StoreError};
use crate::user::User;
use hype_protocol::ServerEvent;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The recipient does not resolve to a known user.
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    /// The message could not be persisted and counts as not sent.
    #[error("Delivery unconfirmed: {0}")]
    DeliveryUnconfirmed(#[source] StoreError),

    /// History could not be read.
    #[error("History unavailable: {0}")]
    History(#[source] StoreError),
}

impl RouterError {
    /// Error code reported to clients.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            RouterError::RecipientNotFound(_) => 3001,
            RouterError::DeliveryUnconfirmed(_) => 3002,
            RouterError::History(e) => e.code(),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of messages returned by one history query.
    pub history_limit: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { history_limit: 200 }
    }
}

/// Persists and delivers direct messages.
pub struct MessageRouter {
    store: Arc<dyn Store>,
    identity: Arc<dyn Identity>,
    presence: Arc<PresenceRegistry>,
    config: RouterConfig,
}

impl MessageRouter {
    /// Create a new router.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<dyn Identity>,
        presence: Arc<PresenceRegistry>,
        config: RouterConfig,
    ) -> Self {
        Self {
            store,
            identity,
            presence,
            config,
        }
    }

    /// Send a direct message from `from` to the user named `to`.
    ///
    /// The sender's echo goes to `origin` when given, otherwise to the
    /// sender's current connection. Returns the persisted message.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::RecipientNotFound`] for an unknown recipient
    /// and [`RouterError::DeliveryUnconfirmed`] if persistence fails. Nothing
    /// is delivered in either case.
    pub async fn send(
        &self,
        from: &User,
        origin: Option<&SessionHandle>,
        to: &str,
        body: &str,
    ) -> Result<Message, RouterError> {
        let recipient = self
            .identity
            .resolve(to)
            .await
            .map_err(RouterError::DeliveryUnconfirmed)?
            .ok_or_else(|| RouterError::RecipientNotFound(to.to_string()))?;

        let message = self
            .store
            .insert_message(from, &recipient, body, now_millis())
            .await
            .map_err(|e| {
                warn!(from = %from.name, to = %recipient.name, error = %e, "Message not persisted");
                RouterError::DeliveryUnconfirmed(e)
            })?;

        let echo = message.delivery(true);
        let echoed = match origin {
            Some(handle) => handle.deliver(echo),
            None => self.presence.deliver(from.id, echo),
        };

        // A note to self is rendered once, through the echo.
        let delivered = recipient.id != from.id
            && self
                .presence
                .deliver(recipient.id, message.delivery(false));

        debug!(
            id = message.id,
            from = %from.name,
            to = %recipient.name,
            echoed,
            delivered,
            "Message routed"
        );

        Ok(message)
    }

    /// Messages exchanged between `requester` and the user named `partner`,
    /// oldest first.
    ///
    /// At most `limit` messages are returned, capped by the configured
    /// history limit; the most recent ones win.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::RecipientNotFound`] for an unknown partner and
    /// [`RouterError::History`] if the store fails.
    pub async fn history(
        &self,
        requester: &User,
        partner: &str,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, RouterError> {
        let partner = self
            .identity
            .resolve(partner)
            .await
            .map_err(RouterError::History)?
            .ok_or_else(|| RouterError::RecipientNotFound(partner.to_string()))?;

        let max = self.config.history_limit.max(1);
        let limit = limit.unwrap_or(max).clamp(1, max);

        let messages = self
            .store
            .query_history(requester.id, partner.id, limit)
            .await
            .map_err(RouterError::History)?;

        trace!(user = %requester.name, partner = %partner.name, count = messages.len(), "History fetched");
        Ok(messages)
    }

    /// Fan a message out to everyone in the demo room, sender included.
    ///
    /// Demo traffic is never persisted. Returns the number of connections
    /// the message was queued for.
    pub fn broadcast_demo(&self, from: &User, body: &str) -> usize {
        let count = self.presence.broadcast(ServerEvent::ReceiveDemoMessage {
            from: from.name.clone(),
            body: body.to_string(),
        });
        trace!(from = %from.name, recipients = count, "Demo message broadcast");
        count
    }
}
