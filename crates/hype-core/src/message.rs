//! Chat message types.

use crate::user::User;
use hype_protocol::{HistoryEntry, ServerEvent};
use std::time::{SystemTime, UNIX_EPOCH};

/// A store-assigned message identifier.
pub type MessageId = i64;

/// Current wall-clock time in unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A persisted direct message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Sender.
    pub from: User,
    /// Recipient.
    pub to: User,
    /// Message text.
    pub body: String,
    /// Unix milliseconds when the message was persisted.
    pub sent_at: u64,
}

impl Message {
    /// Build the `receive_message` event for this message.
    #[must_use]
    pub fn delivery(&self, is_self: bool) -> ServerEvent {
        ServerEvent::ReceiveMessage {
            id: self.id,
            from: self.from.name.clone(),
            to: self.to.name.clone(),
            body: self.body.clone(),
            is_self,
            sent_at: self.sent_at,
        }
    }

    /// Convert to the wire shape used in history responses.
    #[must_use]
    pub fn to_history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            id: self.id,
            from: self.from.name.clone(),
            to: self.to.name.clone(),
            body: self.body.clone(),
            sent_at: self.sent_at,
        }
    }
}
