//! Event types for the Hype protocol.
//!
//! Events are the fundamental unit of communication between a client and the
//! relay. Both directions are closed tagged unions keyed by the `event` field,
//! so adding a new kind is a compile-checked change everywhere it is matched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Handshake carrying the client's credentials. Must be the first event.
    Connect {
        /// Protocol major version spoken by the client.
        version: u8,
        /// Display name to authenticate as.
        username: String,
        /// Opaque access token issued by the login flow.
        token: String,
    },

    /// Direct chat message.
    ChatMessage {
        /// Recipient display name.
        to: String,
        /// Message text.
        body: String,
    },

    /// Message for the ephemeral all-users room.
    DemoMessage {
        /// Message text.
        body: String,
    },

    /// Request the stored conversation with a partner.
    GetHistory {
        /// Partner display name.
        partner: String,
        /// Maximum number of messages to return.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },

    /// Ask another user to become a friend.
    FriendRequest {
        /// Target display name.
        to: String,
    },

    /// Accept a pending request from `from`.
    AcceptFriend {
        /// Original requester.
        from: String,
    },

    /// Reject a pending request from `from`.
    RejectFriend {
        /// Original requester.
        from: String,
    },

    /// Ring another user before negotiating media.
    CallAttempt {
        /// Callee display name.
        to: String,
    },

    /// SDP offer for a new call.
    SdpOffer {
        /// Callee display name.
        to: String,
        /// Opaque session description.
        sdp: Value,
    },

    /// SDP answer to a received offer.
    SdpAnswer {
        /// Caller display name.
        to: String,
        /// Opaque session description.
        sdp: Value,
    },

    /// ICE candidate for an ongoing call.
    IceCandidate {
        /// Call partner display name.
        to: String,
        /// Opaque candidate.
        candidate: Value,
    },

    /// Hang up, cancel or reject a call.
    CallEnd {
        /// Call partner display name.
        to: String,
    },

    /// Keepalive ping.
    Ping {
        /// Optional timestamp echoed in the pong.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Any event kind this relay does not understand.
    #[serde(other)]
    Unknown,
}

impl ClientEvent {
    /// Get the wire name of this event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Connect { .. } => "connect",
            ClientEvent::ChatMessage { .. } => "chat_message",
            ClientEvent::DemoMessage { .. } => "demo_message",
            ClientEvent::GetHistory { .. } => "get_history",
            ClientEvent::FriendRequest { .. } => "friend_request",
            ClientEvent::AcceptFriend { .. } => "accept_friend",
            ClientEvent::RejectFriend { .. } => "reject_friend",
            ClientEvent::CallAttempt { .. } => "call_attempt",
            ClientEvent::SdpOffer { .. } => "sdp_offer",
            ClientEvent::SdpAnswer { .. } => "sdp_answer",
            ClientEvent::IceCandidate { .. } => "ice_candidate",
            ClientEvent::CallEnd { .. } => "call_end",
            ClientEvent::Ping { .. } => "ping",
            ClientEvent::Unknown => "unknown",
        }
    }

    /// Create a Connect event.
    #[must_use]
    pub fn connect(version: u8, username: impl Into<String>, token: impl Into<String>) -> Self {
        ClientEvent::Connect {
            version,
            username: username.into(),
            token: token.into(),
        }
    }

    /// Create a ChatMessage event.
    #[must_use]
    pub fn chat(to: impl Into<String>, body: impl Into<String>) -> Self {
        ClientEvent::ChatMessage {
            to: to.into(),
            body: body.into(),
        }
    }
}

/// One stored message as returned in a history response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Store-assigned message id.
    pub id: i64,
    /// Sender display name.
    pub from: String,
    /// Recipient display name.
    pub to: String,
    /// Message text.
    pub body: String,
    /// Unix milliseconds when the message was persisted.
    pub sent_at: u64,
}

/// Events sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake accepted.
    Connected {
        /// Identifier of this connection.
        session_id: u64,
        /// Authenticated display name.
        username: String,
        /// Negotiated protocol major version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Friend state fetched once at connect time.
    InitialData {
        /// Accepted friends.
        friends: Vec<String>,
        /// Users waiting for this user's answer.
        #[serde(rename = "pendingRequests")]
        pending_requests: Vec<String>,
    },

    /// A chat message, either the sender's echo or a live delivery.
    ReceiveMessage {
        /// Store-assigned message id.
        id: i64,
        /// Sender display name.
        from: String,
        /// Recipient display name.
        to: String,
        /// Message text.
        body: String,
        /// `true` on the copy delivered back to the sender.
        #[serde(rename = "isSelf")]
        is_self: bool,
        /// Unix milliseconds when the message was persisted.
        #[serde(rename = "sentAt")]
        sent_at: u64,
    },

    /// A message from the all-users room.
    ReceiveDemoMessage {
        /// Sender display name.
        from: String,
        /// Message text.
        body: String,
    },

    /// Response to `get_history`.
    MessageHistory {
        /// Partner display name.
        partner: String,
        /// Messages ordered oldest first.
        messages: Vec<HistoryEntry>,
    },

    /// Someone asked to become this user's friend.
    NewFriendRequest {
        /// Requester display name.
        from: String,
    },

    /// A request this user sent was accepted.
    RequestAccepted {
        /// Display name of the user who accepted.
        from: String,
    },

    /// Someone is ringing this user.
    IncomingCall {
        /// Caller display name.
        from: String,
    },

    /// Relayed SDP offer.
    SdpOffer {
        /// Caller display name.
        from: String,
        /// Opaque session description.
        sdp: Value,
    },

    /// Relayed SDP answer.
    SdpAnswer {
        /// Callee display name.
        from: String,
        /// Opaque session description.
        sdp: Value,
    },

    /// Relayed ICE candidate.
    IceCandidate {
        /// Call partner display name.
        from: String,
        /// Opaque candidate.
        candidate: Value,
    },

    /// The call with `from` is over.
    CallEnd {
        /// Call partner display name.
        from: String,
    },

    /// A user came online.
    UserOnline {
        /// Display name.
        username: String,
    },

    /// A user went offline.
    UserOffline {
        /// Display name.
        username: String,
    },

    /// A request failed.
    Error {
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive pong.
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Get the wire name of this event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::InitialData { .. } => "initial_data",
            ServerEvent::ReceiveMessage { .. } => "receive_message",
            ServerEvent::ReceiveDemoMessage { .. } => "receive_demo_message",
            ServerEvent::MessageHistory { .. } => "message_history",
            ServerEvent::NewFriendRequest { .. } => "new_friend_request",
            ServerEvent::RequestAccepted { .. } => "request_accepted",
            ServerEvent::IncomingCall { .. } => "incoming_call",
            ServerEvent::SdpOffer { .. } => "sdp_offer",
            ServerEvent::SdpAnswer { .. } => "sdp_answer",
            ServerEvent::IceCandidate { .. } => "ice_candidate",
            ServerEvent::CallEnd { .. } => "call_end",
            ServerEvent::UserOnline { .. } => "user_online",
            ServerEvent::UserOffline { .. } => "user_offline",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong { .. } => "pong",
        }
    }

    /// Create a new Error event.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a new CallEnd event.
    #[must_use]
    pub fn call_end(from: impl Into<String>) -> Self {
        ServerEvent::CallEnd { from: from.into() }
    }

    /// Create a new Pong event.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerEvent::Pong { timestamp }
    }
}
