//! # hype-core
//!
//! Presence, messaging, friendships and call signaling for the Hype relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Presence** - Track which users are online and where to reach them
//! - **Router** - Persist and deliver direct messages
//! - **Friends** - The request / accept / reject workflow
//! - **Calls** - One-to-one WebRTC signaling relay
//! - **Session** - Per-connection event dispatch
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│     Hub     │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!          ┌─────────────┬───┴─────────┬─────────────┐
//!          ▼             ▼             ▼             ▼
//!     ┌─────────┐   ┌─────────┐   ┌─────────┐   ┌─────────┐
//!     │ Router  │   │ Friends │   │  Calls  │   │Presence │
//!     └─────────┘   └─────────┘   └─────────┘   └─────────┘
//! ```
//!
//! Transports live elsewhere; they authenticate through [`Identity`], open a
//! [`Session`] and forward decoded events to it.

pub mod calls;
pub mod friends;
pub mod handle;
pub mod hub;
pub mod identity;
pub mod memory;
pub mod message;
pub mod presence;
pub mod router;
pub mod session;
pub mod store;
pub mod user;

#[cfg(test)]
mod testing;

pub use calls::{CallCoordinator, CallSession, CallState, OfferOutcome};
pub use friends::{FriendError, FriendGraph};
pub use handle::{SessionHandle, SessionId, DEFAULT_OUTBOUND_CAPACITY};
pub use hub::{Hub, HubConfig, HubStats};
pub use identity::{AuthError, Identity, StoreIdentity};
pub use memory::MemoryStore;
pub use message::{Message, MessageId};
pub use presence::{PresenceRegistry, PresenceStats};
pub use router::{MessageRouter, RouterConfig, RouterError};
pub use session::{Session, SessionError};
pub use store::{FriendEdge, FriendState, FriendStatus, Store, StoreError};
pub use user::{Credentials, User, UserId};
