//! # hype-protocol
//!
//! Wire protocol definitions for the Hype realtime relay.
//!
//! This crate defines the events exchanged between browser clients and the
//! relay, the codecs used to put them on a WebSocket, and versioning.
//!
//! ## Event families
//!
//! - `chat_message` / `receive_message` - Direct messages
//! - `friend_request` / `accept_friend` / `reject_friend` - Friend workflow
//! - `sdp_offer` / `sdp_answer` / `ice_candidate` / `call_end` - Call signaling
//! - `user_online` / `user_offline` - Presence
//!
//! ## Example
//!
//! ```rust
//! use hype_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::chat("bob", "hi");
//!
//! let text = codec::encode_text(&event).unwrap();
//! let decoded: ClientEvent = codec::decode_text(&text).unwrap();
//! assert_eq!(decoded, event);
//! ```

pub mod codec;
pub mod events;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use events::{ClientEvent, HistoryEntry, ServerEvent};
pub use version::{Version, PROTOCOL_VERSION};
