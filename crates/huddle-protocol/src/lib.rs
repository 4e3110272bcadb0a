//! # huddle-protocol
//!
//! Event contract for the Huddle chat room engine.
//!
//! This crate defines what travels between clients and the server:
//!
//! - **Room identifiers** - normalization, validation, and random generation
//! - **Events** - tagged client/server events and the validated [`Command`]
//! - **Codec** - JSON for text frames, length-prefixed MessagePack for binary frames
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, ClientEvent, Command};
//!
//! let event: ClientEvent =
//!     codec::decode_json(r#"{"type":"join_room","roomId":"ch-4t"}"#).unwrap();
//!
//! match event.validate().unwrap() {
//!     Command::Join { room, .. } => assert_eq!(room.as_str(), "ch4t"),
//!     _ => unreachable!(),
//! }
//! ```

pub mod codec;
pub mod events;
pub mod room_id;

pub use codec::{decode, encode, Encoding, ProtocolError};
pub use events::{
    clean_content, ChatMessage, ClientEvent, Command, MessageId, Rejection, ServerEvent,
    MAX_CONTENT_CHARS,
};
pub use room_id::{InvalidRoomId, RoomId};
