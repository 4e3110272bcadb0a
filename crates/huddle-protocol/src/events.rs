//! Event types for the Huddle protocol.
//!
//! Every event on a connection is an internally tagged object
//! (`{"type": "join_room", "roomId": "ch4t"}`). Inbound events arrive as
//! [`ClientEvent`] with untrusted fields and are turned into a typed
//! [`Command`] by [`ClientEvent::validate`] before anything else sees them.

use crate::room_id::RoomId;
use serde::{Deserialize, Serialize};

/// Store-assigned message identifier.
pub type MessageId = u64;

/// Maximum message content length, in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Store-assigned identifier.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Anonymous identifier of the author, if the client supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_session_id: Option<String>,
    /// Message text.
    pub content: String,
    /// Store-assigned creation time, milliseconds since the Unix epoch.
    pub created_at: u64,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join a room, leaving any other room first.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Leave a room.
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },

    /// Post a message to a room.
    #[serde(rename_all = "camelCase")]
    MessageSend {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_session_id: Option<String>,
        content: String,
    },

    /// Start or stop typing in a room.
    #[serde(rename_all = "camelCase")]
    Typing {
        room_id: String,
        sender_session_id: String,
        typing: bool,
    },
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Recent history, oldest first. Sent only to the joining connection.
    RoomJoined { messages: Vec<ChatMessage> },

    /// A newly persisted message. Sent to every member, including the author.
    MessageNew(ChatMessage),

    /// Another member started or stopped typing.
    #[serde(rename_all = "camelCase")]
    TypingUpdate {
        sender_session_id: String,
        typing: bool,
    },
}

impl ServerEvent {
    /// Event name, for logs and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::RoomJoined { .. } => "room_joined",
            ServerEvent::MessageNew(_) => "message_new",
            ServerEvent::TypingUpdate { .. } => "typing_update",
        }
    }

    /// Create a TypingUpdate event.
    #[must_use]
    pub fn typing(sender_session_id: impl Into<String>, typing: bool) -> Self {
        ServerEvent::TypingUpdate {
            sender_session_id: sender_session_id.into(),
            typing,
        }
    }
}

/// A validated client intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join {
        room: RoomId,
        session_id: Option<String>,
    },
    Leave {
        room: RoomId,
    },
    Send {
        room: RoomId,
        session_id: Option<String>,
        content: String,
    },
    Typing {
        room: RoomId,
        session_id: Option<String>,
        typing: bool,
    },
}

impl Command {
    /// Room the command targets.
    #[must_use]
    pub fn room(&self) -> &RoomId {
        match self {
            Command::Join { room, .. }
            | Command::Leave { room }
            | Command::Send { room, .. }
            | Command::Typing { room, .. } => room,
        }
    }
}

/// Why an inbound event was dropped at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The room identifier failed normalization/validation.
    InvalidRoom,
    /// Message content was empty after trimming.
    EmptyContent,
}

impl Rejection {
    /// Reason label, for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::InvalidRoom => "invalid_room",
            Rejection::EmptyContent => "empty_content",
        }
    }
}

/// Trim `content` and cap it at `max_chars` characters.
///
/// Returns `None` if nothing but whitespace remains.
#[must_use]
pub fn clean_content(content: &str, max_chars: usize) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => Some(trimmed[..cut].to_string()),
        None => Some(trimmed.to_string()),
    }
}

/// Empty anonymous ids are treated as absent.
fn session_id(id: Option<String>) -> Option<String> {
    id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ClientEvent {
    /// Event name, for logs and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join_room",
            ClientEvent::LeaveRoom { .. } => "leave_room",
            ClientEvent::MessageSend { .. } => "message_send",
            ClientEvent::Typing { .. } => "typing",
        }
    }

    /// Validate the event into a [`Command`], capping content at [`MAX_CONTENT_CHARS`].
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] reason if the event must be dropped.
    pub fn validate(self) -> Result<Command, Rejection> {
        self.validate_with(MAX_CONTENT_CHARS)
    }

    /// Validate the event into a [`Command`] with a custom content cap.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] reason if the event must be dropped.
    pub fn validate_with(self, max_content_chars: usize) -> Result<Command, Rejection> {
        let parse = |id: &str| RoomId::parse(id).map_err(|_| Rejection::InvalidRoom);

        match self {
            ClientEvent::JoinRoom {
                room_id,
                session_id: sid,
            } => Ok(Command::Join {
                room: parse(&room_id)?,
                session_id: session_id(sid),
            }),
            ClientEvent::LeaveRoom { room_id } => Ok(Command::Leave {
                room: parse(&room_id)?,
            }),
            ClientEvent::MessageSend {
                room_id,
                sender_session_id,
                content,
            } => {
                let room = parse(&room_id)?;
                let content =
                    clean_content(&content, max_content_chars).ok_or(Rejection::EmptyContent)?;
                Ok(Command::Send {
                    room,
                    session_id: session_id(sender_session_id),
                    content,
                })
            }
            ClientEvent::Typing {
                room_id,
                sender_session_id,
                typing,
            } => Ok(Command::Typing {
                room: parse(&room_id)?,
                session_id: session_id(Some(sender_session_id)),
                typing,
            }),
        }
    }
}
