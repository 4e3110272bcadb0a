//! Message store boundary.
//!
//! The store is the single source of truth for message ordering: it assigns
//! every message its identifier and creation time, and lists a room's history
//! in that order. [`MemoryStore`] keeps everything in process.

use async_trait::async_trait;
use huddle_protocol::{ChatMessage, MessageId, RoomId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The room already exists.
    #[error("Room already exists: {0}")]
    RoomExists(RoomId),

    /// The backend is unreachable or refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A message about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Target room.
    pub room: RoomId,
    /// Anonymous author id, if known.
    pub sender_session_id: Option<String>,
    /// Cleaned message text.
    pub content: String,
}

/// Persistence collaborator for rooms and messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and creation time.
    ///
    /// Creation times are non-decreasing per room in storage order.
    async fn append(&self, message: NewMessage) -> Result<ChatMessage, StoreError>;

    /// The most recent `limit` messages of a room, oldest first.
    async fn recent(&self, room: &RoomId, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;

    /// Record a room, creating it if absent. Idempotent.
    async fn upsert_room(&self, room: &RoomId) -> Result<(), StoreError>;

    /// Create a room that must not already exist.
    async fn create_room(&self, room: &RoomId) -> Result<(), StoreError>;

    /// Check whether a room has been recorded.
    async fn room_exists(&self, room: &RoomId) -> Result<bool, StoreError>;
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct RoomLog {
    messages: Vec<ChatMessage>,
}

/// In-process message store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<RoomId, RoomLog>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages across rooms.
    pub async fn message_count(&self) -> usize {
        self.rooms
            .read()
            .await
            .values()
            .map(|log| log.messages.len())
            .sum()
    }

    fn allocate_id(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        let mut rooms = self.rooms.write().await;
        let log = rooms.entry(message.room.clone()).or_default();

        // Id and timestamp are assigned under the write lock so storage order,
        // id order, and timestamp order agree.
        let floor = log.messages.last().map_or(0, |m| m.created_at);
        let saved = ChatMessage {
            id: self.allocate_id(),
            room_id: message.room,
            sender_session_id: message.sender_session_id,
            content: message.content,
            created_at: now_millis().max(floor),
        };
        log.messages.push(saved.clone());

        Ok(saved)
    }

    async fn recent(&self, room: &RoomId, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let rooms = self.rooms.read().await;
        Ok(rooms
            .get(room)
            .map(|log| {
                let start = log.messages.len().saturating_sub(limit);
                log.messages[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn upsert_room(&self, room: &RoomId) -> Result<(), StoreError> {
        self.rooms.write().await.entry(room.clone()).or_default();
        Ok(())
    }

    async fn create_room(&self, room: &RoomId) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(room) {
            return Err(StoreError::RoomExists(room.clone()));
        }
        rooms.insert(room.clone(), RoomLog::default());
        Ok(())
    }

    async fn room_exists(&self, room: &RoomId) -> Result<bool, StoreError> {
        Ok(self.rooms.read().await.contains_key(room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    fn new_message(room_id: &str, content: &str) -> NewMessage {
        NewMessage {
            room: room(room_id),
            sender_session_id: Some("anon-a".into()),
            content: content.into(),
        }
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = MemoryStore::new();

        let first = store.append(new_message("ch4t", "one")).await.unwrap();
        let second = store.append(new_message("ch4t", "two")).await.unwrap();
        let other = store.append(new_message("othr", "three")).await.unwrap();

        assert!(second.id > first.id);
        assert!(other.id > second.id);
        assert!(second.created_at >= first.created_at);
        assert_eq!(store.message_count().await, 3);
    }

    #[tokio::test]
    async fn test_recent_is_chronological_tail() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store
                .append(new_message("ch4t", &format!("m{i}")))
                .await
                .unwrap();
        }

        let recent = store.recent(&room("ch4t"), 3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m7", "m8", "m9"]);

        assert!(store.recent(&room("none"), 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let store = MemoryStore::new();
        let saved = store.append(new_message("ch4t", "hello")).await.unwrap();

        let history = store.recent(&room("ch4t"), 50).await.unwrap();
        assert_eq!(history, vec![saved.clone()]);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[0].room_id.as_str(), "ch4t");
        assert_eq!(history[0].sender_session_id.as_deref(), Some("anon-a"));
    }

    #[tokio::test]
    async fn test_room_creation() {
        let store = MemoryStore::new();
        let ch4t = room("ch4t");

        assert!(!store.room_exists(&ch4t).await.unwrap());
        store.create_room(&ch4t).await.unwrap();
        assert!(store.room_exists(&ch4t).await.unwrap());
        assert!(matches!(
            store.create_room(&ch4t).await,
            Err(StoreError::RoomExists(_))
        ));

        store.upsert_room(&ch4t).await.unwrap();
        store.upsert_room(&room("next")).await.unwrap();
        assert!(store.room_exists(&room("next")).await.unwrap());
    }
}
