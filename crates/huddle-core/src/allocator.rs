//! Room creation.
//!
//! Hands out fresh room identifiers, either random or caller-chosen.

use crate::store::{MessageStore, StoreError};
use huddle_protocol::{room_id, RoomId};
use thiserror::Error;
use tracing::{debug, warn};

/// Random identifiers tried before giving up.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 10;

/// Room creation errors.
#[derive(Debug, Error)]
pub enum CreateRoomError {
    /// The requested identifier is malformed.
    #[error("Use 4-6 letters or numbers")]
    Invalid,

    /// The requested identifier is taken.
    #[error("Room id already exists: {0}")]
    AlreadyExists(RoomId),

    /// No free random identifier was found.
    #[error("No free room id after {MAX_ALLOCATION_ATTEMPTS} attempts")]
    Exhausted,

    /// The store failed.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CreateRoomError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RoomExists(id) => CreateRoomError::AlreadyExists(id),
            other => CreateRoomError::Store(other),
        }
    }
}

/// Create a room.
///
/// With no `requested` identifier, up to [`MAX_ALLOCATION_ATTEMPTS`] random
/// identifiers are tried and the first free one is created. A requested
/// identifier is normalized and validated first.
///
/// # Errors
///
/// See [`CreateRoomError`].
pub async fn create_room(
    store: &dyn MessageStore,
    requested: Option<&str>,
) -> Result<RoomId, CreateRoomError> {
    match requested {
        Some(raw) => {
            let normalized = room_id::normalize(raw);
            let room = RoomId::parse(&normalized).map_err(|_| CreateRoomError::Invalid)?;
            store.create_room(&room).await?;
            debug!(room = %room, "Created requested room");
            Ok(room)
        }
        None => allocate_random(store, RoomId::generate).await,
    }
}

/// Try identifiers from `generate` until one is free.
async fn allocate_random(
    store: &dyn MessageStore,
    mut generate: impl FnMut() -> RoomId,
) -> Result<RoomId, CreateRoomError> {
    for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
        let candidate = generate();
        if store.room_exists(&candidate).await? {
            continue;
        }
        match store.create_room(&candidate).await {
            Ok(()) => {
                debug!(room = %candidate, attempt, "Allocated room");
                return Ok(candidate);
            }
            // Lost a race with a concurrent creator; try another.
            Err(StoreError::RoomExists(_)) => continue,
            Err(e) => return Err(CreateRoomError::Store(e)),
        }
    }

    warn!("Room id allocation exhausted");
    Err(CreateRoomError::Exhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_random_room() {
        let store = MemoryStore::new();
        let room = create_room(&store, None).await.unwrap();
        assert!(room_id::is_valid(room.as_str()));
        assert!(store.room_exists(&room).await.unwrap());
    }

    #[tokio::test]
    async fn test_requested_room() {
        let store = MemoryStore::new();

        let room = create_room(&store, Some("CH-4T")).await.unwrap();
        assert_eq!(room.as_str(), "ch4t");

        assert!(matches!(
            create_room(&store, Some("ch4t")).await,
            Err(CreateRoomError::AlreadyExists(_))
        ));
        assert!(matches!(
            create_room(&store, Some("ab")).await,
            Err(CreateRoomError::Invalid)
        ));
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let store = MemoryStore::new();
        let taken = RoomId::parse("taken").unwrap();
        store.create_room(&taken).await.unwrap();

        let mut calls = 0;
        let result = allocate_random(&store, || {
            calls += 1;
            taken.clone()
        })
        .await;

        assert!(matches!(result, Err(CreateRoomError::Exhausted)));
        assert_eq!(calls, MAX_ALLOCATION_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_skips_taken_ids() {
        let store = MemoryStore::new();
        let taken = RoomId::parse("taken").unwrap();
        let free = RoomId::parse("free").unwrap();
        store.create_room(&taken).await.unwrap();

        let mut candidates = vec![free.clone(), taken.clone(), taken.clone()];
        let room = allocate_random(&store, || candidates.pop().unwrap())
            .await
            .unwrap();

        assert_eq!(room, free);
    }
}
