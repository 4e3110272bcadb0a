//! Room registry.
//!
//! Authoritative in-memory map from room identifier to its member set.
//! Rooms appear on first join and are reaped once empty and idle.

use crate::session::ConnectionId;
use dashmap::DashMap;
use huddle_protocol::RoomId;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Membership state for one room.
#[derive(Debug)]
struct RoomEntry {
    members: HashSet<ConnectionId>,
    last_active: Instant,
}

impl RoomEntry {
    fn new() -> Self {
        Self {
            members: HashSet::new(),
            last_active: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

/// The room registry.
///
/// Each room lives in its own map shard slot, so a join or leave is never
/// observed half-applied and rooms never contend on a shared lock.
/// Identifiers are validated by the caller; every operation accepts any [`RoomId`].
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, RoomEntry>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the room if it does not exist.
    ///
    /// Returns `true` if the room was created by this call.
    pub fn ensure_room(&self, room: &RoomId) -> bool {
        let mut created = false;
        self.rooms.entry(room.clone()).or_insert_with(|| {
            created = true;
            RoomEntry::new()
        });
        if created {
            debug!(room = %room, "Room created");
        }
        created
    }

    /// Add a connection to a room, creating the room if needed.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn join(&self, room: &RoomId, connection: &ConnectionId) -> bool {
        let mut entry = self.rooms.entry(room.clone()).or_insert_with(|| {
            debug!(room = %room, "Room created");
            RoomEntry::new()
        });
        entry.touch();
        let added = entry.members.insert(connection.clone());
        if added {
            debug!(
                room = %room,
                connection = %connection,
                members = entry.members.len(),
                "Joined room"
            );
        }
        added
    }

    /// Remove a connection from a room. Removing a non-member is a no-op.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&self, room: &RoomId, connection: &ConnectionId) -> bool {
        let Some(mut entry) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = entry.members.remove(connection);
        if removed {
            entry.touch();
            debug!(
                room = %room,
                connection = %connection,
                members = entry.members.len(),
                "Left room"
            );
        }
        removed
    }

    /// Members of a room as of this call.
    #[must_use]
    pub fn members(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|e| e.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether a connection is a member of a room.
    #[must_use]
    pub fn is_member(&self, room: &RoomId, connection: &ConnectionId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|e| e.members.contains(connection))
    }

    /// Record activity in a room without changing membership.
    pub fn touch(&self, room: &RoomId) {
        if let Some(mut entry) = self.rooms.get_mut(room) {
            entry.touch();
        }
    }

    /// Check if a room exists.
    #[must_use]
    pub fn contains(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of members in a room.
    #[must_use]
    pub fn member_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map(|e| e.members.len()).unwrap_or(0)
    }

    /// Number of rooms currently held.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Remove rooms that have no members and no activity for `grace`.
    ///
    /// Returns the reaped room identifiers.
    pub fn reap_idle(&self, grace: Duration) -> Vec<RoomId> {
        let now = Instant::now();
        let candidates: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|e| e.members.is_empty() && now.duration_since(e.last_active) >= grace)
            .map(|e| e.key().clone())
            .collect();

        // Re-checked under the shard lock: a join may have landed since the scan.
        let reaped: Vec<RoomId> = candidates
            .into_iter()
            .filter(|room| {
                self.rooms
                    .remove_if(room, |_, e| {
                        e.members.is_empty() && now.duration_since(e.last_active) >= grace
                    })
                    .is_some()
            })
            .collect();

        for room in &reaped {
            debug!(room = %room, "Reaped idle room");
        }
        reaped
    }

    /// Drop every room.
    pub fn clear(&self) {
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn test_ensure_room_idempotent() {
        let registry = RoomRegistry::new();
        assert!(registry.ensure_room(&room("ch4t")));
        assert!(!registry.ensure_room(&room("ch4t")));
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.member_count(&room("ch4t")), 0);
    }

    #[test]
    fn test_join_leave_idempotent() {
        let registry = RoomRegistry::new();
        let ch4t = room("ch4t");

        assert!(registry.join(&ch4t, &conn("conn-1")));
        assert!(!registry.join(&ch4t, &conn("conn-1")));
        assert!(registry.join(&ch4t, &conn("conn-2")));
        assert_eq!(registry.member_count(&ch4t), 2);

        assert!(registry.leave(&ch4t, &conn("conn-1")));
        assert!(!registry.leave(&ch4t, &conn("conn-1")));
        assert!(!registry.leave(&room("zzzz"), &conn("conn-1")));

        assert_eq!(registry.members(&ch4t), vec![conn("conn-2")]);
        assert!(registry.is_member(&ch4t, &conn("conn-2")));
        assert!(!registry.is_member(&ch4t, &conn("conn-1")));
    }

    #[test]
    fn test_members_of_unknown_room() {
        let registry = RoomRegistry::new();
        assert!(registry.members(&room("nope")).is_empty());
        assert!(!registry.contains(&room("nope")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle_rooms() {
        let registry = RoomRegistry::new();
        let empty = room("empty");
        let busy = room("busy");

        registry.ensure_room(&empty);
        registry.join(&busy, &conn("conn-1"));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(registry.reap_idle(Duration::from_secs(60)).is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(registry.reap_idle(Duration::from_secs(60)), vec![empty.clone()]);
        assert!(!registry.contains(&empty));
        assert!(registry.contains(&busy));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_resets_idle_clock() {
        let registry = RoomRegistry::new();
        let ch4t = room("ch4t");

        registry.join(&ch4t, &conn("conn-1"));
        tokio::time::advance(Duration::from_secs(120)).await;
        registry.leave(&ch4t, &conn("conn-1"));

        assert!(registry.reap_idle(Duration::from_secs(60)).is_empty());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(registry.reap_idle(Duration::from_secs(60)).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins() {
        let registry = Arc::new(RoomRegistry::new());
        let ch4t = room("ch4t");

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let ch4t = ch4t.clone();
                tokio::spawn(async move { registry.join(&ch4t, &conn(&format!("conn-{i}"))) })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(registry.member_count(&ch4t), 64);
        assert_eq!(registry.room_count(), 1);
    }
}
