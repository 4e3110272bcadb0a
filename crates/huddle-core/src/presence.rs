//! Typing presence for Huddle.
//!
//! Tracks which sessions are composing a message in each room. Every entry
//! carries an expiry deadline; readers never see an entry past its deadline,
//! and a periodic sweep removes them even when nobody reads.

use dashmap::DashMap;
use huddle_protocol::RoomId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default time a single typing signal stays live.
pub const DEFAULT_TYPING_TTL: Duration = Duration::from_millis(1500);

/// An entry removed by [`TypingPresence::sweep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredTyper {
    /// Room the entry belonged to.
    pub room: RoomId,
    /// Session that stopped typing.
    pub session_id: String,
}

/// Per-room typing table.
#[derive(Debug, Default)]
struct RoomTypers {
    /// Session id to expiry deadline.
    deadlines: HashMap<String, Instant>,
}

/// Typing presence tracker.
#[derive(Debug, Default)]
pub struct TypingPresence {
    rooms: DashMap<RoomId, RoomTypers>,
}

impl TypingPresence {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a typing entry expiring `ttl` from now.
    ///
    /// Returns `true` if the session was not already typing (or its entry had lapsed).
    pub fn mark_typing(&self, room: &RoomId, session_id: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut typers = self.rooms.entry(room.clone()).or_default();
        let previous = typers
            .deadlines
            .insert(session_id.to_string(), now + ttl);
        let started = previous.map_or(true, |deadline| deadline <= now);
        trace!(room = %room, session = %session_id, started, "Typing marked");
        started
    }

    /// Remove a typing entry unconditionally.
    ///
    /// Returns `true` if a live (unexpired) entry was removed.
    pub fn clear_typing(&self, room: &RoomId, session_id: &str) -> bool {
        let now = Instant::now();
        let mut was_live = false;
        self.rooms.remove_if_mut(room, |_, typers| {
            was_live = typers
                .deadlines
                .remove(session_id)
                .is_some_and(|deadline| deadline > now);
            typers.deadlines.is_empty()
        });
        if was_live {
            trace!(room = %room, session = %session_id, "Typing cleared");
        }
        was_live
    }

    /// Sessions in `room` whose entry has not expired, excluding `excluding`.
    #[must_use]
    pub fn active_typers(&self, room: &RoomId, excluding: Option<&str>) -> Vec<String> {
        let now = Instant::now();
        self.rooms
            .get(room)
            .map(|typers| {
                typers
                    .deadlines
                    .iter()
                    .filter(|(id, deadline)| **deadline > now && Some(id.as_str()) != excluding)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check whether a session is typing in a room right now.
    #[must_use]
    pub fn is_typing(&self, room: &RoomId, session_id: &str) -> bool {
        let now = Instant::now();
        self.rooms
            .get(room)
            .and_then(|typers| typers.deadlines.get(session_id).copied())
            .is_some_and(|deadline| deadline > now)
    }

    /// Remove every expired entry.
    ///
    /// Returns the removed entries so callers can announce them.
    pub fn sweep(&self) -> Vec<ExpiredTyper> {
        let now = Instant::now();
        let mut expired = Vec::new();

        self.rooms.retain(|room, typers| {
            typers.deadlines.retain(|session_id, deadline| {
                if *deadline <= now {
                    expired.push(ExpiredTyper {
                        room: room.clone(),
                        session_id: session_id.clone(),
                    });
                    false
                } else {
                    true
                }
            });
            !typers.deadlines.is_empty()
        });

        if !expired.is_empty() {
            debug!(count = expired.len(), "Swept expired typers");
        }
        expired
    }

    /// Total number of entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.iter().map(|t| t.deadlines.len()).sum()
    }

    /// Check if no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_ttl_window() {
        let presence = TypingPresence::new();
        let ch4t = room("ch4t");

        presence.mark_typing(&ch4t, "anon-a", DEFAULT_TYPING_TTL);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(presence.active_typers(&ch4t, None), vec!["anon-a".to_string()]);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(presence.active_typers(&ch4t, None).is_empty());
        assert!(!presence.is_typing(&ch4t, "anon-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_deadline() {
        let presence = TypingPresence::new();
        let ch4t = room("ch4t");

        assert!(presence.mark_typing(&ch4t, "anon-a", DEFAULT_TYPING_TTL));
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(!presence.mark_typing(&ch4t, "anon-a", DEFAULT_TYPING_TTL));
        tokio::time::advance(Duration::from_millis(1000)).await;

        assert!(presence.is_typing(&ch4t, "anon-a"));
        assert_eq!(presence.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_typers_excludes_caller() {
        let presence = TypingPresence::new();
        let ch4t = room("ch4t");

        presence.mark_typing(&ch4t, "anon-a", DEFAULT_TYPING_TTL);
        presence.mark_typing(&ch4t, "anon-b", DEFAULT_TYPING_TTL);
        presence.mark_typing(&room("othr"), "anon-c", DEFAULT_TYPING_TTL);

        assert_eq!(
            presence.active_typers(&ch4t, Some("anon-a")),
            vec!["anon-b".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_typing() {
        let presence = TypingPresence::new();
        let ch4t = room("ch4t");

        presence.mark_typing(&ch4t, "anon-a", DEFAULT_TYPING_TTL);
        assert!(presence.clear_typing(&ch4t, "anon-a"));
        assert!(!presence.clear_typing(&ch4t, "anon-a"));
        assert!(presence.is_empty());

        // A lapsed entry is removed but not reported as live.
        presence.mark_typing(&ch4t, "anon-a", DEFAULT_TYPING_TTL);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!presence.clear_typing(&ch4t, "anon-a"));
        assert!(presence.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired_only() {
        let presence = TypingPresence::new();
        let ch4t = room("ch4t");

        presence.mark_typing(&ch4t, "anon-a", Duration::from_millis(500));
        presence.mark_typing(&ch4t, "anon-b", Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(1)).await;
        let expired = presence.sweep();

        assert_eq!(
            expired,
            vec![ExpiredTyper {
                room: ch4t.clone(),
                session_id: "anon-a".to_string(),
            }]
        );
        assert_eq!(presence.len(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(presence.sweep().len(), 1);
        assert!(presence.is_empty());
    }
}
