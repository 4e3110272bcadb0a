//! Connection sessions.
//!
//! A [`Session`] is one live client connection. It holds the connection's
//! room membership (at most one room) and turns validated [`Command`]s into
//! registry, presence, and store operations followed by broadcasts.
//!
//! ```text
//!            join(r)              snapshot sent
//! Unjoined ───────────▶ Joining ───────────────▶ Joined(r)
//!    ▲                                              │
//!    └──────────────── leave(r) / join(other) ──────┘
//! ```
//!
//! Dropping a session is a disconnect: it leaves its room and clears its
//! typing entry before returning.

use crate::engine::Engine;
use crate::store::NewMessage;
use huddle_protocol::{Command, MessageId, RoomId, ServerEvent};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Transport-level connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{millis:x}_{seq}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Membership state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Not in any room.
    Unjoined,
    /// Membership added, snapshot not yet delivered.
    Joining(RoomId),
    /// Member of the room.
    Joined(RoomId),
}

/// What applying a command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The command took effect without persisting anything.
    Applied,
    /// A message was persisted and broadcast.
    Persisted(MessageId),
    /// The store failed; nothing was broadcast.
    StoreFailed,
}

/// One live client connection.
pub struct Session {
    id: ConnectionId,
    engine: Arc<Engine>,
    state: SessionState,
    /// Anonymous id learned from the client's events.
    anon_id: Option<String>,
    /// Presence key this session holds in its current room.
    typing: Option<String>,
    closed: bool,
}

impl Session {
    pub(crate) fn new(id: ConnectionId, engine: Arc<Engine>) -> Self {
        debug!(connection = %id, "Session opened");
        Self {
            id,
            engine,
            state: SessionState::Unjoined,
            anon_id: None,
            typing: None,
            closed: false,
        }
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current membership state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Room the session is joined to, if any.
    #[must_use]
    pub fn room(&self) -> Option<&RoomId> {
        match &self.state {
            SessionState::Joined(room) => Some(room),
            _ => None,
        }
    }

    /// Anonymous client identifier, once the client has supplied one.
    #[must_use]
    pub fn anon_id(&self) -> Option<&str> {
        self.anon_id.as_deref()
    }

    /// Apply a validated command.
    pub async fn handle(&mut self, command: Command) -> Outcome {
        match command {
            Command::Join { room, session_id } => self.join(room, session_id).await,
            Command::Leave { room } => {
                self.leave(&room);
                Outcome::Applied
            }
            Command::Send {
                room,
                session_id,
                content,
            } => self.send(room, session_id, content).await,
            Command::Typing {
                room,
                session_id,
                typing,
            } => {
                self.set_typing(room, session_id, typing);
                Outcome::Applied
            }
        }
    }

    fn remember(&mut self, session_id: Option<String>) {
        if let Some(id) = session_id {
            self.anon_id = Some(id);
        }
    }

    /// Key a typing entry is stored under: the supplied id, the remembered
    /// anonymous id, or the connection id as a last resort.
    fn presence_key(&self, supplied: Option<String>) -> String {
        supplied
            .or_else(|| self.anon_id.clone())
            .unwrap_or_else(|| self.id.to_string())
    }

    async fn join(&mut self, room: RoomId, session_id: Option<String>) -> Outcome {
        self.remember(session_id);

        if let Some(current) = self.room().cloned() {
            if current != room {
                self.leave(&current);
            }
        }

        let engine = Arc::clone(&self.engine);
        if let Err(e) = engine.store().upsert_room(&room).await {
            warn!(connection = %self.id, room = %room, error = %e, "Join failed: room not recorded");
            self.state = SessionState::Unjoined;
            return Outcome::StoreFailed;
        }

        engine.registry().ensure_room(&room);
        engine.registry().join(&room, &self.id);
        self.state = SessionState::Joining(room.clone());

        // Membership is in place before the history read, so a message
        // persisted from here on reaches this session live.
        let limit = engine.config().history_limit;
        let messages = match engine.store().recent(&room, limit).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(connection = %self.id, room = %room, error = %e, "Join failed: history unavailable");
                engine.registry().leave(&room, &self.id);
                self.state = SessionState::Unjoined;
                return Outcome::StoreFailed;
            }
        };

        let count = messages.len();
        engine
            .router()
            .send_to(&self.id, Arc::new(ServerEvent::RoomJoined { messages }));
        self.state = SessionState::Joined(room.clone());
        debug!(connection = %self.id, room = %room, history = count, "Session joined");
        Outcome::Applied
    }

    fn leave(&mut self, room: &RoomId) {
        self.engine.registry().leave(room, &self.id);
        if self.room() == Some(room) {
            self.clear_typing();
            self.state = SessionState::Unjoined;
        }
        debug!(connection = %self.id, room = %room, "Session left");
    }

    async fn send(&mut self, room: RoomId, session_id: Option<String>, content: String) -> Outcome {
        self.remember(session_id.clone());
        let engine = Arc::clone(&self.engine);

        let message = NewMessage {
            room: room.clone(),
            sender_session_id: session_id.or_else(|| self.anon_id.clone()),
            content,
        };

        // Registry and presence locks are never held across the store call;
        // only the room's send turn is.
        let turn = engine.send_turn(&room);
        let _turn = turn.lock().await;

        let saved = match engine.store().append(message).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(connection = %self.id, room = %room, error = %e, "Message not persisted");
                return Outcome::StoreFailed;
            }
        };

        engine.registry().touch(&room);
        if self.room() == Some(&room) {
            self.clear_typing();
        }

        let id = saved.id;
        let delivery = engine
            .router()
            .broadcast(&room, ServerEvent::MessageNew(saved), None);
        debug!(
            connection = %self.id,
            room = %room,
            message = id,
            delivered = delivery.delivered,
            "Message broadcast"
        );
        Outcome::Persisted(id)
    }

    fn set_typing(&mut self, room: RoomId, session_id: Option<String>, typing: bool) {
        if self.room() != Some(&room) {
            debug!(connection = %self.id, room = %room, "Typing outside the joined room ignored");
            return;
        }
        let key = self.presence_key(session_id);
        let engine = Arc::clone(&self.engine);

        if typing {
            // One entry per session; a new key replaces the old one.
            if self.typing.as_ref().is_some_and(|held| *held != key) {
                self.clear_typing();
            }
            engine
                .presence()
                .mark_typing(&room, &key, engine.config().typing_ttl);
            self.typing = Some(key.clone());
        } else {
            engine.presence().clear_typing(&room, &key);
            if self.typing.as_ref() == Some(&key) {
                self.typing = None;
            }
        }

        engine
            .router()
            .broadcast(&room, ServerEvent::typing(key, typing), Some(&self.id));
    }

    /// Clear the typing entry held in the current room, announcing it if it
    /// was still live.
    fn clear_typing(&mut self) {
        let Some(key) = self.typing.take() else {
            return;
        };
        let Some(room) = self.room().cloned() else {
            return;
        };
        if self.engine.presence().clear_typing(&room, &key) {
            self.engine
                .router()
                .broadcast(&room, ServerEvent::typing(key, false), Some(&self.id));
        }
    }

    /// Leave the current room, clear presence, and release the outbox.
    pub fn disconnect(self) {
        drop(self);
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.clear_typing();
        if let SessionState::Joining(room) | SessionState::Joined(room) = &self.state {
            self.engine.registry().leave(room, &self.id);
        }
        self.state = SessionState::Unjoined;
        self.engine.router().unregister(&self.id);

        debug!(connection = %self.id, "Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("anon_id", &self.anon_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::router::OutboxReceiver;
    use crate::store::{MemoryStore, MessageStore, StoreError};
    use async_trait::async_trait;
    use huddle_protocol::{ChatMessage, ClientEvent};
    use std::time::Duration;

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    fn engine() -> Arc<Engine> {
        Engine::new(EngineConfig::default(), Arc::new(MemoryStore::new()))
    }

    fn drain(rx: &mut OutboxReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    async fn apply(session: &mut Session, event: ClientEvent) -> Option<Outcome> {
        match event.validate() {
            Ok(command) => Some(session.handle(command).await),
            Err(_) => None,
        }
    }

    fn join(room_id: &str, anon: &str) -> ClientEvent {
        ClientEvent::JoinRoom {
            room_id: room_id.into(),
            session_id: Some(anon.into()),
        }
    }

    fn send(room_id: &str, anon: &str, content: &str) -> ClientEvent {
        ClientEvent::MessageSend {
            room_id: room_id.into(),
            sender_session_id: Some(anon.into()),
            content: content.into(),
        }
    }

    fn typing(room_id: &str, anon: &str, typing: bool) -> ClientEvent {
        ClientEvent::Typing {
            room_id: room_id.into(),
            sender_session_id: anon.into(),
            typing,
        }
    }

    fn message_new(events: &[ServerEvent]) -> Vec<&ChatMessage> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::MessageNew(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_end_to_end_room_flow() {
        let engine = engine();
        let ch4t = room("ch4t");

        let (mut a, mut rx_a) = engine.connect();
        apply(&mut a, join("ch4t", "anon-a")).await;
        assert!(engine.registry().contains(&ch4t));
        assert_eq!(a.state(), &SessionState::Joined(ch4t.clone()));
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::RoomJoined { messages: vec![] }]
        );

        let (mut b, mut rx_b) = engine.connect();
        apply(&mut b, join("ch4t", "anon-b")).await;
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::RoomJoined { messages: vec![] }]
        );

        apply(&mut a, send("ch4t", "anon-a", "hello")).await;
        let seen_a = drain(&mut rx_a);
        let seen_b = drain(&mut rx_b);
        assert_eq!(message_new(&seen_a).len(), 1);
        assert_eq!(message_new(&seen_a), message_new(&seen_b));
        assert_eq!(message_new(&seen_b)[0].content, "hello");

        apply(&mut a, typing("ch4t", "anon-a", true)).await;
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::typing("anon-a", true)]
        );

        apply(&mut a, send("ch4t", "anon-a", "second")).await;
        let seen_b = drain(&mut rx_b);
        assert_eq!(seen_b.len(), 2);
        assert_eq!(seen_b[0], ServerEvent::typing("anon-a", false));
        assert!(matches!(&seen_b[1], ServerEvent::MessageNew(m) if m.content == "second"));

        let seen_a = drain(&mut rx_a);
        assert_eq!(seen_a.len(), 1, "sender never sees its own typing update");
    }

    #[tokio::test]
    async fn test_snapshot_is_chronological() {
        let engine = engine();

        let (mut a, _rx_a) = engine.connect();
        apply(&mut a, join("ch4t", "anon-a")).await;
        for text in ["one", "two", "three"] {
            apply(&mut a, send("ch4t", "anon-a", text)).await;
        }

        let (mut b, mut rx_b) = engine.connect();
        apply(&mut b, join("ch-4t", "anon-b")).await;

        match drain(&mut rx_b).as_slice() {
            [ServerEvent::RoomJoined { messages }] => {
                let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
                assert_eq!(contents, vec!["one", "two", "three"]);
                assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_snapshot_respects_history_limit() {
        let config = EngineConfig {
            history_limit: 2,
            ..EngineConfig::default()
        };
        let engine = Engine::new(config, Arc::new(MemoryStore::new()));

        let (mut a, _rx_a) = engine.connect();
        for text in ["one", "two", "three"] {
            apply(&mut a, send("ch4t", "anon-a", text)).await;
        }
        apply(&mut a, join("ch4t", "anon-a")).await;

        let (mut b, mut rx_b) = engine.connect();
        apply(&mut b, join("ch4t", "anon-b")).await;
        match drain(&mut rx_b).as_slice() {
            [ServerEvent::RoomJoined { messages }] => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[1].content, "three");
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_other_room_leaves_first() {
        let engine = engine();
        let (first, second) = (room("frst"), room("scnd"));

        let (mut a, _rx) = engine.connect();
        apply(&mut a, join("frst", "anon-a")).await;
        apply(&mut a, typing("frst", "anon-a", true)).await;
        apply(&mut a, join("scnd", "anon-a")).await;

        assert!(!engine.registry().is_member(&first, a.id()));
        assert!(engine.registry().is_member(&second, a.id()));
        assert!(engine.presence().active_typers(&first, None).is_empty());
        assert_eq!(a.room(), Some(&second));
    }

    #[tokio::test]
    async fn test_rejoin_same_room_is_idempotent() {
        let engine = engine();
        let ch4t = room("ch4t");

        let (mut a, mut rx) = engine.connect();
        apply(&mut a, join("ch4t", "anon-a")).await;
        apply(&mut a, join("ch4t", "anon-a")).await;

        assert_eq!(engine.registry().member_count(&ch4t), 1);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn test_leave_is_silent() {
        let engine = engine();
        let ch4t = room("ch4t");

        let (mut a, _rx_a) = engine.connect();
        let (mut b, mut rx_b) = engine.connect();
        apply(&mut a, join("ch4t", "anon-a")).await;
        apply(&mut b, join("ch4t", "anon-b")).await;
        drain(&mut rx_b);

        apply(
            &mut a,
            ClientEvent::LeaveRoom {
                room_id: "ch4t".into(),
            },
        )
        .await;

        assert_eq!(a.state(), &SessionState::Unjoined);
        assert_eq!(engine.registry().members(&ch4t), vec![b.id().clone()]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up() {
        let engine = engine();
        let ch4t = room("ch4t");

        let (mut a, _rx_a) = engine.connect();
        let (mut b, mut rx_b) = engine.connect();
        apply(&mut a, join("ch4t", "anon-a")).await;
        apply(&mut b, join("ch4t", "anon-b")).await;
        apply(&mut a, typing("ch4t", "anon-a", true)).await;
        drain(&mut rx_b);

        let a_id = a.id().clone();
        a.disconnect();

        assert!(!engine.registry().is_member(&ch4t, &a_id));
        assert!(engine.presence().active_typers(&ch4t, None).is_empty());
        assert_eq!(engine.router().connection_count(), 1);
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::typing("anon-a", false)]);
    }

    #[tokio::test]
    async fn test_message_boundaries() {
        let engine = engine();
        let (mut a, mut rx) = engine.connect();
        apply(&mut a, join("ch4t", "anon-a")).await;
        drain(&mut rx);

        apply(&mut a, send("ch4t", "anon-a", &"y".repeat(5000))).await;
        let events = drain(&mut rx);
        assert_eq!(message_new(&events)[0].content.chars().count(), 4000);

        apply(&mut a, send("ch4t", "anon-a", "   \n  ")).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(engine.store().recent(&room("ch4t"), 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_room_ids_do_nothing() {
        let engine = engine();
        let (mut a, mut rx) = engine.connect();

        for bad in ["ab", "ABCDEFG", "a b", ""] {
            apply(&mut a, join(bad, "anon-a")).await;
            apply(&mut a, send(bad, "anon-a", "hi")).await;
            apply(&mut a, typing(bad, "anon-a", true)).await;
        }

        assert_eq!(engine.registry().room_count(), 0);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(a.state(), &SessionState::Unjoined);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_single_delivery_each() {
        let engine = engine();
        let mut sessions = Vec::new();

        let joins: Vec<_> = (0..32)
            .map(|i| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let (mut session, rx) = engine.connect();
                    apply(&mut session, join("ch4t", &format!("anon-{i}"))).await;
                    (session, rx)
                })
            })
            .collect();
        for handle in joins {
            sessions.push(handle.await.unwrap());
        }

        let (sender, _) = &mut sessions[0];
        apply(sender, send("ch4t", "anon-0", "fan out")).await;

        for (_, rx) in &mut sessions {
            let events = drain(rx);
            assert_eq!(message_new(&events).len(), 1);
        }
    }

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn append(&self, _message: NewMessage) -> Result<ChatMessage, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn recent(
            &self,
            _room: &RoomId,
            _limit: usize,
        ) -> Result<Vec<ChatMessage>, StoreError> {
            Ok(Vec::new())
        }

        async fn upsert_room(&self, _room: &RoomId) -> Result<(), StoreError> {
            Ok(())
        }

        async fn create_room(&self, _room: &RoomId) -> Result<(), StoreError> {
            Ok(())
        }

        async fn room_exists(&self, _room: &RoomId) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_broadcast() {
        let engine = Engine::new(EngineConfig::default(), Arc::new(FailingStore));
        let (mut a, mut rx) = engine.connect();
        apply(&mut a, join("ch4t", "anon-a")).await;
        drain(&mut rx);

        assert_eq!(
            apply(&mut a, send("ch4t", "anon-a", "lost")).await,
            Some(Outcome::StoreFailed)
        );
        assert!(drain(&mut rx).is_empty());

        // The room keeps working afterwards.
        apply(&mut a, typing("ch4t", "anon-a", true)).await;
        assert!(engine.presence().is_typing(&room("ch4t"), "anon-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_without_anon_id_uses_connection() {
        let engine = engine();
        let (mut a, _rx) = engine.connect();
        let ch4t = room("ch4t");

        a.handle(Command::Join {
            room: ch4t.clone(),
            session_id: None,
        })
        .await;
        a.handle(Command::Typing {
            room: ch4t.clone(),
            session_id: None,
            typing: true,
        })
        .await;
        assert_eq!(
            engine.presence().active_typers(&ch4t, None),
            vec![a.id().to_string()]
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(engine.presence().active_typers(&ch4t, None).is_empty());
    }

    #[tokio::test]
    async fn test_typing_outside_joined_room_is_ignored() {
        let engine = engine();
        let (mut a, mut rx_a) = engine.connect();
        let (mut b, mut rx_b) = engine.connect();
        apply(&mut a, join("ch4t", "anon-a")).await;
        apply(&mut b, join("othr", "anon-b")).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        for i in 0..20 {
            apply(&mut b, typing(&format!("rm{i:02}"), "anon-b", true)).await;
        }
        apply(&mut b, typing("ch4t", "anon-b", true)).await;

        assert!(b.typing.is_none());
        assert!(engine.presence().is_empty());
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_typing_keeps_one_entry_per_session() {
        let engine = engine();
        let ch4t = room("ch4t");
        let (mut a, _rx_a) = engine.connect();
        let (mut b, mut rx_b) = engine.connect();
        apply(&mut a, join("ch4t", "anon-a")).await;
        apply(&mut b, join("ch4t", "anon-b")).await;
        drain(&mut rx_b);

        apply(&mut a, typing("ch4t", "first", true)).await;
        apply(&mut a, typing("ch4t", "second", true)).await;

        assert_eq!(engine.presence().active_typers(&ch4t, None), vec!["second"]);
        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerEvent::typing("first", true),
                ServerEvent::typing("first", false),
                ServerEvent::typing("second", true),
            ]
        );
    }

    /// Holds the first "slow" append after its id has been assigned.
    struct SlowAppend {
        inner: MemoryStore,
    }

    #[async_trait]
    impl MessageStore for SlowAppend {
        async fn append(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
            let slow = message.content == "slow";
            let saved = self.inner.append(message).await?;
            if slow {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(saved)
        }

        async fn recent(&self, room: &RoomId, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
            self.inner.recent(room, limit).await
        }

        async fn upsert_room(&self, room: &RoomId) -> Result<(), StoreError> {
            self.inner.upsert_room(room).await
        }

        async fn create_room(&self, room: &RoomId) -> Result<(), StoreError> {
            self.inner.create_room(room).await
        }

        async fn room_exists(&self, room: &RoomId) -> Result<bool, StoreError> {
            self.inner.room_exists(room).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_follows_store_order() {
        let store = Arc::new(SlowAppend {
            inner: MemoryStore::new(),
        });
        let engine = Engine::new(EngineConfig::default(), store);

        let (mut a, _rx_a) = engine.connect();
        let (mut b, _rx_b) = engine.connect();
        let (mut c, mut rx_c) = engine.connect();
        for (session, anon) in [(&mut a, "anon-a"), (&mut b, "anon-b"), (&mut c, "anon-c")] {
            apply(session, join("ch4t", anon)).await;
        }
        drain(&mut rx_c);

        let slow = tokio::spawn(async move {
            apply(&mut a, send("ch4t", "anon-a", "slow")).await;
            a
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let fast = tokio::spawn(async move {
            apply(&mut b, send("ch4t", "anon-b", "fast")).await;
            b
        });
        let _a = slow.await.unwrap();
        let _b = fast.await.unwrap();

        let live: Vec<_> = message_new(&drain(&mut rx_c))
            .into_iter()
            .map(|m| (m.id, m.content.clone()))
            .collect();
        let stored: Vec<_> = engine
            .store()
            .recent(&room("ch4t"), 50)
            .await
            .unwrap()
            .into_iter()
            .map(|m| (m.id, m.content))
            .collect();
        assert_eq!(live.len(), 2);
        assert_eq!(live, stored);
        assert_eq!(live[0].1, "slow");
    }

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }
}
