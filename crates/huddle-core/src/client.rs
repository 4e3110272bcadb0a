//! Client-side session logic.
//!
//! Everything a chat client needs to stay consistent with the engine, kept
//! free of any transport so it can be driven by a WebSocket client, a test,
//! or a bench harness:
//!
//! - [`ClientSession`] - current room, connection status, rejoin on reconnect
//! - [`TypingDebouncer`] - rate-limits outgoing typing signals
//! - [`TypingIndicators`] - who else is typing, with receiver-side expiry
//! - [`ChatLog`] - snapshot replacement and live message de-duplication
//! - [`Backoff`] - reconnect delays
//!
//! Time is passed in explicitly so callers decide which clock drives it.

use huddle_protocol::{
    clean_content, ChatMessage, ClientEvent, InvalidRoomId, MessageId, RoomId, ServerEvent,
    MAX_CONTENT_CHARS,
};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between repeated `typing: true` signals.
pub const TYPING_REFRESH: Duration = Duration::from_secs(1);

/// Idle time after which the sender announces it stopped typing.
pub const TYPING_IDLE: Duration = Duration::from_secs(2);

/// How long a received `typing: true` is shown without a refresh.
pub const TYPING_DISPLAY_TTL: Duration = Duration::from_millis(1500);

/// Connection status as seen by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Sender-side typing debouncer.
///
/// Emits `true` on the first keystroke and at most once per refresh period
/// while input continues, and `false` once input has been idle long enough.
#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    refresh: Duration,
    idle: Duration,
    typing: bool,
    last_sent: Option<Instant>,
    last_input: Option<Instant>,
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(TYPING_REFRESH, TYPING_IDLE)
    }
}

impl TypingDebouncer {
    /// Create a debouncer with custom periods.
    #[must_use]
    pub fn new(refresh: Duration, idle: Duration) -> Self {
        Self {
            refresh,
            idle,
            typing: false,
            last_sent: None,
            last_input: None,
        }
    }

    /// Whether a `typing: true` is currently outstanding.
    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Record a keystroke. Returns the signal to send, if any.
    pub fn input(&mut self, now: Instant) -> Option<bool> {
        self.last_input = Some(now);

        let due = match self.last_sent {
            Some(sent) if self.typing => now.saturating_duration_since(sent) >= self.refresh,
            _ => true,
        };
        if due {
            self.typing = true;
            self.last_sent = Some(now);
            Some(true)
        } else {
            None
        }
    }

    /// Check for idleness. Returns `Some(false)` once when input has stopped.
    pub fn tick(&mut self, now: Instant) -> Option<bool> {
        match self.last_input {
            Some(input) if self.typing && now.saturating_duration_since(input) >= self.idle => {
                self.reset();
                Some(false)
            }
            _ => None,
        }
    }

    /// When [`tick`](Self::tick) should next be called, if typing.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        if self.typing {
            self.last_input.map(|input| input + self.idle)
        } else {
            None
        }
    }

    /// Forget the current typing run. The server clears its own entry when a
    /// message is sent, so nothing needs to go out.
    pub fn reset(&mut self) {
        self.typing = false;
        self.last_sent = None;
        self.last_input = None;
    }
}

/// Receiver-side view of who is typing in the current room.
#[derive(Debug, Clone)]
pub struct TypingIndicators {
    self_id: String,
    ttl: Duration,
    typers: HashMap<String, Instant>,
}

impl TypingIndicators {
    /// Create an indicator set that ignores updates about `self_id`.
    #[must_use]
    pub fn new(self_id: impl Into<String>) -> Self {
        Self::with_ttl(self_id, TYPING_DISPLAY_TTL)
    }

    #[must_use]
    pub fn with_ttl(self_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            self_id: self_id.into(),
            ttl,
            typers: HashMap::new(),
        }
    }

    /// Apply a `typing_update`.
    pub fn update(&mut self, sender: &str, typing: bool, now: Instant) {
        if sender == self.self_id {
            return;
        }
        if typing {
            self.typers.insert(sender.to_string(), now + self.ttl);
        } else {
            self.typers.remove(sender);
        }
    }

    /// A message from `sender` arrived; it is no longer typing.
    pub fn message_from(&mut self, sender: &str) {
        self.typers.remove(sender);
    }

    /// Senders currently shown as typing, sorted.
    #[must_use]
    pub fn active(&self, now: Instant) -> Vec<String> {
        let mut active: Vec<String> = self
            .typers
            .iter()
            .filter(|(_, expires)| **expires > now)
            .map(|(sender, _)| sender.clone())
            .collect();
        active.sort();
        active
    }

    /// Drop expired entries.
    pub fn prune(&mut self, now: Instant) {
        self.typers.retain(|_, expires| *expires > now);
    }

    pub fn clear(&mut self) {
        self.typers.clear();
    }
}

/// Message history of the current room.
///
/// Live messages can arrive before the join snapshot and may also be part of
/// it, so every message is keyed by id and kept in id order.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    room: Option<RoomId>,
    messages: Vec<ChatMessage>,
    seen: HashSet<MessageId>,
}

impl ChatLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `room`, discarding history from any other room.
    pub fn open(&mut self, room: &RoomId) {
        if self.room.as_ref() != Some(room) {
            self.room = Some(room.clone());
            self.messages.clear();
            self.seen.clear();
        }
    }

    /// Replace the history with a join snapshot.
    ///
    /// Live messages newer than the snapshot's newest entry are kept.
    pub fn apply_snapshot(&mut self, snapshot: Vec<ChatMessage>) {
        let newest = snapshot.last().map(|m| m.id);
        let later: Vec<ChatMessage> = self
            .messages
            .drain(..)
            .filter(|m| newest.map_or(true, |newest| m.id > newest))
            .collect();

        self.seen.clear();
        for message in snapshot.into_iter().chain(later) {
            self.push(message);
        }
    }

    /// Add a live message. Returns `false` for duplicates and other rooms.
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if let Some(room) = &self.room {
            if &message.room_id != room {
                return false;
            }
        }
        if !self.seen.insert(message.id) {
            return false;
        }

        match self.messages.last() {
            Some(last) if last.id > message.id => {
                let at = self.messages.partition_point(|m| m.id < message.id);
                self.messages.insert(at, message);
            }
            _ => self.messages.push(message),
        }
        true
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Reconnect delay schedule: exponential with jitter, capped, never giving up.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(5), 0.5)
    }
}

impl Backoff {
    /// Create a schedule. `jitter` is the fraction of each delay that may be
    /// added or removed at random, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        let base = self.initial.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter == 0.0 {
            return base;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        base.mul_f64(1.0 + spread).min(self.max)
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Parse a room code typed by a user.
///
/// Letters are lowercased before the server's rules apply, so `"CH-4T"`
/// opens `ch4t`. The server never folds case on its own.
///
/// # Errors
///
/// Returns [`InvalidRoomId`] if no valid identifier remains.
pub fn parse_room_input(input: &str) -> Result<RoomId, InvalidRoomId> {
    RoomId::parse(&input.to_ascii_lowercase())
}

/// Generate an anonymous client identifier.
#[must_use]
pub fn generate_anon_id() -> String {
    format!("{:032x}", rand::rng().random::<u128>())
}

/// Client half of a connection session.
///
/// Methods return the events to put on the wire. Nothing is returned while
/// disconnected; [`connected`](Self::connected) re-issues the join for the
/// current room, which is how a client recovers after a reconnect.
#[derive(Debug, Clone)]
pub struct ClientSession {
    anon_id: String,
    room: Option<RoomId>,
    status: ConnectionStatus,
    joined: bool,
    log: ChatLog,
    typers: TypingIndicators,
    debouncer: TypingDebouncer,
}

impl ClientSession {
    #[must_use]
    pub fn new(anon_id: impl Into<String>) -> Self {
        let anon_id = anon_id.into();
        Self {
            typers: TypingIndicators::new(anon_id.clone()),
            anon_id,
            room: None,
            status: ConnectionStatus::Disconnected,
            joined: false,
            log: ChatLog::new(),
            debouncer: TypingDebouncer::default(),
        }
    }

    #[must_use]
    pub fn anon_id(&self) -> &str {
        &self.anon_id
    }

    /// Room the client wants to be in.
    #[must_use]
    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Whether the snapshot for the current room has arrived on this connection.
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    #[must_use]
    pub fn log(&self) -> &ChatLog {
        &self.log
    }

    #[must_use]
    pub fn typers(&self) -> &TypingIndicators {
        &self.typers
    }

    fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    fn join_event(&self, room: &RoomId) -> ClientEvent {
        ClientEvent::JoinRoom {
            room_id: room.to_string(),
            session_id: Some(self.anon_id.clone()),
        }
    }

    pub fn connecting(&mut self) {
        self.status = ConnectionStatus::Connecting;
    }

    /// The transport is up. Returns the join for the current room, if any.
    pub fn connected(&mut self) -> Vec<ClientEvent> {
        self.status = ConnectionStatus::Connected;
        self.joined = false;
        self.room
            .as_ref()
            .map(|room| self.join_event(room))
            .into_iter()
            .collect()
    }

    /// The transport dropped. Server-side state for this connection is gone.
    pub fn disconnected(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.joined = false;
        self.typers.clear();
        self.debouncer.reset();
    }

    /// Move to `room`, leaving the previous one first.
    pub fn join(&mut self, room: RoomId) -> Vec<ClientEvent> {
        if self.room.as_ref() == Some(&room) {
            return Vec::new();
        }

        let mut events = Vec::new();
        if let Some(previous) = self.room.take() {
            if self.is_connected() {
                events.push(ClientEvent::LeaveRoom {
                    room_id: previous.to_string(),
                });
            }
        }

        self.joined = false;
        self.typers.clear();
        self.debouncer.reset();
        self.log.open(&room);
        if self.is_connected() {
            events.push(self.join_event(&room));
        }
        self.room = Some(room);
        events
    }

    /// Leave the current room.
    pub fn leave(&mut self) -> Option<ClientEvent> {
        let room = self.room.take()?;
        self.joined = false;
        self.typers.clear();
        self.debouncer.reset();
        self.is_connected().then(|| ClientEvent::LeaveRoom {
            room_id: room.to_string(),
        })
    }

    /// Post a message. Whitespace-only content produces nothing.
    pub fn send(&mut self, content: &str) -> Option<ClientEvent> {
        if !self.is_connected() {
            return None;
        }
        let room = self.room.as_ref()?;
        let content = clean_content(content, MAX_CONTENT_CHARS)?;
        let event = ClientEvent::MessageSend {
            room_id: room.to_string(),
            sender_session_id: Some(self.anon_id.clone()),
            content,
        };
        self.debouncer.reset();
        Some(event)
    }

    /// The user typed something.
    pub fn input(&mut self, now: Instant) -> Option<ClientEvent> {
        if !self.is_connected() || self.room.is_none() {
            return None;
        }
        let typing = self.debouncer.input(now)?;
        self.typing_event(typing)
    }

    /// Advance timers. Returns a `typing: false` once input goes idle.
    pub fn tick(&mut self, now: Instant) -> Option<ClientEvent> {
        self.typers.prune(now);
        let typing = self.debouncer.tick(now)?;
        if self.is_connected() {
            self.typing_event(typing)
        } else {
            None
        }
    }

    /// Next instant [`tick`](Self::tick) has work to do.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    fn typing_event(&self, typing: bool) -> Option<ClientEvent> {
        self.room.as_ref().map(|room| ClientEvent::Typing {
            room_id: room.to_string(),
            sender_session_id: self.anon_id.clone(),
            typing,
        })
    }

    /// Apply an event from the server.
    pub fn apply(&mut self, event: ServerEvent, now: Instant) {
        match event {
            ServerEvent::RoomJoined { messages } => {
                if self.room.is_some() {
                    self.joined = true;
                    self.log.apply_snapshot(messages);
                }
            }
            ServerEvent::MessageNew(message) => {
                if let Some(sender) = &message.sender_session_id {
                    self.typers.message_from(sender);
                }
                self.log.push(message);
            }
            ServerEvent::TypingUpdate {
                sender_session_id,
                typing,
            } => self.typers.update(&sender_session_id, typing, now),
        }
    }
}
