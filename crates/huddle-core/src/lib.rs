//! # huddle-core
//!
//! Room coordination engine for Huddle.
//!
//! This crate provides the building blocks behind a live chat room:
//!
//! - **Registry** - which connections are in which room
//! - **Presence** - typing entries with expiry
//! - **Store** - persistence boundary that orders messages
//! - **Router** - best-effort fan-out to room members
//! - **Session** - per-connection state machine
//! - **Engine** - shared context and background sweeps
//! - **Client** - client-side mirror of the session logic
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│   Store     │     │  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       ▲
//!        ├──────────────────────────────▶┌─────────────┐
//!        │                               │   Router    │
//!        ▼                               └─────────────┘
//! ┌─────────────┐                                ▲
//! │  Presence   │◀──── sweep ──── Engine ────────┘
//! └─────────────┘
//! ```

pub mod allocator;
pub mod client;
pub mod engine;
pub mod presence;
pub mod registry;
pub mod router;
pub mod session;
pub mod store;

pub use allocator::{create_room, CreateRoomError};
pub use client::{
    parse_room_input, Backoff, ChatLog, ClientSession, ConnectionStatus, TypingDebouncer,
    TypingIndicators,
};
pub use engine::{Engine, EngineConfig, EngineStats};
pub use presence::TypingPresence;
pub use registry::RoomRegistry;
pub use router::{BroadcastRouter, Delivery, OutboxReceiver};
pub use session::{ConnectionId, Outcome, Session, SessionState};
pub use store::{MemoryStore, MessageStore, NewMessage, StoreError};
