//! The engine context.
//!
//! One [`Engine`] is built per process and shared by every connection. It
//! owns the room registry, typing presence, broadcast router, and the message
//! store handle, and runs two background sweeps: typing expiry and idle room
//! reaping.

use crate::presence::{TypingPresence, DEFAULT_TYPING_TTL};
use crate::registry::RoomRegistry;
use crate::router::{BroadcastRouter, OutboxReceiver, DEFAULT_OUTBOX_CAPACITY};
use crate::session::{ConnectionId, Session};
use crate::store::MessageStore;
use dashmap::DashMap;
use huddle_protocol::{RoomId, ServerEvent, MAX_CONTENT_CHARS};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long one typing signal stays live.
    pub typing_ttl: Duration,
    /// Interval of the typing expiry sweep.
    pub sweep_interval: Duration,
    /// How long an empty room is kept after its last activity.
    pub idle_grace: Duration,
    /// Interval of the idle room sweep.
    pub reap_interval: Duration,
    /// Messages included in a join snapshot.
    pub history_limit: usize,
    /// Maximum message length in characters.
    pub max_content_chars: usize,
    /// Events queued per connection before drops begin.
    pub outbox_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            typing_ttl: DEFAULT_TYPING_TTL,
            sweep_interval: Duration::from_secs(1),
            idle_grace: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
            history_limit: 50,
            max_content_chars: MAX_CONTENT_CHARS,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Rooms held in the registry.
    pub rooms: usize,
    /// Live connections.
    pub connections: usize,
    /// Typing entries, including ones awaiting the sweep.
    pub typing: usize,
}

/// Shared engine context.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<RoomRegistry>,
    presence: TypingPresence,
    router: BroadcastRouter,
    store: Arc<dyn MessageStore>,
    /// Per-room send turns. Append and broadcast run under the room's turn,
    /// so live delivery order is store order.
    send_turns: DashMap<RoomId, Arc<AsyncMutex<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl Engine {
    /// Build an engine without background sweeps.
    #[must_use]
    pub fn new(config: EngineConfig, store: Arc<dyn MessageStore>) -> Arc<Self> {
        let registry = Arc::new(RoomRegistry::new());
        let router = BroadcastRouter::new(Arc::clone(&registry), config.outbox_capacity);
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            config,
            registry,
            presence: TypingPresence::new(),
            router,
            store,
            send_turns: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            shutdown,
        })
    }

    /// Build an engine and spawn its sweeps on the current runtime.
    #[must_use]
    pub fn start(config: EngineConfig, store: Arc<dyn MessageStore>) -> Arc<Self> {
        info!("Starting engine with config: {:?}", config);
        let engine = Self::new(config, store);

        let presence_sweep = spawn_sweep(&engine, engine.config.sweep_interval, |engine| {
            engine.sweep_presence();
        });
        let room_reaper = spawn_sweep(&engine, engine.config.reap_interval, |engine| {
            engine.reap_rooms();
        });

        if let Ok(mut tasks) = engine.tasks.lock() {
            tasks.push(presence_sweep);
            tasks.push(room_reaper);
        }
        engine
    }

    /// Open a session for a new connection.
    ///
    /// Events for the session arrive on the returned receiver.
    pub fn connect(self: &Arc<Self>) -> (Session, OutboxReceiver) {
        let id = ConnectionId::generate();
        let outbox = self.router.register(&id);
        (Session::new(id, Arc::clone(self)), outbox)
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The room registry.
    #[must_use]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Typing presence.
    #[must_use]
    pub fn presence(&self) -> &TypingPresence {
        &self.presence
    }

    /// The broadcast router.
    #[must_use]
    pub fn router(&self) -> &BroadcastRouter {
        &self.router
    }

    /// The message store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// The send turn for `room`.
    pub(crate) fn send_turn(&self, room: &RoomId) -> Arc<AsyncMutex<()>> {
        Arc::clone(&*self.send_turns.entry(room.clone()).or_default())
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            rooms: self.registry.room_count(),
            connections: self.router.connection_count(),
            typing: self.presence.len(),
        }
    }

    /// Remove expired typing entries and tell the rest of each room.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_presence(&self) -> usize {
        let expired = self.presence.sweep();
        for typer in &expired {
            // Skip entries refreshed between the sweep and now.
            if self.presence.is_typing(&typer.room, &typer.session_id) {
                continue;
            }
            self.router.broadcast(
                &typer.room,
                ServerEvent::typing(typer.session_id.clone(), false),
                None,
            );
        }
        expired.len()
    }

    /// Remove rooms that are empty and idle past the grace period.
    pub fn reap_rooms(&self) -> Vec<RoomId> {
        let reaped = self.registry.reap_idle(self.config.idle_grace);
        // Turns outlive their room only while a send holds them.
        self.send_turns
            .retain(|room, turn| self.registry.contains(room) || Arc::strong_count(turn) > 1);
        if !reaped.is_empty() {
            debug!(count = reaped.len(), "Reaped idle rooms");
        }
        reaped
    }

    /// Stop the sweeps and close every connection's outbox.
    ///
    /// Connection tasks observe their outbox closing and end their sessions.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);

        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            let _ = task.await;
        }

        self.router.close_all();
        self.presence.clear();
        info!("Engine shut down");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Run `tick` every `period` until shutdown or until the engine is dropped.
fn spawn_sweep(
    engine: &Arc<Engine>,
    period: Duration,
    tick: impl Fn(&Engine) + Send + 'static,
) -> JoinHandle<()> {
    let weak: Weak<Engine> = Arc::downgrade(engine);
    let mut shutdown = engine.shutdown.subscribe();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(engine) = weak.upgrade() else { break };
                    tick(engine.as_ref());
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}
