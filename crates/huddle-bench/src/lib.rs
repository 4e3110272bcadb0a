//! Shared setup for the Huddle benchmarks.

use huddle_core::{
    BroadcastRouter, ConnectionId, Engine, EngineConfig, MemoryStore, OutboxReceiver,
    RoomRegistry, Session,
};
use huddle_protocol::{Command, RoomId};
use std::sync::Arc;

/// Room identifier used by the benchmarks.
pub const BENCH_ROOM: &str = "bench";

/// A registry holding `members` connections in `room`, with a router whose
/// outboxes can hold `capacity` events each.
#[must_use]
pub fn populated_router(
    room: &RoomId,
    members: usize,
    capacity: usize,
) -> (BroadcastRouter, Vec<OutboxReceiver>) {
    let registry = Arc::new(RoomRegistry::new());
    let router = BroadcastRouter::new(Arc::clone(&registry), capacity);

    let receivers = (0..members)
        .map(|i| {
            let id = ConnectionId::new(format!("bench-{i}"));
            let rx = router.register(&id);
            registry.join(room, &id);
            rx
        })
        .collect();
    (router, receivers)
}

/// An engine without sweeps and `members` sessions joined to `room`.
pub async fn populated_engine(
    room: &RoomId,
    members: usize,
) -> (Arc<Engine>, Vec<(Session, OutboxReceiver)>) {
    let engine = Engine::new(EngineConfig::default(), Arc::new(MemoryStore::new()));
    let mut sessions = Vec::with_capacity(members);

    for i in 0..members {
        let (mut session, rx) = engine.connect();
        session
            .handle(Command::Join {
                room: room.clone(),
                session_id: Some(format!("anon-{i}")),
            })
            .await;
        sessions.push((session, rx));
    }
    (engine, sessions)
}

/// Discard everything queued on a receiver. Returns how many events there were.
pub fn drain(rx: &mut OutboxReceiver) -> usize {
    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    count
}
