//! Broadcast routing for Huddle.
//!
//! Every live connection registers a bounded outbox. A broadcast reads the
//! room's member set at call time and offers the event to each member's outbox.
//!
//! Delivery is at-most-once and best-effort: an event that does not fit in a
//! member's outbox, or whose member has just gone away, is dropped for that
//! member only. Nothing is retried and no error reaches the caller.

use crate::registry::RoomRegistry;
use crate::session::ConnectionId;
use dashmap::DashMap;
use huddle_protocol::{RoomId, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Default number of events queued per connection before drops begin.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Receiving half of a connection's outbox.
pub type OutboxReceiver = mpsc::Receiver<Arc<ServerEvent>>;

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Members the event was queued for.
    pub delivered: usize,
    /// Members the event could not be queued for.
    pub dropped: usize,
}

/// The broadcast router.
#[derive(Debug)]
pub struct BroadcastRouter {
    registry: Arc<RoomRegistry>,
    outboxes: DashMap<ConnectionId, mpsc::Sender<Arc<ServerEvent>>>,
    capacity: usize,
}

impl BroadcastRouter {
    /// Create a router over `registry` with the given outbox capacity.
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            outboxes: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a connection and return the receiving end of its outbox.
    ///
    /// Registering an id again replaces its previous outbox.
    pub fn register(&self, connection: &ConnectionId) -> OutboxReceiver {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.outboxes.insert(connection.clone(), tx);
        rx
    }

    /// Remove a connection's outbox. Its receiver drains and then closes.
    pub fn unregister(&self, connection: &ConnectionId) -> bool {
        self.outboxes.remove(connection).is_some()
    }

    /// Drop every outbox.
    pub fn close_all(&self) {
        self.outboxes.clear();
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    /// Queue an event for a single connection.
    ///
    /// Returns `false` if the connection is unknown, gone, or its outbox is full.
    pub fn send_to(&self, connection: &ConnectionId, event: Arc<ServerEvent>) -> bool {
        let Some(outbox) = self.outboxes.get(connection).map(|o| o.clone()) else {
            trace!(connection = %connection, "No outbox for connection");
            return false;
        };
        match outbox.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(connection = %connection, event = event.kind(), "Outbox full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                trace!(connection = %connection, event = event.kind(), "Outbox closed");
                false
            }
        }
    }

    /// Deliver an event to every current member of `room`, except `exclude`.
    pub fn broadcast(
        &self,
        room: &RoomId,
        event: ServerEvent,
        exclude: Option<&ConnectionId>,
    ) -> Delivery {
        let event = Arc::new(event);
        let mut delivery = Delivery::default();

        for member in self.registry.members(room) {
            if Some(&member) == exclude {
                continue;
            }
            if self.send_to(&member, Arc::clone(&event)) {
                delivery.delivered += 1;
            } else {
                delivery.dropped += 1;
            }
        }

        trace!(
            room = %room,
            event = event.kind(),
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "Broadcast"
        );
        delivery
    }
}
