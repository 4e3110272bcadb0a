//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use huddle_core::{Engine, EngineStats};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "huddle_connections_rejected_total";
    pub const EVENTS_INBOUND: &str = "huddle_events_inbound_total";
    pub const EVENTS_DROPPED: &str = "huddle_events_dropped_total";
    pub const FRAMES_OUTBOUND: &str = "huddle_frames_outbound_total";
    pub const FRAMES_OUTBOUND_BYTES: &str = "huddle_frames_outbound_bytes";
    pub const MESSAGES_PERSISTED: &str = "huddle_messages_persisted_total";
    pub const ROOMS_CREATED: &str = "huddle_rooms_created_total";
    pub const ROOMS_ACTIVE: &str = "huddle_rooms_active";
    pub const TYPERS_ACTIVE: &str = "huddle_typers_active";
    pub const EVENT_LATENCY_SECONDS: &str = "huddle_event_latency_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused at the connection limit"
    );
    metrics::describe_counter!(names::EVENTS_INBOUND, "Client events received, by kind");
    metrics::describe_counter!(
        names::EVENTS_DROPPED,
        "Client events dropped at the boundary, by reason"
    );
    metrics::describe_counter!(names::FRAMES_OUTBOUND, "Frames sent to clients");
    metrics::describe_counter!(names::FRAMES_OUTBOUND_BYTES, "Bytes sent to clients");
    metrics::describe_counter!(names::MESSAGES_PERSISTED, "Chat messages accepted");
    metrics::describe_counter!(names::ROOMS_CREATED, "Rooms created through the HTTP API");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms held in the registry");
    metrics::describe_gauge!(names::TYPERS_ACTIVE, "Live typing entries");
    metrics::describe_histogram!(
        names::EVENT_LATENCY_SECONDS,
        "Client event handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a connection refused at the limit.
pub fn record_rejected_connection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record an inbound event.
pub fn record_inbound(kind: &'static str) {
    counter!(names::EVENTS_INBOUND, "kind" => kind).increment(1);
}

/// Record an inbound event dropped before reaching the session.
pub fn record_dropped(reason: &'static str) {
    counter!(names::EVENTS_DROPPED, "reason" => reason).increment(1);
}

/// Record an outbound frame.
pub fn record_outbound(kind: &'static str, bytes: usize) {
    counter!(names::FRAMES_OUTBOUND, "kind" => kind).increment(1);
    counter!(names::FRAMES_OUTBOUND_BYTES).increment(bytes as u64);
}

/// Record an accepted chat message.
pub fn record_message_persisted() {
    counter!(names::MESSAGES_PERSISTED).increment(1);
}

/// Record a room created through the HTTP API.
pub fn record_room_created() {
    counter!(names::ROOMS_CREATED).increment(1);
}

/// Record event handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::EVENT_LATENCY_SECONDS).record(seconds);
}

/// Publish engine gauges.
pub fn set_engine_stats(stats: EngineStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.rooms as f64);
    gauge!(names::TYPERS_ACTIVE).set(stats.typing as f64);
}

/// Publish engine gauges every `period` until the engine is dropped.
pub fn spawn_engine_stats(engine: &Arc<Engine>, period: Duration) -> JoinHandle<()> {
    let engine = Arc::downgrade(engine);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let Some(engine) = engine.upgrade() else { break };
            set_engine_stats(engine.stats());
        }
    })
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
