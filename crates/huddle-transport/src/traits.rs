//! Client transport traits for Huddle.
//!
//! A [`Connector`] opens connections; a [`Connection`] carries client events
//! up and server events down. The reconnecting client only sees these traits,
//! so any transport that speaks the event contract can sit underneath it.

use async_trait::async_trait;
use huddle_protocol::{ClientEvent, ProtocolError, ServerEvent};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Could not establish a connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Something that can open connections to a Huddle server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection.
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// An open client connection.
#[async_trait]
pub trait Connection: Send {
    /// Receive the next server event.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<ServerEvent>, TransportError>;

    /// Send a client event.
    async fn send(&mut self, event: &ClientEvent) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
