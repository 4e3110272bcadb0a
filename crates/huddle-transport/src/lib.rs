//! # huddle-transport
//!
//! Client transport for the Huddle chat engine.
//!
//! - **Connection** - the `Connector` / `Connection` traits
//! - **WebSocket** - a tokio-tungstenite connection speaking the event contract
//! - **Reconnect** - a client that retries with backoff and rejoins its room
//!
//! ```rust,ignore
//! use huddle_core::{Backoff, ClientSession};
//! use huddle_transport::{ReconnectingClient, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new("ws://127.0.0.1:8080/ws");
//! let mut client = ReconnectingClient::spawn(connector, ClientSession::new(anon_id), Backoff::default());
//! client.join(room).await?;
//! while let Some(event) = client.next_event().await {
//!     // Render event
//! }
//! ```

pub mod reconnect;
pub mod traits;
pub mod websocket;

pub use reconnect::{ClientUpdate, ReconnectingClient};
pub use traits::{Connection, Connector, TransportError};
pub use websocket::{WebSocketConnection, WebSocketConnector};
