//! WebSocket client transport.
//!
//! JSON events travel in text frames; MessagePack events travel in binary
//! frames with the codec's length prefix. The server answers in whichever
//! encoding the client last used.

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{codec, ClientEvent, Encoding, ProtocolError, ServerEvent};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use crate::traits::{Connection, Connector, TransportError};

/// Default maximum inbound message size.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Opens WebSocket connections to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    encoding: Encoding,
    max_message_size: usize,
}

impl WebSocketConnector {
    /// Create a connector for `url` (e.g. `ws://127.0.0.1:8080/ws`).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            encoding: Encoding::Json,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Choose the wire encoding for outgoing events.
    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let conn = WebSocketConnection::connect(&self.url, self.encoding).await?;
        Ok(Box::new(conn.with_max_message_size(self.max_message_size)))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A client WebSocket connection.
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    encoding: Encoding,
    is_open: bool,
    read_buffer: BytesMut,
    max_message_size: usize,
}

impl WebSocketConnection {
    /// Connect to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection or the handshake fails.
    pub async fn connect(url: &str, encoding: Encoding) -> Result<Self, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        debug!(url, ?encoding, "WebSocket connected");

        Ok(Self {
            stream,
            encoding,
            is_open: true,
            read_buffer: BytesMut::with_capacity(4096),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        })
    }

    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Encoding used for outgoing events.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn closed(&mut self) -> Result<Option<ServerEvent>, TransportError> {
        self.is_open = false;
        Ok(None)
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> Result<Option<ServerEvent>, TransportError> {
        if let Some(event) = codec::decode_from(&mut self.read_buffer)? {
            return Ok(Some(event));
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > self.max_message_size {
                        return Err(ProtocolError::FrameTooLarge(text.len()).into());
                    }
                    return Ok(Some(codec::decode_json(&text)?));
                }
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > self.max_message_size {
                        warn!(
                            "Message too large: {} bytes (max: {})",
                            data.len(),
                            self.max_message_size
                        );
                        return Err(ProtocolError::FrameTooLarge(data.len()).into());
                    }

                    self.read_buffer.extend_from_slice(&data);
                    if let Some(event) = codec::decode_from(&mut self.read_buffer)? {
                        return Ok(Some(event));
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return self.closed();
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!("WebSocket stream ended");
                    return self.closed();
                }
                Some(Err(e)) => {
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send(&mut self, event: &ClientEvent) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match self.encoding {
            Encoding::Json => Message::Text(codec::encode_json(event)?),
            Encoding::MessagePack => Message::Binary(codec::encode(event)?.to_vec()),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(());
        }
        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
