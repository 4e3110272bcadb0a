//! Reconnecting client.
//!
//! [`ReconnectingClient`] owns a [`ClientSession`] on a background task and
//! keeps a connection open through a [`Connector`], retrying forever with
//! [`Backoff`]. Every successful connect re-issues `join_room` for the
//! current room, since the server keeps nothing across a disconnect.

use huddle_core::{Backoff, ClientSession, ConnectionStatus};
use huddle_protocol::{ClientEvent, RoomId, ServerEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::traits::{Connection, Connector, TransportError};

const CHANNEL_CAPACITY: usize = 256;

/// Something the client driver reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientUpdate {
    /// Connection status changed.
    Status(ConnectionStatus),
    /// An event arrived from the server.
    Event(ServerEvent),
}

#[derive(Debug)]
enum ClientCommand {
    Join(RoomId),
    Leave,
    Send(String),
    Input,
    Close,
}

/// A chat client that survives disconnects.
#[derive(Debug)]
pub struct ReconnectingClient {
    commands: mpsc::Sender<ClientCommand>,
    updates: mpsc::Receiver<ClientUpdate>,
    task: JoinHandle<ClientSession>,
}

impl ReconnectingClient {
    /// Start driving `session` over connections from `connector`.
    pub fn spawn(
        connector: impl Connector + 'static,
        session: ClientSession,
        backoff: Backoff,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (update_tx, updates) = mpsc::channel(CHANNEL_CAPACITY);

        let driver = Driver {
            connector: Box::new(connector),
            session,
            backoff,
            commands: command_rx,
            updates: update_tx,
        };
        let task = tokio::spawn(driver.run());

        Self {
            commands,
            updates,
            task,
        }
    }

    async fn command(&self, command: ClientCommand) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Move to `room`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has been closed.
    pub async fn join(&self, room: RoomId) -> Result<(), TransportError> {
        self.command(ClientCommand::Join(room)).await
    }

    /// Leave the current room.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has been closed.
    pub async fn leave(&self) -> Result<(), TransportError> {
        self.command(ClientCommand::Leave).await
    }

    /// Post a message to the current room.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has been closed.
    pub async fn send(&self, content: impl Into<String>) -> Result<(), TransportError> {
        self.command(ClientCommand::Send(content.into())).await
    }

    /// Report a keystroke; typing signals are debounced.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has been closed.
    pub async fn input(&self) -> Result<(), TransportError> {
        self.command(ClientCommand::Input).await
    }

    /// Wait for the next status change or server event.
    pub async fn next_update(&mut self) -> Option<ClientUpdate> {
        self.updates.recv().await
    }

    /// Wait for the next server event, skipping status changes.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        loop {
            if let ClientUpdate::Event(event) = self.updates.recv().await? {
                return Some(event);
            }
        }
    }

    /// Close the connection and return the final session state.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver task panicked.
    pub async fn close(self) -> Result<ClientSession, TransportError> {
        let _ = self.commands.send(ClientCommand::Close).await;
        drop(self.updates);
        self.task
            .await
            .map_err(|e| TransportError::Other(format!("Client task failed: {}", e)))
    }
}

/// Why a connected period ended.
enum Exit {
    Reconnect,
    Close,
}

struct Driver {
    connector: Box<dyn Connector>,
    session: ClientSession,
    backoff: Backoff,
    commands: mpsc::Receiver<ClientCommand>,
    updates: mpsc::Sender<ClientUpdate>,
}

impl Driver {
    async fn run(mut self) -> ClientSession {
        loop {
            self.status(ConnectionStatus::Connecting).await;

            match self.connector.connect().await {
                Ok(mut conn) => {
                    self.backoff.reset();
                    let exit = self.connected(conn.as_mut()).await;
                    if let Err(e) = conn.close().await {
                        debug!(error = %e, "Close after disconnect failed");
                    }
                    self.status(ConnectionStatus::Disconnected).await;
                    if matches!(exit, Exit::Close) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(transport = self.connector.name(), error = %e, "Connect failed");
                    self.status(ConnectionStatus::Disconnected).await;
                }
            }

            let delay = self.backoff.next_delay();
            debug!(?delay, attempt = self.backoff.attempts(), "Reconnecting");
            if matches!(self.wait(delay).await, Exit::Close) {
                break;
            }
        }

        info!("Client closed");
        self.session
    }

    async fn status(&mut self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connecting => self.session.connecting(),
            ConnectionStatus::Disconnected => self.session.disconnected(),
            ConnectionStatus::Connected => {}
        }
        let _ = self.updates.send(ClientUpdate::Status(status)).await;
    }

    /// Sit out a backoff delay, still taking commands.
    async fn wait(&mut self, delay: Duration) -> Exit {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return Exit::Reconnect,
                command = self.commands.recv() => match command {
                    Some(ClientCommand::Close) | None => return Exit::Close,
                    // Disconnected: these only update local state.
                    Some(command) => {
                        self.apply(command);
                    }
                },
            }
        }
    }

    async fn connected(&mut self, conn: &mut dyn Connection) -> Exit {
        let rejoin = self.session.connected();
        let _ = self
            .updates
            .send(ClientUpdate::Status(ConnectionStatus::Connected))
            .await;
        if send_all(conn, rejoin).await.is_err() {
            return Exit::Reconnect;
        }

        loop {
            let deadline = self.session.deadline();
            let idle_check = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                command = self.commands.recv() => {
                    let events = match command {
                        Some(ClientCommand::Close) | None => return Exit::Close,
                        Some(command) => self.apply(command),
                    };
                    if send_all(conn, events).await.is_err() {
                        return Exit::Reconnect;
                    }
                }
                received = conn.recv() => match received {
                    Ok(Some(event)) => {
                        self.session.apply(event.clone(), Instant::now());
                        let _ = self.updates.send(ClientUpdate::Event(event)).await;
                    }
                    Ok(None) => {
                        debug!("Server closed the connection");
                        return Exit::Reconnect;
                    }
                    Err(e) => {
                        warn!(error = %e, "Receive failed");
                        return Exit::Reconnect;
                    }
                },
                _ = sleep_until(idle_check), if deadline.is_some() => {
                    let stop = self.session.tick(Instant::now());
                    if send_all(conn, stop).await.is_err() {
                        return Exit::Reconnect;
                    }
                }
            }
        }
    }

    fn apply(&mut self, command: ClientCommand) -> Vec<ClientEvent> {
        match command {
            ClientCommand::Join(room) => self.session.join(room),
            ClientCommand::Leave => self.session.leave().into_iter().collect(),
            ClientCommand::Send(content) => self.session.send(&content).into_iter().collect(),
            ClientCommand::Input => self.session.input(Instant::now()).into_iter().collect(),
            ClientCommand::Close => Vec::new(),
        }
    }
}

async fn send_all(
    conn: &mut dyn Connection,
    events: impl IntoIterator<Item = ClientEvent>,
) -> Result<(), TransportError> {
    for event in events {
        if let Err(e) = conn.send(&event).await {
            warn!(event = event.kind(), error = %e, "Send failed");
            return Err(e);
        }
    }
    Ok(())
}
