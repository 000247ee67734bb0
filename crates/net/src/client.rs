//! TCP client for connecting to the coordination server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use watchparty_core::{ConnectionId, RoomLimits};

use crate::error::{Error, Result};
use crate::frame::{read_message, write_frame};
use crate::protocol::{ClientMessage, ServerMessage};

/// How long to wait for the server's welcome
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ping interval while idle
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Server is considered gone after this long without any frame
const SERVER_SILENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// This side asked to disconnect
    Requested,
    /// The server announced it is going away
    ServerShutdown,
    /// Transport failure; worth reconnecting
    Lost(String),
}

impl DisconnectReason {
    /// True when the disconnect was intended by one side
    pub fn is_deliberate(&self) -> bool {
        !matches!(self, DisconnectReason::Lost(_))
    }
}

/// Event received from the connection
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Message(ServerMessage),
    /// Always the last event of a connection
    Disconnected(DisconnectReason),
}

/// Client handle for network operations
pub struct Client {
    connection_id: ConnectionId,
    limits: RoomLimits,
    state: Arc<RwLock<ClientState>>,
    event_rx: mpsc::Receiver<ClientEvent>,
    cmd_tx: mpsc::Sender<ClientCommand>,
}

struct ClientState {
    connection: ConnectionState,
    last_seen: Instant,
}

enum ClientCommand {
    Send(ClientMessage),
    Disconnect,
}

impl Client {
    /// Connect and wait for the server's welcome
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        info!(addr = %addr, "Connecting to server");

        let stream = TcpStream::connect(addr).await?;
        let (mut reader, writer) = stream.into_split();

        let welcome: ServerMessage =
            tokio::time::timeout(HANDSHAKE_TIMEOUT, read_message(&mut reader))
                .await
                .map_err(|_| Error::Protocol("Timed out waiting for welcome".into()))??;
        let (connection_id, limits) = match welcome {
            ServerMessage::Welcome {
                connection_id,
                limits,
            } => (connection_id, limits),
            ServerMessage::ServerShutdown => {
                return Err(Error::Rejected("Server is shutting down".into()))
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Expected welcome, got {:?}",
                    other
                )))
            }
        };

        let state = Arc::new(RwLock::new(ClientState {
            connection: ConnectionState::Connected,
            last_seen: Instant::now(),
        }));

        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        tokio::spawn(connection_task(
            reader,
            writer,
            state.clone(),
            event_tx,
            cmd_rx,
        ));

        info!(connection_id = %connection_id, "Connected to server");

        Ok(Client {
            connection_id,
            limits,
            state,
            event_rx,
            cmd_tx,
        })
    }

    /// Identity the server assigned to this connection
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Limits the server announced in its welcome
    pub fn limits(&self) -> &RoomLimits {
        &self.limits
    }

    /// Get the next event; `None` after `Disconnected` has been delivered
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.event_rx.recv().await
    }

    /// Queue a message for the server
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.cmd_tx
            .send(ClientCommand::Send(msg))
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.connection
    }
}

/// Reads frames on its own task so a partially read frame is never dropped
async fn reader_task(mut reader: OwnedReadHalf, frame_tx: mpsc::Sender<Result<ServerMessage>>) {
    loop {
        let result = read_message(&mut reader).await;
        let failed = matches!(
            result,
            Err(Error::Io(_) | Error::ConnectionClosed | Error::Protocol(_))
        );
        if frame_tx.send(result).await.is_err() || failed {
            break;
        }
    }
}

/// Main connection task
async fn connection_task(
    reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    state: Arc<RwLock<ClientState>>,
    event_tx: mpsc::Sender<ClientEvent>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    let (frame_tx, mut frame_rx) = mpsc::channel(64);
    let reader_handle: JoinHandle<()> = tokio::spawn(reader_task(reader, frame_tx));

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    let reason = loop {
        tokio::select! {
            // Incoming message from server
            frame = frame_rx.recv() => {
                match frame {
                    Some(Ok(msg)) => {
                        state.write().await.last_seen = Instant::now();
                        match msg {
                            ServerMessage::ServerShutdown => {
                                info!("Server is shutting down");
                                break DisconnectReason::ServerShutdown;
                            }
                            ServerMessage::Pong => debug!("Received pong"),
                            msg => {
                                let _ = event_tx.send(ClientEvent::Message(msg)).await;
                            }
                        }
                    }
                    Some(Err(Error::Decode(e))) => {
                        warn!(error = %e, "Ignoring unreadable server message");
                    }
                    Some(Err(Error::ConnectionClosed)) | None => {
                        debug!("Server closed connection");
                        break DisconnectReason::Lost("Server closed the connection".into());
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        break DisconnectReason::Lost(e.to_string());
                    }
                }
            }

            // Outgoing command
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(msg)) => {
                        if let Err(e) = write_frame(&mut writer, &msg).await {
                            warn!(error = %e, "Write error");
                            break DisconnectReason::Lost(e.to_string());
                        }
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break DisconnectReason::Requested;
                    }
                }
            }

            // Keepalive and silence watchdog
            _ = keepalive.tick() => {
                let silent = state.read().await.last_seen.elapsed();
                if silent > SERVER_SILENT_TIMEOUT {
                    warn!(silent_ms = silent.as_millis() as u64, "Server stopped responding");
                    break DisconnectReason::Lost("Server stopped responding".into());
                }
                if let Err(e) = write_frame(&mut writer, &ClientMessage::Ping).await {
                    warn!(error = %e, "Keepalive failed");
                    break DisconnectReason::Lost(e.to_string());
                }
            }
        }
    };

    // Cleanup
    reader_handle.abort();
    drop(writer);
    state.write().await.connection = ConnectionState::Disconnected;
    let _ = event_tx.send(ClientEvent::Disconnected(reason.clone())).await;
    info!(reason = ?reason, "Disconnected from server");
}
