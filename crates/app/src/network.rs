//! Network management for the app
//!
//! The [`ConnectionManager`] owns the one connection to the coordination
//! server. Transient loss triggers bounded reconnection with backoff; a
//! deliberate disconnect (ours or the server's) does not, and neither does a
//! reconnect attempt the server answers with something other than a welcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use watchparty_core::{ConnectionId, RoomLimits};
use watchparty_net::{Client, ClientEvent, ClientMessage, ServerMessage};

use crate::session::Outbox;

/// Network connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    /// Not connected
    Offline,
    /// Attempting the first connection
    Connecting,
    /// Connected to the server
    Connected,
    /// Reconnecting after transient loss (with backoff)
    Reconnecting,
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (0-based): doubles, capped
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Events from the network layer to the session
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// Connection state changed
    StateChanged(NetworkState),
    /// A connection (first or reconnected) is up
    Connected {
        connection_id: ConnectionId,
        limits: RoomLimits,
    },
    /// Received a server message
    Message(ServerMessage),
    /// Connecting failed or reconnection gave up
    ConnectionFailed(String),
    /// Connection ended; `deliberate` is false for transient loss
    Disconnected { deliberate: bool },
}

enum NetworkCommand {
    Connect { server: String },
    Send(ClientMessage),
    Disconnect,
}

/// Network manager handle
pub struct ConnectionManager {
    state: Arc<RwLock<NetworkState>>,
    event_rx: mpsc::Receiver<NetworkEvent>,
    cmd_tx: mpsc::Sender<NetworkCommand>,
}

/// Cloneable sending side of a [`ConnectionManager`]
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<NetworkCommand>,
}

impl Outbox for ConnectionHandle {
    fn send(&mut self, msg: ClientMessage) -> watchparty_net::Result<()> {
        self.cmd_tx
            .try_send(NetworkCommand::Send(msg))
            .map_err(|_| watchparty_net::Error::NotConnected)
    }
}

impl ConnectionManager {
    /// Create a manager and spawn its network task
    pub fn new(policy: ReconnectPolicy) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let state = Arc::new(RwLock::new(NetworkState::Offline));
        tokio::spawn(network_task(state.clone(), policy, event_tx, cmd_rx));

        Self {
            state,
            event_rx,
            cmd_tx,
        }
    }

    /// Get the next network event
    pub async fn next_event(&mut self) -> Option<NetworkEvent> {
        self.event_rx.recv().await
    }

    /// Connect to `host:port`
    pub async fn connect(&self, server: String) -> Result<(), &'static str> {
        self.cmd_tx
            .send(NetworkCommand::Connect { server })
            .await
            .map_err(|_| "Network task not running")
    }

    /// Deliberately disconnect; also cancels reconnection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(NetworkCommand::Disconnect).await;
    }

    /// Get current network state
    pub async fn state(&self) -> NetworkState {
        *self.state.read().await
    }

    /// Sending side for the session client
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            cmd_tx: self.cmd_tx.clone(),
        }
    }
}

/// Result of a reconnect loop
enum Reconnect {
    Connected(Client),
    GaveUp(String),
    Cancelled,
}

/// Main network task
async fn network_task(
    state: Arc<RwLock<NetworkState>>,
    policy: ReconnectPolicy,
    event_tx: mpsc::Sender<NetworkEvent>,
    mut cmd_rx: mpsc::Receiver<NetworkCommand>,
) {
    let mut client: Option<Client> = None;
    let mut server: Option<String> = None;

    loop {
        tokio::select! {
            // Handle commands
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(NetworkCommand::Connect { server: addr }) => {
                        if let Some(old) = client.take() {
                            old.disconnect().await;
                        }
                        set_state(&state, &event_tx, NetworkState::Connecting).await;
                        match connect_once(&addr).await {
                            Ok(c) => {
                                announce_connected(&state, &event_tx, &c).await;
                                client = Some(c);
                            }
                            Err(e) => {
                                warn!(server = %addr, error = %e, "Connection failed");
                                set_state(&state, &event_tx, NetworkState::Offline).await;
                                let _ = event_tx
                                    .send(NetworkEvent::ConnectionFailed(format!(
                                        "Could not connect to {}: {}",
                                        addr, e
                                    )))
                                    .await;
                            }
                        }
                        server = Some(addr);
                    }
                    Some(NetworkCommand::Send(msg)) => match &client {
                        Some(c) => {
                            if let Err(e) = c.send(msg).await {
                                warn!(error = %e, "Failed to send message");
                            }
                        }
                        None => debug!("Dropping message while offline"),
                    },
                    Some(NetworkCommand::Disconnect) => {
                        if let Some(c) = client.take() {
                            c.disconnect().await;
                        }
                        set_state(&state, &event_tx, NetworkState::Offline).await;
                        let _ = event_tx
                            .send(NetworkEvent::Disconnected { deliberate: true })
                            .await;
                    }
                    None => {
                        debug!("Network command channel closed");
                        break;
                    }
                }
            }

            // Poll client events if connected
            event = async {
                match client.as_mut() {
                    Some(c) => c.next_event().await,
                    None => std::future::pending().await,
                }
            } => {
                let deliberate = match event {
                    Some(ClientEvent::Message(msg)) => {
                        let _ = event_tx.send(NetworkEvent::Message(msg)).await;
                        continue;
                    }
                    Some(ClientEvent::Disconnected(reason)) => {
                        info!(reason = ?reason, "Connection ended");
                        reason.is_deliberate()
                    }
                    None => false,
                };
                client = None;

                let _ = event_tx
                    .send(NetworkEvent::Disconnected { deliberate })
                    .await;
                if deliberate {
                    set_state(&state, &event_tx, NetworkState::Offline).await;
                    continue;
                }

                let Some(addr) = server.clone() else {
                    set_state(&state, &event_tx, NetworkState::Offline).await;
                    continue;
                };
                match reconnect_loop(&addr, &policy, &state, &event_tx, &mut cmd_rx).await {
                    Reconnect::Connected(c) => {
                        announce_connected(&state, &event_tx, &c).await;
                        client = Some(c);
                    }
                    Reconnect::GaveUp(reason) => {
                        set_state(&state, &event_tx, NetworkState::Offline).await;
                        let _ = event_tx.send(NetworkEvent::ConnectionFailed(reason)).await;
                    }
                    Reconnect::Cancelled => {
                        set_state(&state, &event_tx, NetworkState::Offline).await;
                        let _ = event_tx
                            .send(NetworkEvent::Disconnected { deliberate: true })
                            .await;
                    }
                }
            }
        }
    }
}

/// Reconnect with backoff; a `Disconnect` command cancels it
async fn reconnect_loop(
    addr: &str,
    policy: &ReconnectPolicy,
    state: &Arc<RwLock<NetworkState>>,
    event_tx: &mpsc::Sender<NetworkEvent>,
    cmd_rx: &mut mpsc::Receiver<NetworkCommand>,
) -> Reconnect {
    set_state(state, event_tx, NetworkState::Reconnecting).await;

    for attempt in 0..policy.attempts {
        let delay = policy.delay(attempt);
        info!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Reconnect backoff"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(NetworkCommand::Disconnect) | None => {
                        info!("Reconnect cancelled");
                        return Reconnect::Cancelled;
                    }
                    Some(NetworkCommand::Connect { server }) => {
                        debug!(server = %server, "Ignoring connect while reconnecting");
                    }
                    Some(NetworkCommand::Send(_)) => {
                        debug!("Dropping message while reconnecting");
                    }
                }
            }
        }

        match connect_once(addr).await {
            Ok(client) => {
                info!(attempt = attempt + 1, "Reconnect successful");
                return Reconnect::Connected(client);
            }
            Err(e) if e.is_transient() => debug!(error = %e, "Reconnect attempt failed"),
            Err(e) => {
                warn!(error = %e, "Server refused the reconnect");
                return Reconnect::GaveUp(format!("Could not reconnect: {}", e));
            }
        }
    }

    warn!(attempts = policy.attempts, "Giving up on reconnecting");
    Reconnect::GaveUp(format!(
        "Could not reconnect after {} attempts",
        policy.attempts
    ))
}

/// Resolve `host:port` and connect
async fn connect_once(addr: &str) -> watchparty_net::Result<Client> {
    let socket_addr = tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
        watchparty_net::Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("No address found for {}", addr),
        ))
    })?;
    Client::connect(socket_addr).await
}

async fn announce_connected(
    state: &Arc<RwLock<NetworkState>>,
    event_tx: &mpsc::Sender<NetworkEvent>,
    client: &Client,
) {
    set_state(state, event_tx, NetworkState::Connected).await;
    let _ = event_tx
        .send(NetworkEvent::Connected {
            connection_id: client.connection_id(),
            limits: client.limits().clone(),
        })
        .await;
}

async fn set_state(
    state: &Arc<RwLock<NetworkState>>,
    event_tx: &mpsc::Sender<NetworkEvent>,
    new_state: NetworkState,
) {
    *state.write().await = new_state;
    let _ = event_tx.send(NetworkEvent::StateChanged(new_state)).await;
}
