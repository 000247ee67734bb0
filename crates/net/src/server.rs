//! TCP server for the room coordination service
//!
//! One accept loop, one reader task and one writer task per connection, and
//! one actor task per room (see [`crate::room`]). The registry lock is held
//! only for lookup, insert and removal; all room work happens in the actors.
//!
//! A connection that sends nothing for [`CLIENT_SILENT_TIMEOUT`] is treated
//! as dropped. Clients ping well within that window.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use watchparty_core::{
    ConnectionId, EpisodePointer, Error as RoomError, ResumeToken, RoomCode, RoomLimits,
    RoomRegistry, RoomSession,
};

use crate::error::{Error, Result};
use crate::frame::{decode, read_frame, write_frame};
use crate::protocol::{ClientMessage, Request, ServerMessage};
use crate::room::{spawn_room, Admission, PeerSender, RoomHandle, SharedRegistry};

/// Outbound frames buffered per connection
const OUTBOUND_QUEUE: usize = 64;

/// Client is considered gone after this long without any frame
pub const CLIENT_SILENT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a closing connection may spend flushing queued frames
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Coordination server handle
pub struct Server {
    addr: SocketAddr,
    registry: SharedRegistry,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind and start accepting connections
    pub async fn start(bind: SocketAddr, limits: RoomLimits) -> Result<Self> {
        limits.validate()?;

        let listener = TcpListener::bind(bind).await?;
        let bound_addr = listener.local_addr()?;

        info!(
            addr = %bound_addr,
            max_rooms = limits.max_rooms,
            max_members = limits.max_members,
            "Server started"
        );

        let registry = Arc::new(Mutex::new(RoomRegistry::new(limits)));
        let (shutdown_tx, _) = broadcast::channel(1);

        tokio::spawn(accept_loop(
            listener,
            registry.clone(),
            shutdown_tx.clone(),
        ));

        Ok(Server {
            addr: bound_addr,
            registry,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of live rooms
    pub async fn room_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Stop accepting and tell every connected client
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    registry: SharedRegistry,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            registry.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    registry: SharedRegistry,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let connection_id = ConnectionId::new();
    let (mut reader, writer) = tokio::io::split(stream);

    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let mut writer_handle = tokio::spawn(writer_task(writer, rx));
    let tx = PeerSender::new(tx);
    let evicted = tx.eviction();

    info!(addr = %addr, connection_id = %connection_id, "Client connected");

    let limits = registry.lock().await.limits().clone();
    let mut conn = Connection {
        id: connection_id,
        tx,
        registry,
        room: None,
    };
    conn.send(ServerMessage::Welcome {
        connection_id,
        limits,
    })
    .await;

    loop {
        tokio::select! {
            result = tokio::time::timeout(CLIENT_SILENT_TIMEOUT, read_frame(&mut reader)) => {
                let Ok(result) = result else {
                    warn!(connection_id = %connection_id, "Client stopped responding");
                    break;
                };
                match result {
                    Ok(payload) => match decode::<ClientMessage>(&payload) {
                        Ok(msg) => conn.handle(msg).await,
                        Err(e) => {
                            // Bad payload, good framing: the stream is still in sync
                            warn!(connection_id = %connection_id, error = %e, "Malformed message");
                            conn.send(ServerMessage::protocol_error(e.to_string())).await;
                        }
                    },
                    Err(Error::ConnectionClosed) => {
                        debug!(connection_id = %connection_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = evicted.notified() => {
                info!(connection_id = %connection_id, "Connection cut off by its room");
                break;
            }
            _ = shutdown_rx.recv() => {
                conn.send(ServerMessage::ServerShutdown).await;
                break;
            }
        }
    }

    conn.close().await;
    drop(conn);

    // Writer exits once every sender is gone and the queue is flushed
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle)
        .await
        .is_err()
    {
        writer_handle.abort();
    }

    info!(connection_id = %connection_id, "Client disconnected");
}

/// Writer task - sends messages to the client
async fn writer_task<S: AsyncWrite>(mut writer: WriteHalf<S>, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Per-connection state: identity and current room
struct Connection {
    id: ConnectionId,
    tx: PeerSender,
    registry: SharedRegistry,
    room: Option<RoomHandle>,
}

impl Connection {
    async fn send(&self, msg: ServerMessage) {
        if !self.tx.send(msg).await {
            debug!(connection_id = %self.id, "Failed to queue message");
        }
    }

    async fn handle(&mut self, msg: ClientMessage) {
        let result = match msg.into_request() {
            Ok(request) => self.dispatch(request).await,
            Err(e) => Err(e),
        };

        // Errors go to the requester only
        if let Err(e) = result {
            debug!(connection_id = %self.id, error = %e, "Request rejected");
            self.send(ServerMessage::error(&e)).await;
        }
    }

    async fn dispatch(&mut self, request: Request) -> watchparty_core::Result<()> {
        match request {
            Request::Create { nickname } => self.create(nickname).await,
            Request::Join {
                code,
                nickname,
                resume,
            } => self.join(code, nickname, resume).await,
            Request::Leave { code } => self.leave(&code).await,
            Request::Chat { message } => {
                let room = self.room.as_ref().ok_or(RoomError::NotInRoom)?;
                room.chat(self.id, message).await
            }
            Request::ChangeEpisode { code, episode } => self.change_episode(&code, episode).await,
            Request::VideoAction => {
                debug!(connection_id = %self.id, "Video action ignored");
                Err(RoomError::Unsupported(
                    "Video sync is disabled; playback is independent per client".into(),
                ))
            }
            Request::Ping => {
                self.send(ServerMessage::Pong).await;
                Ok(())
            }
        }
    }

    async fn create(&mut self, nickname: String) -> watchparty_core::Result<()> {
        let id = self.id;
        let tx = self.tx.clone();
        let admission = self.admission();
        let shared = self.registry.clone();
        let mut created = None;

        let mut registry = self.registry.lock().await;
        let limits = registry.limits().clone();
        registry.create_with(|code| {
            let mut session = RoomSession::new(code.clone(), limits);
            let initial = session.create(id, &nickname)?;
            let handle = spawn_room(session, id, tx, admission, initial, shared);
            created = Some(handle.clone());
            Ok(handle)
        })?;
        drop(registry);

        if let Some(room) = created {
            self.enter(room).await;
        }
        Ok(())
    }

    async fn join(
        &mut self,
        code: RoomCode,
        nickname: String,
        resume: Option<ResumeToken>,
    ) -> watchparty_core::Result<()> {
        // Already here: the room re-sends the ack
        if let Some(room) = self.room.as_ref().filter(|r| r.code() == &code) {
            return room
                .join(self.id, nickname, resume, self.tx.clone(), Admission::Open)
                .await;
        }

        let handle = self.registry.lock().await.get(&code)?.clone();
        handle
            .join(self.id, nickname, resume, self.tx.clone(), self.admission())
            .await?;
        self.enter(handle).await;
        Ok(())
    }

    async fn leave(&mut self, code: &RoomCode) -> watchparty_core::Result<()> {
        match self.room.take() {
            Some(room) if room.code() == code => room.leave(self.id).await,
            other => {
                self.room = other;
                Err(RoomError::NotInRoom)
            }
        }
    }

    async fn change_episode(
        &mut self,
        code: &RoomCode,
        episode: EpisodePointer,
    ) -> watchparty_core::Result<()> {
        match self.room.as_ref() {
            Some(room) if room.code() == code => room.change_episode(self.id, episode).await,
            _ => Err(RoomError::NotInRoom),
        }
    }

    /// A room entered while still in another one holds its events back
    /// until the old room is left
    fn admission(&self) -> Admission {
        match self.room {
            Some(_) => Admission::Held,
            None => Admission::Open,
        }
    }

    /// Switch to a room that already accepted this connection
    async fn enter(&mut self, room: RoomHandle) {
        let Some(previous) = self.room.replace(room.clone()) else {
            return;
        };
        if let Err(e) = previous.leave(self.id).await {
            debug!(connection_id = %self.id, error = %e, "Leave while switching rooms failed");
        }
        room.activate(self.id).await;
    }

    /// Connection is going away without an explicit leave
    async fn close(&mut self) {
        if let Some(room) = self.room.take() {
            room.disconnect(self.id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::read_message;
    use tokio::io::DuplexStream;
    use tokio::net::TcpStream;

    fn localhost() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    /// Serve one connection over an in-memory pipe; returns the client end
    fn serve_pipe(registry: &SharedRegistry, shutdown: &broadcast::Sender<()>) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(handle_connection(
            server,
            localhost(),
            registry.clone(),
            shutdown.subscribe(),
        ));
        client
    }

    async fn next(stream: &mut DuplexStream) -> ServerMessage {
        read_message(stream).await.unwrap()
    }

    #[tokio::test]
    async fn test_server_start() {
        let server = Server::start(localhost(), RoomLimits::default())
            .await
            .unwrap();

        assert!(server.addr().port() > 0);
        assert_eq!(server.room_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_limits_rejected() {
        let limits = RoomLimits {
            max_members: 0,
            ..RoomLimits::default()
        };
        assert!(Server::start(localhost(), limits).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let server = Server::start(localhost(), RoomLimits::default())
            .await
            .unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();

        let welcome: ServerMessage = read_message(&mut stream).await.unwrap();
        assert!(matches!(welcome, ServerMessage::Welcome { .. }));

        write_frame(&mut stream, &serde_json::json!({ "event": "teleport" }))
            .await
            .unwrap();
        let reply: ServerMessage = read_message(&mut stream).await.unwrap();
        assert!(matches!(
            reply,
            ServerMessage::Error {
                kind: watchparty_core::ErrorKind::Protocol,
                ..
            }
        ));

        // Same connection still answers
        write_frame(&mut stream, &ClientMessage::Ping).await.unwrap();
        let reply: ServerMessage = read_message(&mut stream).await.unwrap();
        assert!(matches!(reply, ServerMessage::Pong));

        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_notifies_clients() {
        let server = Server::start(localhost(), RoomLimits::default())
            .await
            .unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        let _welcome: ServerMessage = read_message(&mut stream).await.unwrap();

        server.shutdown();
        let reply: ServerMessage = read_message(&mut stream).await.unwrap();
        assert!(matches!(reply, ServerMessage::ServerShutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_host_is_dropped() {
        let registry: SharedRegistry =
            Arc::new(Mutex::new(RoomRegistry::new(RoomLimits::default())));
        let (shutdown, _) = broadcast::channel(1);
        let mut a = serve_pipe(&registry, &shutdown);
        let mut b = serve_pipe(&registry, &shutdown);

        next(&mut a).await;
        let b_id = match next(&mut b).await {
            ServerMessage::Welcome { connection_id, .. } => connection_id,
            other => panic!("expected welcome, got {:?}", other),
        };

        write_frame(&mut a, &ClientMessage::CreateRoom { nickname: "A".into() })
            .await
            .unwrap();
        let code = match next(&mut a).await {
            ServerMessage::RoomCreated { room_code, .. } => room_code,
            other => panic!("expected roomCreated, got {:?}", other),
        };
        write_frame(
            &mut b,
            &ClientMessage::JoinRoom {
                room_code: code.to_string(),
                nickname: "B".into(),
                resume_token: None,
            },
        )
        .await
        .unwrap();
        assert!(matches!(next(&mut b).await, ServerMessage::RoomJoined { .. }));

        // A's pipe stays open but carries nothing; B keeps pinging
        let mut promoted = false;
        for _ in 0..12 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            write_frame(&mut b, &ClientMessage::Ping).await.unwrap();
            loop {
                match next(&mut b).await {
                    ServerMessage::Pong => break,
                    ServerMessage::NewHost { new_host_id, .. } => {
                        promoted |= new_host_id == b_id;
                    }
                    _ => {}
                }
            }
        }
        assert!(promoted, "silent host kept the room");

        // B may now move the room; only the pong comes back
        write_frame(
            &mut b,
            &ClientMessage::ChangeEpisode {
                episode_id: "107257".into(),
                anime_id: "frieren-18542".into(),
                room_code: code.to_string(),
            },
        )
        .await
        .unwrap();
        write_frame(&mut b, &ClientMessage::Ping).await.unwrap();
        assert!(matches!(next(&mut b).await, ServerMessage::Pong));
        drop(a);
    }

    #[tokio::test]
    async fn test_welcome_reports_limits() {
        let limits = RoomLimits {
            max_message_len: 2000,
            ..RoomLimits::default()
        };
        let server = Server::start(localhost(), limits.clone()).await.unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();

        let welcome: ServerMessage = read_message(&mut stream).await.unwrap();
        match welcome {
            ServerMessage::Welcome { limits: sent, .. } => assert_eq!(sent, limits),
            other => panic!("expected welcome, got {:?}", other),
        }
        server.shutdown();
    }
}
