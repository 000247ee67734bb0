//! Room actor - one task per room
//!
//! The actor exclusively owns its [`RoomSession`] and the outbound senders of
//! its members. Commands are processed one at a time and their events are
//! queued before the next command is read, so every member observes the
//! same order. Queuing never waits: a member whose queue is full is cut off
//! and treated as dropped. Once the session closes the actor unregisters
//! itself and exits.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use watchparty_core::{
    ConnectionId, EpisodePointer, Error as RoomError, Outbound, ResumeToken, RoomCode,
    RoomRegistry, RoomSession,
};

use crate::protocol::ServerMessage;

/// Registry shared by all connections
pub type SharedRegistry = Arc<Mutex<RoomRegistry<RoomHandle>>>;

/// Pending commands per room
const COMMAND_QUEUE: usize = 128;

/// Outbound queue of one connection, as rooms see it
#[derive(Debug, Clone)]
pub struct PeerSender {
    tx: mpsc::Sender<ServerMessage>,
    evicted: Arc<Notify>,
}

impl PeerSender {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            tx,
            evicted: Arc::new(Notify::new()),
        }
    }

    /// Queue a frame, waiting for space. Only the owning connection does this.
    pub async fn send(&self, msg: ServerMessage) -> bool {
        self.tx.send(msg).await.is_ok()
    }

    /// Signalled once a room has cut this connection off
    pub fn eviction(&self) -> Arc<Notify> {
        self.evicted.clone()
    }

    fn try_send(&self, msg: ServerMessage) -> Result<(), TrySendError<ServerMessage>> {
        self.tx.try_send(msg)
    }

    fn evict(&self) {
        // Stored as a permit when nobody is waiting yet
        self.evicted.notify_one();
    }
}

/// When a new member starts receiving its room's events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Open,
    /// Events are buffered until [`RoomHandle::activate`], so the member can
    /// leave its previous room first
    Held,
}

type Reply = oneshot::Sender<watchparty_core::Result<()>>;

enum RoomCommand {
    Join {
        connection_id: ConnectionId,
        nickname: String,
        resume: Option<ResumeToken>,
        tx: PeerSender,
        admission: Admission,
        reply: Reply,
    },
    Activate {
        connection_id: ConnectionId,
    },
    Leave {
        connection_id: ConnectionId,
        reply: Reply,
    },
    Chat {
        connection_id: ConnectionId,
        message: String,
        reply: Reply,
    },
    ChangeEpisode {
        connection_id: ConnectionId,
        episode: EpisodePointer,
        reply: Reply,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
}

/// Handle to a running room actor
#[derive(Debug, Clone)]
pub struct RoomHandle {
    code: RoomCode,
    instance: Uuid,
    tx: mpsc::Sender<RoomCommand>,
}

impl std::fmt::Debug for RoomCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoomCommand::Join { .. } => "Join",
            RoomCommand::Activate { .. } => "Activate",
            RoomCommand::Leave { .. } => "Leave",
            RoomCommand::Chat { .. } => "Chat",
            RoomCommand::ChangeEpisode { .. } => "ChangeEpisode",
            RoomCommand::Disconnect { .. } => "Disconnect",
        };
        f.write_str(name)
    }
}

impl RoomHandle {
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub async fn join(
        &self,
        connection_id: ConnectionId,
        nickname: String,
        resume: Option<ResumeToken>,
        tx: PeerSender,
        admission: Admission,
    ) -> watchparty_core::Result<()> {
        self.request(|reply| RoomCommand::Join {
            connection_id,
            nickname,
            resume,
            tx,
            admission,
            reply,
        })
        .await
    }

    /// Release events held back since a [`Admission::Held`] entry
    pub async fn activate(&self, connection_id: ConnectionId) {
        self.notify(RoomCommand::Activate { connection_id }).await;
    }

    pub async fn leave(&self, connection_id: ConnectionId) -> watchparty_core::Result<()> {
        self.request(|reply| RoomCommand::Leave {
            connection_id,
            reply,
        })
        .await
    }

    pub async fn chat(
        &self,
        connection_id: ConnectionId,
        message: String,
    ) -> watchparty_core::Result<()> {
        self.request(|reply| RoomCommand::Chat {
            connection_id,
            message,
            reply,
        })
        .await
    }

    pub async fn change_episode(
        &self,
        connection_id: ConnectionId,
        episode: EpisodePointer,
    ) -> watchparty_core::Result<()> {
        self.request(|reply| RoomCommand::ChangeEpisode {
            connection_id,
            episode,
            reply,
        })
        .await
    }

    /// Connection dropped; the room decides whether to hold the member
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        self.notify(RoomCommand::Disconnect { connection_id }).await;
    }

    async fn notify(&self, command: RoomCommand) {
        if self.tx.send(command).await.is_err() {
            debug!(room = %self.code, "Room already closed");
        }
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> RoomCommand,
    ) -> watchparty_core::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        // A closed actor means the room is gone
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| RoomError::RoomNotFound(self.code.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::RoomNotFound(self.code.clone()))?
    }
}

/// Start the actor for a freshly created session.
///
/// `initial` holds the creator's ack, delivered before any other command.
pub fn spawn_room(
    session: RoomSession,
    creator: ConnectionId,
    creator_tx: PeerSender,
    admission: Admission,
    initial: Vec<Outbound>,
    registry: SharedRegistry,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let handle = RoomHandle {
        code: session.code().clone(),
        instance: Uuid::new_v4(),
        tx,
    };

    let mut peers = HashMap::new();
    peers.insert(creator, Peer::new(creator_tx, admission));

    let actor = RoomActor {
        session,
        peers,
        rx,
        registry,
        instance: handle.instance,
    };
    tokio::spawn(actor.run(initial));
    handle
}

/// A member's connection as tracked by its room
enum Peer {
    Live(PeerSender),
    Held {
        tx: PeerSender,
        backlog: Vec<ServerMessage>,
    },
}

impl Peer {
    fn new(tx: PeerSender, admission: Admission) -> Self {
        match admission {
            Admission::Open => Peer::Live(tx),
            Admission::Held => Peer::Held {
                tx,
                backlog: Vec::new(),
            },
        }
    }

    fn sender(&self) -> &PeerSender {
        match self {
            Peer::Live(tx) | Peer::Held { tx, .. } => tx,
        }
    }
}

struct RoomActor {
    session: RoomSession,
    peers: HashMap<ConnectionId, Peer>,
    rx: mpsc::Receiver<RoomCommand>,
    registry: SharedRegistry,
    instance: Uuid,
}

impl RoomActor {
    async fn run(mut self, initial: Vec<Outbound>) {
        let code = self.session.code().clone();
        debug!(room = %code, "Room actor started");
        self.deliver(initial);

        while !self.session.is_closed() {
            let deadline = self.session.next_deadline();
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = wait_until(deadline) => {
                    let outbound = self.session.expire(Instant::now().into_std());
                    self.deliver(outbound);
                }
            }
        }

        let instance = self.instance;
        self.registry
            .lock()
            .await
            .remove_if(&code, |handle| handle.instance == instance);
        info!(room = %code, "Room actor stopped");
    }

    fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                connection_id,
                nickname,
                resume,
                tx,
                admission,
                reply,
            } => {
                let replaced = resume
                    .as_ref()
                    .and_then(|token| self.session.token_holder(token))
                    .filter(|old| *old != connection_id);
                let result = match self.session.join(connection_id, &nickname, resume) {
                    Ok(outbound) => {
                        if let Some(old) = replaced.filter(|old| !self.session.contains(*old)) {
                            info!(
                                room = %self.session.code(),
                                old = %old,
                                new = %connection_id,
                                "Slot resumed from a new connection, closing the old one"
                            );
                            self.cut_off(old);
                        }
                        self.peers.insert(connection_id, Peer::new(tx, admission));
                        self.deliver(outbound);
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            RoomCommand::Activate { connection_id } => {
                let Some(Peer::Held { tx, backlog }) = self.peers.remove(&connection_id) else {
                    return;
                };
                self.peers.insert(connection_id, Peer::Live(tx));
                for msg in backlog {
                    let dropped = self.send_to(connection_id, msg);
                    self.deliver(dropped);
                }
            }
            RoomCommand::Leave {
                connection_id,
                reply,
            } => {
                let result = match self.session.leave(connection_id) {
                    Ok(outbound) => {
                        // The leaver still gets its ack
                        self.deliver(outbound);
                        self.peers.remove(&connection_id);
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            RoomCommand::Chat {
                connection_id,
                message,
                reply,
            } => {
                let result = self.session.send_chat(connection_id, &message);
                let _ = reply.send(self.deliver_result(result));
            }
            RoomCommand::ChangeEpisode {
                connection_id,
                episode,
                reply,
            } => {
                let result = self.session.change_episode(connection_id, episode);
                let _ = reply.send(self.deliver_result(result));
            }
            RoomCommand::Disconnect { connection_id } => {
                self.peers.remove(&connection_id);
                let outbound = self.session.disconnect(connection_id, Instant::now().into_std());
                self.deliver(outbound);
            }
        }
    }

    fn deliver_result(
        &mut self,
        result: watchparty_core::Result<Vec<Outbound>>,
    ) -> watchparty_core::Result<()> {
        let outbound = result?;
        self.deliver(outbound);
        Ok(())
    }

    /// Queue events in order to their recipients
    fn deliver(&mut self, outbound: Vec<Outbound>) {
        let mut pending = VecDeque::from(outbound);
        while let Some(Outbound { to, event }) = pending.pop_front() {
            let msg = ServerMessage::from(event);
            for connection_id in to {
                // Dropping a peer yields more events, sent after this one
                pending.extend(self.send_to(connection_id, msg.clone()));
            }
        }
    }

    /// Queue one frame for a peer; returns the events of dropping it if its
    /// queue is full
    fn send_to(&mut self, connection_id: ConnectionId, msg: ServerMessage) -> Vec<Outbound> {
        let result = match self.peers.get_mut(&connection_id) {
            None => return Vec::new(),
            Some(Peer::Held { backlog, .. }) => {
                backlog.push(msg);
                return Vec::new();
            }
            Some(Peer::Live(tx)) => tx.try_send(msg),
        };

        match result {
            Ok(()) => Vec::new(),
            Err(TrySendError::Full(_)) => {
                warn!(
                    room = %self.session.code(),
                    connection_id = %connection_id,
                    "Peer not keeping up, dropping it"
                );
                self.cut_off(connection_id);
                self.session
                    .disconnect(connection_id, Instant::now().into_std())
            }
            Err(TrySendError::Closed(_)) => {
                // Connection is closing; its disconnect is on the way
                debug!(
                    room = %self.session.code(),
                    connection_id = %connection_id,
                    "Peer queue closed"
                );
                self.peers.remove(&connection_id);
                Vec::new()
            }
        }
    }

    /// Stop sending to a peer and make its connection close
    fn cut_off(&mut self, connection_id: ConnectionId) {
        if let Some(peer) = self.peers.remove(&connection_id) {
            peer.sender().evict();
        }
    }
}

/// Session deadlines are taken from the tokio clock, so they convert back exactly
async fn wait_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
