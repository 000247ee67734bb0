//! Session client - local room state
//!
//! Translates user intents into protocol messages and reduces network events
//! into [`SessionState`]. Reducing never has side effects beyond the state
//! itself, except the automatic rejoin after a reconnect; navigation is
//! returned as a [`NavigationRequest`] for the caller to apply.

use rand::Rng;
use tracing::{debug, info, warn};
use watchparty_core::{
    normalize_nickname, ChatMessage, ConnectionId, EpisodePointer, Error as RoomError, ErrorKind,
    MemberInfo, ResumeToken, RoomCode, RoomLimits,
};
use watchparty_net::{ClientMessage, Error, Result, ServerMessage};

use crate::navigation::NavigationRequest;
use crate::network::NetworkEvent;

/// Where intents go; the connection manager in production
pub trait Outbox {
    fn send(&mut self, msg: ClientMessage) -> Result<()>;
}

/// Enough to reclaim a member slot after reconnecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeTicket {
    pub code: RoomCode,
    pub token: ResumeToken,
}

/// Observable local state
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub is_connected: bool,
    pub connection_id: Option<ConnectionId>,
    pub nickname: String,
    pub room_code: Option<RoomCode>,
    pub is_host: bool,
    pub members: Vec<MemberInfo>,
    pub chat: Vec<ChatMessage>,
    /// Last server-reported error, for display
    pub room_error: Option<String>,
    /// Last connection failure, for display
    pub connection_error: Option<String>,
    pub current_episode: Option<EpisodePointer>,
    pub resume: Option<ResumeTicket>,
    /// As announced by the server; defaults until connected
    pub limits: RoomLimits,
}

impl SessionState {
    pub fn is_in_room(&self) -> bool {
        self.room_code.is_some()
    }

    fn clear_room(&mut self) {
        self.room_code = None;
        self.is_host = false;
        self.members.clear();
        self.chat.clear();
        self.current_episode = None;
        self.resume = None;
    }

    fn push_chat(&mut self, message: ChatMessage) {
        self.chat.push(message);
        let limit = self.limits.chat_history;
        if self.chat.len() > limit {
            let excess = self.chat.len() - limit;
            self.chat.drain(..excess);
        }
    }
}

/// `Guest-NNNN` with NNNN in 1000..=9999
pub fn default_nickname<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("Guest-{}", rng.gen_range(1000..=9999))
}

/// Intents in, state out
pub struct SessionClient<O> {
    state: SessionState,
    outbox: O,
    /// An automatic rejoin is in flight
    rejoining: bool,
    /// Episode before our last change, restored if the server refuses it
    episode_rollback: Option<Option<EpisodePointer>>,
}

impl<O: Outbox> SessionClient<O> {
    /// `nickname` falls back to a random guest name when absent or invalid
    pub fn new(outbox: O, nickname: Option<&str>) -> Self {
        let nickname = nickname
            .and_then(|n| normalize_nickname(n).ok())
            .unwrap_or_else(|| default_nickname(&mut rand::thread_rng()));
        Self {
            state: SessionState {
                nickname,
                ..SessionState::default()
            },
            outbox,
            rejoining: false,
            episode_rollback: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn set_nickname(&mut self, nickname: &str) -> Result<()> {
        self.state.nickname = normalize_nickname(nickname)?;
        Ok(())
    }

    /// Create a room with the current nickname
    pub fn create_room(&mut self) -> Result<()> {
        self.require_connected()?;
        self.outbox.send(ClientMessage::CreateRoom {
            nickname: self.state.nickname.clone(),
        })
    }

    /// Join by code; a new nickname replaces the current one
    pub fn join_room(&mut self, code: &str, nickname: Option<&str>) -> Result<()> {
        let code = RoomCode::parse(code)?;
        let nickname = match nickname {
            Some(n) => normalize_nickname(n)?,
            None => self.state.nickname.clone(),
        };
        self.require_connected()?;

        // A manual rejoin of the room we dropped out of can still resume
        let resume_token = self
            .state
            .resume
            .as_ref()
            .filter(|ticket| ticket.code == code)
            .map(|ticket| ticket.token);

        self.outbox.send(ClientMessage::JoinRoom {
            room_code: code.to_string(),
            nickname: nickname.clone(),
            resume_token,
        })?;
        self.state.nickname = nickname;
        Ok(())
    }

    /// Leave now; local room state is cleared without waiting for the ack
    pub fn leave_room(&mut self) -> Result<NavigationRequest> {
        let code = self.state.room_code.clone().ok_or(RoomError::NotInRoom)?;
        if self.state.is_connected {
            self.outbox.send(ClientMessage::LeaveRoom {
                room_code: code.to_string(),
            })?;
        }
        info!(room = %code, "Left room");
        self.clear_room();
        self.rejoining = false;
        Ok(NavigationRequest::Leave)
    }

    pub fn send_chat_message(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RoomError::Validation("Message is empty".into()).into());
        }
        let limit = self.state.limits.max_message_len;
        if text.chars().count() > limit {
            return Err(RoomError::Validation(format!(
                "Message must be at most {} characters",
                limit
            ))
            .into());
        }
        if !self.state.is_in_room() {
            return Err(RoomError::NotInRoom.into());
        }
        self.require_connected()?;
        self.outbox.send(ClientMessage::ChatMessage {
            message: text.to_string(),
        })
    }

    /// Host only: move the room to another episode. The local episode
    /// changes now and reverts if the server answers `NotHost`.
    pub fn change_episode(&mut self, anime_id: &str, episode_id: &str) -> Result<()> {
        let episode = EpisodePointer::new(anime_id, episode_id)?;
        let code = self.state.room_code.clone().ok_or(RoomError::NotInRoom)?;
        if !self.state.is_host {
            return Err(RoomError::NotHost.into());
        }
        self.require_connected()?;

        self.outbox.send(ClientMessage::ChangeEpisode {
            episode_id: episode.episode_id.clone(),
            anime_id: episode.anime_id.clone(),
            room_code: code.to_string(),
        })?;
        self.episode_rollback = Some(self.state.current_episode.replace(episode));
        Ok(())
    }

    /// Reduce one network event
    pub fn handle(&mut self, event: NetworkEvent) -> Option<NavigationRequest> {
        match event {
            NetworkEvent::StateChanged(state) => {
                debug!(state = ?state, "Network state changed");
                None
            }
            NetworkEvent::Connected {
                connection_id,
                limits,
            } => {
                self.state.is_connected = true;
                self.state.connection_id = Some(connection_id);
                self.state.limits = limits;
                self.state.connection_error = None;
                self.rejoin();
                None
            }
            NetworkEvent::Disconnected { deliberate } => {
                self.state.is_connected = false;
                self.rejoining = false;
                if deliberate {
                    self.clear_room();
                }
                None
            }
            NetworkEvent::ConnectionFailed(reason) => {
                self.state.is_connected = false;
                self.state.connection_error = Some(reason);
                None
            }
            NetworkEvent::Message(msg) => self.apply(msg),
        }
    }

    fn apply(&mut self, msg: ServerMessage) -> Option<NavigationRequest> {
        match msg {
            ServerMessage::RoomCreated {
                room_code,
                is_host,
                members,
                resume_token,
            } => {
                self.enter(room_code.clone(), is_host, members, Vec::new(), None, resume_token);
                Some(NavigationRequest::Enter {
                    code: room_code,
                    episode: None,
                })
            }
            ServerMessage::RoomJoined {
                room_code,
                is_host,
                members,
                chat,
                current_episode,
                anime_id,
                resume_token,
            } => {
                let episode = match (anime_id, current_episode) {
                    (Some(anime), Some(ep)) => EpisodePointer::new(&anime, &ep).ok(),
                    _ => None,
                };
                self.enter(
                    room_code.clone(),
                    is_host,
                    members,
                    chat,
                    episode.clone(),
                    resume_token,
                );
                Some(NavigationRequest::Enter {
                    code: room_code,
                    episode,
                })
            }
            ServerMessage::UserJoined {
                members, notice, ..
            }
            | ServerMessage::UserLeft {
                members, notice, ..
            } => {
                if self.state.is_in_room() {
                    self.state.members = members;
                    self.state.push_chat(notice);
                }
                None
            }
            ServerMessage::NewHost {
                members,
                new_host_id,
                notice,
                ..
            } => {
                if self.state.is_in_room() {
                    self.state.members = members;
                    self.state.is_host = self.state.connection_id == Some(new_host_id);
                    self.state.push_chat(notice);
                }
                None
            }
            ServerMessage::ChatMessage(message) => {
                if self.state.is_in_room() {
                    self.state.push_chat(message);
                }
                None
            }
            ServerMessage::ChangeEpisode {
                episode_id,
                anime_id,
                room_code,
            } => {
                if self.state.room_code.as_ref() != Some(&room_code) {
                    return None;
                }
                let episode = EpisodePointer::new(&anime_id, &episode_id).ok()?;
                self.episode_rollback = None;
                self.state.current_episode = Some(episode.clone());
                if self.state.is_host {
                    None
                } else {
                    Some(NavigationRequest::Follow {
                        code: room_code,
                        episode,
                    })
                }
            }
            ServerMessage::RoomLeft => {
                self.clear_room();
                None
            }
            ServerMessage::Error { kind, message } => {
                warn!(kind = ?kind, message = %message, "Server reported an error");
                if kind == ErrorKind::NotHost {
                    // Host moved on before our episode change arrived
                    self.state.is_host = false;
                    if let Some(previous) = self.episode_rollback.take() {
                        self.state.current_episode = previous;
                    }
                }
                if self.rejoining {
                    // The room we were resuming is gone
                    self.rejoining = false;
                    self.clear_room();
                }
                self.state.room_error = Some(message);
                None
            }
            ServerMessage::Welcome { .. } | ServerMessage::Pong | ServerMessage::ServerShutdown => {
                None
            }
        }
    }

    fn enter(
        &mut self,
        code: RoomCode,
        is_host: bool,
        members: Vec<MemberInfo>,
        chat: Vec<ChatMessage>,
        episode: Option<EpisodePointer>,
        token: ResumeToken,
    ) {
        info!(room = %code, is_host = is_host, "Entered room");
        self.rejoining = false;
        self.episode_rollback = None;
        self.state.room_error = None;
        self.state.is_host = is_host;
        self.state.members = members;
        self.state.chat = chat;
        self.state.current_episode = episode;
        self.state.resume = Some(ResumeTicket {
            code: code.clone(),
            token,
        });
        self.state.room_code = Some(code);
    }

    /// After a reconnect, reclaim the slot in the room we were in
    fn rejoin(&mut self) {
        let Some(ticket) = self.state.resume.clone() else {
            return;
        };
        info!(room = %ticket.code, "Rejoining room after reconnect");
        let msg = ClientMessage::JoinRoom {
            room_code: ticket.code.to_string(),
            nickname: self.state.nickname.clone(),
            resume_token: Some(ticket.token),
        };
        match self.outbox.send(msg) {
            Ok(()) => self.rejoining = true,
            Err(e) => warn!(error = %e, "Failed to send rejoin"),
        }
    }

    fn clear_room(&mut self) {
        self.episode_rollback = None;
        self.state.clear_room();
    }

    fn require_connected(&self) -> Result<()> {
        if self.state.is_connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[derive(Default)]
    struct RecordingOutbox {
        sent: Vec<ClientMessage>,
    }

    impl Outbox for RecordingOutbox {
        fn send(&mut self, msg: ClientMessage) -> Result<()> {
            self.sent.push(msg);
            Ok(())
        }
    }

    fn code() -> RoomCode {
        RoomCode::parse("K7QX2M").unwrap()
    }

    fn member(id: ConnectionId, nickname: &str, is_host: bool) -> MemberInfo {
        MemberInfo {
            id,
            nickname: nickname.into(),
            is_host,
        }
    }

    fn connected_event(connection_id: ConnectionId) -> NetworkEvent {
        NetworkEvent::Connected {
            connection_id,
            limits: RoomLimits::default(),
        }
    }

    /// Connected client with its own connection id
    fn connected() -> (SessionClient<RecordingOutbox>, ConnectionId) {
        let mut client = SessionClient::new(RecordingOutbox::default(), Some("Yui"));
        let me = ConnectionId::new();
        client.handle(connected_event(me));
        (client, me)
    }

    fn joined(client: &mut SessionClient<RecordingOutbox>, me: ConnectionId, host: ConnectionId) {
        client.handle(NetworkEvent::Message(ServerMessage::RoomJoined {
            room_code: code(),
            is_host: me == host,
            members: vec![member(host, "Host", true), member(me, "Yui", me == host)],
            chat: vec![ChatMessage::system(1, "Yui joined the room".into())],
            current_episode: None,
            anime_id: None,
            resume_token: ResumeToken::new(),
        }));
    }

    #[test]
    fn test_default_nickname() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let name = default_nickname(&mut rng);
            let n: u32 = name.strip_prefix("Guest-").unwrap().parse().unwrap();
            assert!((1000..=9999).contains(&n));
        }

        let client = SessionClient::new(RecordingOutbox::default(), Some("   "));
        assert!(client.state().nickname.starts_with("Guest-"));
    }

    #[test]
    fn test_intent_preconditions() {
        let mut offline = SessionClient::new(RecordingOutbox::default(), Some("Yui"));
        assert!(matches!(offline.create_room(), Err(Error::NotConnected)));

        let (mut client, _) = connected();
        assert!(matches!(
            client.join_room("  ", None),
            Err(Error::Room(RoomError::Validation(_)))
        ));
        assert!(matches!(
            client.join_room("K7QX2M", Some(" ")),
            Err(Error::Room(RoomError::Validation(_)))
        ));
        assert!(matches!(
            client.send_chat_message("hi"),
            Err(Error::Room(RoomError::NotInRoom))
        ));
        assert!(matches!(
            client.send_chat_message("   "),
            Err(Error::Room(RoomError::Validation(_)))
        ));
        assert!(matches!(client.leave_room(), Err(Error::Room(RoomError::NotInRoom))));
        assert!(client.outbox.sent.is_empty());
    }

    #[test]
    fn test_join_normalizes_and_sends() {
        let (mut client, _) = connected();
        client.join_room(" k7qx2m ", Some("Mio")).unwrap();

        assert_eq!(client.state().nickname, "Mio");
        match &client.outbox.sent[0] {
            ClientMessage::JoinRoom {
                room_code,
                nickname,
                resume_token,
            } => {
                assert_eq!(room_code, "K7QX2M");
                assert_eq!(nickname, "Mio");
                assert!(resume_token.is_none());
            }
            other => panic!("expected joinRoom, got {:?}", other),
        }
    }

    #[test]
    fn test_room_created() {
        let (mut client, me) = connected();
        client.create_room().unwrap();

        let nav = client.handle(NetworkEvent::Message(ServerMessage::RoomCreated {
            room_code: code(),
            is_host: true,
            members: vec![member(me, "Yui", true)],
            resume_token: ResumeToken::new(),
        }));

        let state = client.state();
        assert_eq!(state.room_code, Some(code()));
        assert!(state.is_host);
        assert_eq!(state.members.len(), 1);
        assert!(state.resume.is_some());
        assert_eq!(
            nav,
            Some(NavigationRequest::Enter {
                code: code(),
                episode: None
            })
        );
    }

    #[test]
    fn test_join_ack_with_episode_requests_navigation() {
        let (mut client, me) = connected();
        let host = ConnectionId::new();
        let nav = client.handle(NetworkEvent::Message(ServerMessage::RoomJoined {
            room_code: code(),
            is_host: false,
            members: vec![member(host, "Host", true), member(me, "Yui", false)],
            chat: Vec::new(),
            current_episode: Some("107257".into()),
            anime_id: Some("frieren-18542".into()),
            resume_token: ResumeToken::new(),
        }));

        let episode = EpisodePointer::new("frieren-18542", "107257").unwrap();
        assert_eq!(client.state().current_episode, Some(episode.clone()));
        assert_eq!(
            nav,
            Some(NavigationRequest::Enter {
                code: code(),
                episode: Some(episode)
            })
        );
    }

    #[test]
    fn test_membership_events_append_notices() {
        let (mut client, me) = connected();
        let host = ConnectionId::new();
        joined(&mut client, me, host);

        let mio = ConnectionId::new();
        client.handle(NetworkEvent::Message(ServerMessage::UserJoined {
            members: vec![
                member(host, "Host", true),
                member(me, "Yui", false),
                member(mio, "Mio", false),
            ],
            nickname: "Mio".into(),
            notice: ChatMessage::system(2, "Mio joined the room".into()),
        }));
        assert_eq!(client.state().members.len(), 3);

        client.handle(NetworkEvent::Message(ServerMessage::UserLeft {
            members: vec![member(me, "Yui", false), member(mio, "Mio", false)],
            nickname: "Host".into(),
            notice: ChatMessage::system(3, "Host left the room".into()),
        }));
        client.handle(NetworkEvent::Message(ServerMessage::NewHost {
            members: vec![member(me, "Yui", true), member(mio, "Mio", false)],
            new_host_id: me,
            new_host_nickname: "Yui".into(),
            notice: ChatMessage::system(4, "Yui is now the host".into()),
        }));

        let state = client.state();
        assert!(state.is_host);
        let notices: Vec<&str> = state.chat.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(
            notices,
            vec![
                "Yui joined the room",
                "Mio joined the room",
                "Host left the room",
                "Yui is now the host"
            ]
        );
    }

    #[test]
    fn test_error_does_not_touch_membership() {
        let (mut client, me) = connected();
        let host = ConnectionId::new();
        joined(&mut client, me, host);

        client.handle(NetworkEvent::Message(ServerMessage::Error {
            kind: ErrorKind::NotHost,
            message: "Only the host can do that".into(),
        }));
        let state = client.state();
        assert_eq!(state.room_error.as_deref(), Some("Only the host can do that"));
        assert_eq!(state.room_code, Some(code()));
        assert_eq!(state.members.len(), 2);

        // Next successful entry clears it
        joined(&mut client, me, host);
        assert!(client.state().room_error.is_none());
    }

    #[test]
    fn test_change_episode_follow_and_host_only() {
        let (mut client, me) = connected();
        let host = ConnectionId::new();
        joined(&mut client, me, host);

        assert!(matches!(
            client.change_episode("frieren-18542", "107258"),
            Err(Error::Room(RoomError::NotHost))
        ));

        let nav = client.handle(NetworkEvent::Message(ServerMessage::ChangeEpisode {
            episode_id: "107258".into(),
            anime_id: "frieren-18542".into(),
            room_code: code(),
        }));
        assert!(matches!(nav, Some(NavigationRequest::Follow { .. })));

        // Stale event for another room is ignored
        let nav = client.handle(NetworkEvent::Message(ServerMessage::ChangeEpisode {
            episode_id: "1".into(),
            anime_id: "other".into(),
            room_code: RoomCode::parse("ZZZZZZ").unwrap(),
        }));
        assert!(nav.is_none());
        assert_eq!(
            client.state().current_episode.as_ref().unwrap().episode_id,
            "107258"
        );
    }

    #[test]
    fn test_host_change_episode_sends() {
        let (mut client, me) = connected();
        joined(&mut client, me, me);

        client.change_episode("frieren-18542", "107259").unwrap();
        assert!(matches!(
            client.outbox.sent.last(),
            Some(ClientMessage::ChangeEpisode { room_code, .. }) if room_code == "K7QX2M"
        ));
    }

    #[test]
    fn test_refused_episode_change_rolls_back() {
        let (mut client, me) = connected();
        joined(&mut client, me, me);
        client.handle(NetworkEvent::Message(ServerMessage::ChangeEpisode {
            episode_id: "107257".into(),
            anime_id: "frieren-18542".into(),
            room_code: code(),
        }));

        client.change_episode("frieren-18542", "107259").unwrap();
        assert_eq!(
            client.state().current_episode.as_ref().unwrap().episode_id,
            "107259"
        );

        // Host status moved away while the change was in flight
        client.handle(NetworkEvent::Message(ServerMessage::Error {
            kind: ErrorKind::NotHost,
            message: "Only the host can change the episode".into(),
        }));
        let state = client.state();
        assert!(!state.is_host);
        assert_eq!(
            state.current_episode,
            Some(EpisodePointer::new("frieren-18542", "107257").unwrap())
        );
    }

    #[test]
    fn test_unrelated_error_keeps_episode_change() {
        let (mut client, me) = connected();
        joined(&mut client, me, me);

        client.change_episode("frieren-18542", "107259").unwrap();
        client.handle(NetworkEvent::Message(ServerMessage::Error {
            kind: ErrorKind::Validation,
            message: "Message is empty".into(),
        }));
        assert!(client.state().is_host);
        assert_eq!(
            client.state().current_episode.as_ref().unwrap().episode_id,
            "107259"
        );
    }

    #[test]
    fn test_server_limits_apply() {
        let mut client = SessionClient::new(RecordingOutbox::default(), Some("Yui"));
        let me = ConnectionId::new();
        client.handle(NetworkEvent::Connected {
            connection_id: me,
            limits: RoomLimits {
                max_message_len: 1000,
                chat_history: 3,
                ..RoomLimits::default()
            },
        });
        joined(&mut client, me, ConnectionId::new());

        // Longer than the default cap, within the server's
        let long = "a".repeat(800);
        client.send_chat_message(&long).unwrap();
        assert!(matches!(
            client.send_chat_message(&"a".repeat(1001)),
            Err(Error::Room(RoomError::Validation(_)))
        ));

        for i in 0..5 {
            client.handle(NetworkEvent::Message(ServerMessage::ChatMessage(
                ChatMessage::user(10 + i, "Host".into(), format!("msg {}", i), true),
            )));
        }
        let kept: Vec<&str> = client
            .state()
            .chat
            .iter()
            .map(|m| m.message.as_str())
            .collect();
        assert_eq!(kept, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn test_leave_clears_immediately() {
        let (mut client, me) = connected();
        joined(&mut client, me, ConnectionId::new());

        let nav = client.leave_room().unwrap();
        assert_eq!(nav, NavigationRequest::Leave);
        assert!(!client.state().is_in_room());
        assert!(client.state().chat.is_empty());
        assert!(matches!(
            client.outbox.sent.last(),
            Some(ClientMessage::LeaveRoom { .. })
        ));

        // Late chat for the old room is dropped
        client.handle(NetworkEvent::Message(ServerMessage::ChatMessage(
            ChatMessage::user(9, "Host".into(), "bye".into(), true),
        )));
        assert!(client.state().chat.is_empty());
    }

    #[test]
    fn test_transient_drop_keeps_room_and_rejoins() {
        let (mut client, me) = connected();
        joined(&mut client, me, ConnectionId::new());
        let token = client.state().resume.as_ref().unwrap().token;

        client.handle(NetworkEvent::Disconnected { deliberate: false });
        assert!(!client.state().is_connected);
        assert_eq!(client.state().room_code, Some(code()));

        client.handle(connected_event(ConnectionId::new()));
        match client.outbox.sent.last() {
            Some(ClientMessage::JoinRoom {
                room_code,
                resume_token,
                ..
            }) => {
                assert_eq!(room_code, "K7QX2M");
                assert_eq!(*resume_token, Some(token));
            }
            other => panic!("expected rejoin, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_rejoin_drops_room() {
        let (mut client, me) = connected();
        joined(&mut client, me, ConnectionId::new());
        client.handle(NetworkEvent::Disconnected { deliberate: false });
        client.handle(connected_event(ConnectionId::new()));

        client.handle(NetworkEvent::Message(ServerMessage::Error {
            kind: ErrorKind::RoomNotFound,
            message: "Room K7QX2M not found".into(),
        }));
        assert!(!client.state().is_in_room());
        assert!(client.state().room_error.is_some());
    }

    #[test]
    fn test_deliberate_disconnect_clears() {
        let (mut client, me) = connected();
        joined(&mut client, me, ConnectionId::new());

        client.handle(NetworkEvent::Disconnected { deliberate: true });
        assert!(!client.state().is_in_room());
        assert!(client.state().resume.is_none());

        // Nothing to rejoin on the next connection
        let sent = client.outbox.sent.len();
        client.handle(connected_event(ConnectionId::new()));
        assert_eq!(client.outbox.sent.len(), sent);
    }

    #[test]
    fn test_gave_up_keeps_room_for_manual_rejoin() {
        let (mut client, me) = connected();
        joined(&mut client, me, ConnectionId::new());
        client.handle(NetworkEvent::Disconnected { deliberate: false });
        client.handle(NetworkEvent::ConnectionFailed(
            "Could not reconnect after 5 attempts".into(),
        ));

        let state = client.state();
        assert!(!state.is_connected);
        assert!(state.connection_error.is_some());
        assert_eq!(state.room_code, Some(code()));
    }
}
