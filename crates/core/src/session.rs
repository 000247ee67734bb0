//! Room session - the per-room state machine
//!
//! A session owns membership, host identity, the chat log and the current
//! episode pointer of one room. Every operation mutates the session and
//! returns the events to deliver, each addressed to an explicit list of
//! connections. Callers must deliver them in the returned order; doing so
//! from a single task per room gives every member the same event order.
//!
//! Lifecycle: `Empty` until the creator joins, `Active` while anyone is a
//! member, `Closed` once the last member is gone. A closed session rejects
//! everything with `RoomNotFound`.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tracing::{debug, info};

use crate::config::RoomLimits;
use crate::error::{Error, Result};
use crate::hosting::{HostChange, HostingState};
use crate::invariants::assert_room_invariants;
use crate::models::{
    normalize_nickname, ChatMessage, ConnectionId, EpisodePointer, Member, MemberInfo, ResumeToken,
    RoomCode,
};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Active,
    Closed,
}

/// Everything a member needs after entering a room
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub code: RoomCode,
    /// True for the creator's ack, false for joins
    pub created: bool,
    pub is_host: bool,
    pub members: Vec<MemberInfo>,
    pub chat: Vec<ChatMessage>,
    pub episode: Option<EpisodePointer>,
    pub resume_token: ResumeToken,
}

/// Events produced by a room session
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// Ack of create/join, sent only to the entering member
    Entered(RoomSnapshot),
    UserJoined {
        members: Vec<MemberInfo>,
        nickname: String,
        notice: ChatMessage,
    },
    UserLeft {
        members: Vec<MemberInfo>,
        nickname: String,
        notice: ChatMessage,
    },
    NewHost {
        members: Vec<MemberInfo>,
        new_host_id: ConnectionId,
        new_host_nickname: String,
        notice: ChatMessage,
    },
    Chat(ChatMessage),
    EpisodeChanged {
        code: RoomCode,
        episode: EpisodePointer,
    },
    /// Ack of an explicit leave
    Left,
}

/// An event and the connections it goes to
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: Vec<ConnectionId>,
    pub event: RoomEvent,
}

impl Outbound {
    fn only(connection_id: ConnectionId, event: RoomEvent) -> Self {
        Self {
            to: vec![connection_id],
            event,
        }
    }
}

/// State of a single room
#[derive(Debug)]
pub struct RoomSession {
    code: RoomCode,
    limits: RoomLimits,
    phase: Phase,
    /// Join order, oldest first
    members: Vec<Member>,
    /// Dropped members awaiting resume, with their removal deadline
    held: HashMap<ConnectionId, Instant>,
    hosting: HostingState,
    chat: VecDeque<ChatMessage>,
    next_sequence: u64,
    episode: Option<EpisodePointer>,
}

impl RoomSession {
    pub fn new(code: RoomCode, limits: RoomLimits) -> Self {
        Self {
            code,
            limits,
            phase: Phase::Empty,
            members: Vec::new(),
            held: HashMap::new(),
            hosting: HostingState::new(),
            chat: VecDeque::new(),
            next_sequence: 1,
            episode: None,
        }
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn host_id(&self) -> Option<ConnectionId> {
        self.hosting.host_id()
    }

    pub fn episode(&self) -> Option<&EpisodePointer> {
        self.episode.as_ref()
    }

    pub fn chat(&self) -> impl Iterator<Item = &ChatMessage> {
        self.chat.iter()
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.position(connection_id).is_some()
    }

    /// True if the member's connection dropped and it is waiting for resume
    pub fn is_held(&self, connection_id: ConnectionId) -> bool {
        self.held.contains_key(&connection_id)
    }

    /// Connection currently owning the slot behind a resume token
    pub fn token_holder(&self, token: &ResumeToken) -> Option<ConnectionId> {
        self.members
            .iter()
            .find(|m| m.resume_token == *token)
            .map(|m| m.connection_id)
    }

    /// Member list as shown to clients
    pub fn member_list(&self) -> Vec<MemberInfo> {
        self.members
            .iter()
            .map(|m| MemberInfo {
                id: m.connection_id,
                nickname: m.nickname.clone(),
                is_host: self.hosting.is_host(m.connection_id),
            })
            .collect()
    }

    /// Earliest pending grace deadline, if any member is held
    pub fn next_deadline(&self) -> Option<Instant> {
        self.held.values().min().copied()
    }

    /// First member enters a fresh room and becomes host
    pub fn create(&mut self, connection_id: ConnectionId, nickname: &str) -> Result<Vec<Outbound>> {
        if self.phase != Phase::Empty {
            return Err(Error::Validation(format!("Room {} already exists", self.code)));
        }
        let nickname = normalize_nickname(nickname)?;

        self.members.push(Member::new(connection_id, nickname));
        self.hosting.claim_if_vacant(connection_id);
        self.phase = Phase::Active;
        info!(room = %self.code, connection_id = %connection_id, "Room created");

        let ack = self.snapshot_for(connection_id, true)?;
        self.check();
        Ok(vec![Outbound::only(connection_id, RoomEvent::Entered(ack))])
    }

    /// Enter an existing room, or reclaim a held slot with a resume token
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        nickname: &str,
        resume: Option<ResumeToken>,
    ) -> Result<Vec<Outbound>> {
        if self.phase != Phase::Active {
            return Err(Error::RoomNotFound(self.code.clone()));
        }
        let nickname = normalize_nickname(nickname)?;

        // Same connection joining again: re-send the ack, change nothing
        if self.contains(connection_id) {
            debug!(room = %self.code, connection_id = %connection_id, "Repeated join ignored");
            let ack = self.snapshot_for(connection_id, false)?;
            return Ok(vec![Outbound::only(connection_id, RoomEvent::Entered(ack))]);
        }

        if let Some(token) = resume {
            if let Some(outbound) = self.resume(connection_id, token)? {
                return Ok(outbound);
            }
        }

        if self.members.len() >= self.limits.max_members {
            return Err(Error::RoomFull {
                code: self.code.clone(),
                limit: self.limits.max_members,
            });
        }

        self.members.push(Member::new(connection_id, nickname.clone()));
        self.hosting.claim_if_vacant(connection_id);
        info!(room = %self.code, connection_id = %connection_id, "Member joined");

        let notice = self.append_system(format!("{} joined the room", nickname));
        let broadcast = Outbound {
            to: self.live_except(Some(connection_id)),
            event: RoomEvent::UserJoined {
                members: self.member_list(),
                nickname,
                notice,
            },
        };
        let ack = self.snapshot_for(connection_id, false)?;

        self.check();
        Ok(vec![
            Outbound::only(connection_id, RoomEvent::Entered(ack)),
            broadcast,
        ])
    }

    /// Explicit departure
    pub fn leave(&mut self, connection_id: ConnectionId) -> Result<Vec<Outbound>> {
        if !self.contains(connection_id) {
            return Err(Error::NotInRoom);
        }

        let mut outbound = vec![Outbound::only(connection_id, RoomEvent::Left)];
        outbound.extend(self.remove_member(connection_id));
        self.check();
        Ok(outbound)
    }

    /// Chat from a member, broadcast to everyone including the sender
    pub fn send_chat(&mut self, connection_id: ConnectionId, text: &str) -> Result<Vec<Outbound>> {
        let nickname = self
            .member(connection_id)
            .map(|m| m.nickname.clone())
            .ok_or(Error::NotInRoom)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Validation("Message is empty".into()));
        }
        if text.chars().count() > self.limits.max_message_len {
            return Err(Error::Validation(format!(
                "Message must be at most {} characters",
                self.limits.max_message_len
            )));
        }

        let sequence = self.take_sequence();
        let message = ChatMessage::user(
            sequence,
            nickname,
            text.to_string(),
            self.hosting.is_host(connection_id),
        );
        self.push_chat(message.clone());

        Ok(vec![Outbound {
            to: self.live_except(None),
            event: RoomEvent::Chat(message),
        }])
    }

    /// Host moves the room to another episode
    pub fn change_episode(
        &mut self,
        connection_id: ConnectionId,
        episode: EpisodePointer,
    ) -> Result<Vec<Outbound>> {
        if !self.contains(connection_id) {
            return Err(Error::NotInRoom);
        }
        if !self.hosting.is_host(connection_id) {
            return Err(Error::NotHost);
        }

        info!(
            room = %self.code,
            anime_id = %episode.anime_id,
            episode_id = %episode.episode_id,
            "Episode changed"
        );
        self.episode = Some(episode.clone());

        Ok(vec![Outbound {
            to: self.live_except(Some(connection_id)),
            event: RoomEvent::EpisodeChanged {
                code: self.code.clone(),
                episode,
            },
        }])
    }

    /// A member's connection dropped without an explicit leave.
    ///
    /// The member is held until `now + grace`; with no grace period it is
    /// removed immediately.
    pub fn disconnect(&mut self, connection_id: ConnectionId, now: Instant) -> Vec<Outbound> {
        if !self.contains(connection_id) {
            return Vec::new();
        }

        let grace = self.limits.grace_period();
        if grace.is_zero() {
            let outbound = self.remove_member(connection_id);
            self.check();
            return outbound;
        }

        debug!(room = %self.code, connection_id = %connection_id, "Member held for resume");
        self.held.insert(connection_id, now + grace);
        Vec::new()
    }

    /// Remove held members whose grace period has run out
    pub fn expire(&mut self, now: Instant) -> Vec<Outbound> {
        let expired: Vec<ConnectionId> = self
            .members
            .iter()
            .map(|m| m.connection_id)
            .filter(|id| self.held.get(id).is_some_and(|deadline| *deadline <= now))
            .collect();

        let mut outbound = Vec::new();
        for connection_id in expired {
            debug!(room = %self.code, connection_id = %connection_id, "Grace period expired");
            outbound.extend(self.remove_member(connection_id));
        }
        self.check();
        outbound
    }

    fn resume(
        &mut self,
        connection_id: ConnectionId,
        token: ResumeToken,
    ) -> Result<Option<Vec<Outbound>>> {
        // A live slot can be taken over too: its connection may be half-open
        let Some(idx) = self.members.iter().position(|m| m.resume_token == token) else {
            return Ok(None);
        };

        let old = self.members[idx].connection_id;
        self.held.remove(&old);
        self.members[idx].connection_id = connection_id;
        self.hosting.rebind(old, connection_id);
        let nickname = self.members[idx].nickname.clone();
        info!(room = %self.code, old = %old, new = %connection_id, "Member resumed");

        let notice = self.append_system(format!("{} rejoined the room", nickname));
        let broadcast = Outbound {
            to: self.live_except(Some(connection_id)),
            event: RoomEvent::UserJoined {
                members: self.member_list(),
                nickname,
                notice,
            },
        };
        let ack = self.snapshot_for(connection_id, false)?;

        self.check();
        Ok(Some(vec![
            Outbound::only(connection_id, RoomEvent::Entered(ack)),
            broadcast,
        ]))
    }

    /// Drop a member and announce it; migrates host and closes when empty
    fn remove_member(&mut self, connection_id: ConnectionId) -> Vec<Outbound> {
        let Some(idx) = self.position(connection_id) else {
            return Vec::new();
        };
        let removed = self.members.remove(idx);
        self.held.remove(&connection_id);
        info!(room = %self.code, connection_id = %connection_id, "Member removed");

        if self.members.is_empty() {
            self.hosting
                .on_member_removed(connection_id, &self.members, |_| false);
            self.phase = Phase::Closed;
            info!(room = %self.code, "Room closed");
            return Vec::new();
        }

        let held = &self.held;
        let change =
            self.hosting
                .on_member_removed(connection_id, &self.members, |id| !held.contains_key(&id));

        let mut outbound = Vec::new();
        let notice = self.append_system(format!("{} left the room", removed.nickname));
        outbound.push(Outbound {
            to: self.live_except(None),
            event: RoomEvent::UserLeft {
                members: self.member_list(),
                nickname: removed.nickname,
                notice,
            },
        });

        if let HostChange::Promoted(new_host_id) = change {
            let new_host_nickname = self
                .member(new_host_id)
                .map(|m| m.nickname.clone())
                .unwrap_or_default();
            info!(room = %self.code, host = %new_host_id, "Host migrated");
            let notice = self.append_system(format!("{} is now the host", new_host_nickname));
            outbound.push(Outbound {
                to: self.live_except(None),
                event: RoomEvent::NewHost {
                    members: self.member_list(),
                    new_host_id,
                    new_host_nickname,
                    notice,
                },
            });
        }

        outbound
    }

    fn snapshot_for(&self, connection_id: ConnectionId, created: bool) -> Result<RoomSnapshot> {
        let member = self.member(connection_id).ok_or(Error::NotInRoom)?;
        Ok(RoomSnapshot {
            code: self.code.clone(),
            created,
            is_host: self.hosting.is_host(connection_id),
            members: self.member_list(),
            chat: self.chat.iter().cloned().collect(),
            episode: self.episode.clone(),
            resume_token: member.resume_token,
        })
    }

    fn member(&self, connection_id: ConnectionId) -> Option<&Member> {
        self.members.iter().find(|m| m.connection_id == connection_id)
    }

    fn position(&self, connection_id: ConnectionId) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.connection_id == connection_id)
    }

    /// Connected members, optionally excluding one
    fn live_except(&self, except: Option<ConnectionId>) -> Vec<ConnectionId> {
        self.members
            .iter()
            .map(|m| m.connection_id)
            .filter(|id| Some(*id) != except && !self.held.contains_key(id))
            .collect()
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn append_system(&mut self, text: String) -> ChatMessage {
        let sequence = self.take_sequence();
        let message = ChatMessage::system(sequence, text);
        self.push_chat(message.clone());
        message
    }

    fn push_chat(&mut self, message: ChatMessage) {
        self.chat.push_back(message);
        while self.chat.len() > self.limits.chat_history {
            self.chat.pop_front();
        }
    }

    fn check(&self) {
        assert_room_invariants(self);
    }
}
