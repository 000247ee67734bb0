//! Room registry - maps room codes to rooms
//!
//! The registry allocates collision-free codes, enforces the room limit and
//! garbage-collects rooms once they are empty. It is generic over what it
//! stores per room: the server keeps a handle to each room's task, while
//! single-threaded callers can store [`RoomSession`]s directly.

use std::collections::HashMap;

use crate::config::RoomLimits;
use crate::error::{Error, Result};
use crate::models::{ConnectionId, RoomCode};
use crate::session::{Outbound, RoomSession};

/// Attempts at finding an unused code before giving up
const MAX_CODE_ATTEMPTS: usize = 64;

/// Registry of live rooms
#[derive(Debug)]
pub struct RoomRegistry<R> {
    rooms: HashMap<RoomCode, R>,
    limits: RoomLimits,
}

impl<R> RoomRegistry<R> {
    pub fn new(limits: RoomLimits) -> Self {
        Self {
            rooms: HashMap::new(),
            limits,
        }
    }

    pub fn limits(&self) -> &RoomLimits {
        &self.limits
    }

    /// Allocate a fresh code and store the room built for it
    pub fn create_with(&mut self, build: impl FnOnce(&RoomCode) -> Result<R>) -> Result<RoomCode> {
        if self.rooms.len() >= self.limits.max_rooms {
            return Err(Error::CapacityExceeded(self.limits.max_rooms));
        }

        let code = self.unused_code()?;
        let room = build(&code)?;
        self.rooms.insert(code.clone(), room);
        tracing::debug!(room = %code, rooms = self.rooms.len(), "Room registered");
        Ok(code)
    }

    /// Look up a room by code
    pub fn get(&self, code: &RoomCode) -> Result<&R> {
        self.rooms
            .get(code)
            .ok_or_else(|| Error::RoomNotFound(code.clone()))
    }

    pub fn get_mut(&mut self, code: &RoomCode) -> Result<&mut R> {
        self.rooms
            .get_mut(code)
            .ok_or_else(|| Error::RoomNotFound(code.clone()))
    }

    /// Remove a room if `should_remove` agrees. Returns true if removed.
    pub fn remove_if(&mut self, code: &RoomCode, should_remove: impl FnOnce(&R) -> bool) -> bool {
        let remove = self.rooms.get(code).is_some_and(should_remove);
        if remove {
            self.rooms.remove(code);
            tracing::debug!(room = %code, rooms = self.rooms.len(), "Room unregistered");
        }
        remove
    }

    pub fn contains(&self, code: &RoomCode) -> bool {
        self.rooms.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn unused_code(&self) -> Result<RoomCode> {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = RoomCode::generate(&mut rng, self.limits.code_length);
            if !self.rooms.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(Error::CapacityExceeded(self.rooms.len()))
    }
}

/// Direct use with sessions stored in the registry
impl RoomRegistry<RoomSession> {
    /// Create a room with `connection_id` as its host
    pub fn create_room(
        &mut self,
        connection_id: ConnectionId,
        nickname: &str,
    ) -> Result<(RoomCode, Vec<Outbound>)> {
        let limits = self.limits.clone();
        let mut outbound = Vec::new();
        let code = self.create_with(|code| {
            let mut session = RoomSession::new(code.clone(), limits);
            outbound = session.create(connection_id, nickname)?;
            Ok(session)
        })?;
        Ok((code, outbound))
    }

    /// Join an existing room
    pub fn join_room(
        &mut self,
        code: &RoomCode,
        connection_id: ConnectionId,
        nickname: &str,
    ) -> Result<Vec<Outbound>> {
        self.get_mut(code)?.join(connection_id, nickname, None)
    }

    /// Leave a room, deleting it once empty
    pub fn leave_room(&mut self, code: &RoomCode, connection_id: ConnectionId) -> Result<Vec<Outbound>> {
        let outbound = self.get_mut(code)?.leave(connection_id)?;
        self.remove_room_if_empty(code);
        Ok(outbound)
    }

    /// Delete a room once it has no members
    pub fn remove_room_if_empty(&mut self, code: &RoomCode) -> bool {
        self.remove_if(code, |session| session.is_empty())
    }
}
