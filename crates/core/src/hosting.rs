//! Host tracking for a room
//!
//! Exactly one member hosts a non-empty room. When the host goes away the
//! oldest remaining member takes over, preferring members whose connection
//! is still live over ones held for resume.

use crate::models::{ConnectionId, Member};

/// Host state for a room
#[derive(Debug, Clone, Default)]
pub struct HostingState {
    host_id: Option<ConnectionId>,
}

/// Outcome of a member leaving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostChange {
    /// The departing member was not host
    Unchanged,
    /// A remaining member was promoted
    Promoted(ConnectionId),
    /// Nobody left to host
    Vacant,
}

impl HostingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host_id(&self) -> Option<ConnectionId> {
        self.host_id
    }

    /// Check if a connection is currently the host
    pub fn is_host(&self, connection_id: ConnectionId) -> bool {
        self.host_id == Some(connection_id)
    }

    /// Become host if nobody is. Returns true if the claim succeeded.
    pub fn claim_if_vacant(&mut self, connection_id: ConnectionId) -> bool {
        if self.host_id.is_some() {
            return false;
        }
        self.host_id = Some(connection_id);
        true
    }

    /// Pick the next host after `removed` left.
    ///
    /// `remaining` must be in join order and no longer contain `removed`.
    /// `is_live` tells whether a member's connection is currently up.
    pub fn on_member_removed(
        &mut self,
        removed: ConnectionId,
        remaining: &[Member],
        is_live: impl Fn(ConnectionId) -> bool,
    ) -> HostChange {
        if !self.is_host(removed) {
            return HostChange::Unchanged;
        }

        let next = remaining
            .iter()
            .find(|m| is_live(m.connection_id))
            .or_else(|| remaining.first())
            .map(|m| m.connection_id);

        self.host_id = next;
        match next {
            Some(id) => HostChange::Promoted(id),
            None => HostChange::Vacant,
        }
    }

    /// Move host status to a member's new connection after a resume
    pub fn rebind(&mut self, old: ConnectionId, new: ConnectionId) {
        if self.is_host(old) {
            self.host_id = Some(new);
        }
    }
}
