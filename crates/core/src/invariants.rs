//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible room states during development.
//! These checks are compiled out in release builds.

use crate::models::MemberInfo;
use crate::session::{Phase, RoomSession};

/// Validate that a room's state is internally consistent
pub fn assert_room_invariants(room: &RoomSession) {
    let members = room.member_list();

    // No connection appears twice
    for (i, m) in members.iter().enumerate() {
        debug_assert!(
            !members[i + 1..].iter().any(|other| other.id == m.id),
            "Room {} lists connection {} twice",
            room.code(),
            m.id
        );
    }

    assert_member_list_invariants(&members, room.code().as_str());

    // Host must be a current member
    if let Some(host_id) = room.host_id() {
        debug_assert!(
            room.contains(host_id),
            "Room {} host {} is not a member",
            room.code(),
            host_id
        );
    }

    match room.phase() {
        Phase::Active => debug_assert!(
            !members.is_empty() && room.host_id().is_some(),
            "Room {} is active without members or host",
            room.code()
        ),
        Phase::Empty | Phase::Closed => debug_assert!(
            members.is_empty() && room.host_id().is_none(),
            "Room {} is {:?} but still has members or a host",
            room.code(),
            room.phase()
        ),
    }

    // Chat sequence numbers strictly increase
    let mut last = 0;
    for message in room.chat() {
        debug_assert!(
            message.sequence > last,
            "Room {} chat out of order at sequence {}",
            room.code(),
            message.sequence
        );
        last = message.sequence;
    }
}

/// Validate a member list as seen by clients: one host when non-empty
pub fn assert_member_list_invariants(members: &[MemberInfo], context: &str) {
    let host_count = members.iter().filter(|m| m.is_host).count();
    debug_assert!(
        members.is_empty() || host_count == 1,
        "{}: {} hosts among {} members, expected exactly 1",
        context,
        host_count,
        members.len()
    );
}
