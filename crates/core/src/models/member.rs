//! Member and connection identity models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Longest nickname accepted (in characters)
pub const MAX_NICKNAME_LEN: usize = 32;

/// Identity of one live connection. A reconnect gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection-independent secret that lets a dropped member reclaim its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(pub Uuid);

impl ResumeToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResumeToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A member of a room, as held by the room session
#[derive(Debug, Clone)]
pub struct Member {
    pub connection_id: ConnectionId,
    pub nickname: String,
    pub resume_token: ResumeToken,
    pub joined_at: DateTime<Utc>,
}

impl Member {
    pub fn new(connection_id: ConnectionId, nickname: String) -> Self {
        Self {
            connection_id,
            nickname,
            resume_token: ResumeToken::new(),
            joined_at: Utc::now(),
        }
    }
}

/// Member as shown to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub id: ConnectionId,
    pub nickname: String,
    pub is_host: bool,
}

/// Trim and validate a nickname
pub fn normalize_nickname(input: &str) -> Result<String> {
    let nickname = input.trim();
    if nickname.is_empty() {
        return Err(Error::Validation("Nickname is required".into()));
    }
    if nickname.chars().count() > MAX_NICKNAME_LEN {
        return Err(Error::Validation(format!(
            "Nickname must be at most {} characters",
            MAX_NICKNAME_LEN
        )));
    }
    Ok(nickname.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nickname_trimmed() {
        assert_eq!(normalize_nickname("  Mika ").unwrap(), "Mika");
    }

    #[test]
    fn test_nickname_rejected() {
        assert!(normalize_nickname("").is_err());
        assert!(normalize_nickname(" \t ").is_err());
        assert!(normalize_nickname(&"x".repeat(MAX_NICKNAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_member_info_wire_names() {
        let info = MemberInfo {
            id: ConnectionId::new(),
            nickname: "Rin".into(),
            is_host: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["isHost"], true);
        assert_eq!(json["nickname"], "Rin");
    }
}
