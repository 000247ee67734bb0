//! Chat message model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Nickname shown on server-generated notices
pub const SYSTEM_NICKNAME: &str = "System";

/// A chat entry. Immutable once appended to a room's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    /// Position in the room's total order
    pub sequence: u64,
    pub nickname: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub is_system: bool,
}

impl ChatMessage {
    pub fn user(sequence: u64, nickname: String, message: String, is_host: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            nickname,
            message,
            timestamp: Utc::now(),
            is_host,
            is_system: false,
        }
    }

    pub fn system(sequence: u64, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            nickname: SYSTEM_NICKNAME.to_string(),
            message,
            timestamp: Utc::now(),
            is_host: false,
            is_system: true,
        }
    }

    pub fn format_timestamp(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }
}
