//! Room limits and TOML config loading
//!
//! Limits are read from the `[server.limits]` table of `watchparty.toml`.
//! Every field has a default so a partial table is valid.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Limits enforced by the room registry and each room session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomLimits {
    /// Maximum number of live rooms
    pub max_rooms: usize,
    /// Maximum members per room (held members count)
    pub max_members: usize,
    /// Chat messages retained for late joiners
    pub chat_history: usize,
    /// Maximum chat message length in characters
    pub max_message_len: usize,
    /// How long a dropped member is held before removal
    pub grace_period_secs: u64,
    /// Length of generated room codes
    pub code_length: usize,
}

impl Default for RoomLimits {
    fn default() -> Self {
        Self {
            max_rooms: 1024,
            max_members: 32,
            chat_history: 100,
            max_message_len: 500,
            grace_period_secs: 15,
            code_length: 6,
        }
    }
}

impl RoomLimits {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Reject values that would make rooms unusable
    pub fn validate(&self) -> Result<()> {
        if self.max_rooms == 0 {
            return Err(Error::Config("max_rooms must be at least 1".into()));
        }
        if self.max_members == 0 {
            return Err(Error::Config("max_members must be at least 1".into()));
        }
        if self.max_message_len == 0 {
            return Err(Error::Config("max_message_len must be at least 1".into()));
        }
        if !(4..=12).contains(&self.code_length) {
            return Err(Error::Config("code_length must be between 4 and 12".into()));
        }
        Ok(())
    }
}

/// Read and parse a TOML file
pub fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    let value = toml::from_str(&content)?;
    tracing::debug!(path = %path.display(), "Loaded config file");
    Ok(value)
}
