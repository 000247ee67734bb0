//! Room codes - short, human-typeable room identifiers

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Characters used for generated codes (no 0/O or 1/I lookalikes)
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Shortest code accepted from user input
const MIN_CODE_LEN: usize = 4;
/// Longest code accepted from user input
const MAX_CODE_LEN: usize = 12;

/// Identifier of a room, immutable for the room's lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a random code of the given length
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Self {
        let code = (0..len)
            .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parse user input: trims whitespace and upper-cases
    pub fn parse(input: &str) -> Result<Self> {
        let code = input.trim().to_ascii_uppercase();

        if code.is_empty() {
            return Err(Error::Validation("Room code is required".into()));
        }
        if code.len() < MIN_CODE_LEN || code.len() > MAX_CODE_LEN {
            return Err(Error::Validation(format!(
                "Room code must be {}-{} characters",
                MIN_CODE_LEN, MAX_CODE_LEN
            )));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Validation(format!("Invalid room code '{}'", code)));
        }

        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
