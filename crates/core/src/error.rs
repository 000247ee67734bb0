//! Error types for Watch Party Core

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::RoomCode;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Room {0} not found")]
    RoomNotFound(RoomCode),

    #[error("Room {code} is full ({limit} members)")]
    RoomFull { code: RoomCode, limit: usize },

    #[error("Room limit reached ({0} rooms)")]
    CapacityExceeded(usize),

    #[error("Only the host can do that")]
    NotHost,

    #[error("Not in a room")]
    NotInRoom,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Machine-readable category sent alongside the message on the wire
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RoomNotFound(_) => ErrorKind::RoomNotFound,
            Error::RoomFull { .. } => ErrorKind::RoomFull,
            Error::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            Error::NotHost => ErrorKind::NotHost,
            Error::NotInRoom => ErrorKind::NotInRoom,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Config(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Toml(_) => ErrorKind::Internal,
        }
    }
}

/// Wire-level error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    RoomNotFound,
    RoomFull,
    CapacityExceeded,
    NotHost,
    NotInRoom,
    Validation,
    Unsupported,
    Protocol,
    Internal,
}

pub type Result<T> = std::result::Result<T, Error>;
