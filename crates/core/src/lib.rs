//! Watch Party Core Library
//!
//! Room models, the per-room session state machine, host selection and the
//! room registry for the watch-together coordination service.

pub mod config;
pub mod error;
pub mod hosting;
pub mod invariants;
pub mod models;
pub mod registry;
pub mod session;

pub use config::{read_toml, RoomLimits};
pub use error::{Error, ErrorKind, Result};
pub use hosting::{HostChange, HostingState};
pub use models::*;
pub use registry::RoomRegistry;
pub use session::{Outbound, Phase, RoomEvent, RoomSession, RoomSnapshot};
