//! Data models for Watch Party rooms

mod chat;
mod episode;
mod member;
mod room_code;

pub use chat::*;
pub use episode::*;
pub use member::*;
pub use room_code::*;
