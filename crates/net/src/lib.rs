//! Watch Party Network Library
//!
//! TCP transport for the room coordination protocol.
//!
//! # Architecture
//!
//! - **Server**: accepts connections and runs one actor task per room
//! - **Client**: one connection to a server, with keepalive
//! - **Protocol**: length-prefixed JSON messages, `{"event", "data"}` tagged
//!
//! # Usage
//!
//! ```ignore
//! let server = Server::start("0.0.0.0:7341".parse()?, RoomLimits::default()).await?;
//!
//! let mut client = Client::connect(server.addr()).await?;
//! client.send(ClientMessage::CreateRoom { nickname: "Yui".into() }).await?;
//!
//! while let Some(event) = client.next_event().await {
//!     match event {
//!         ClientEvent::Message(ServerMessage::RoomCreated { room_code, .. }) => { /* share code */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod protocol;
mod room;
pub mod server;

pub use client::{Client, ClientEvent, ConnectionState, DisconnectReason};
pub use error::{Error, Result};
pub use protocol::{ClientMessage, Request, ServerMessage};
pub use server::Server;

/// Default port for watch party servers
pub const DEFAULT_PORT: u16 = 7341;
