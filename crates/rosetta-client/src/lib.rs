//! Rosetta client: login handshake, room create/join/send/receive/leave,
//! and the roommate/session state those operations update.

pub mod error;
pub mod handshake;
pub mod room;
pub mod state;

pub use error::{ClientError, Result};
pub use state::{Roommate, RoomState, ServerSession};
