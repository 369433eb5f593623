//! Rosetta relay server: client/room registry, login handshake, room and
//! messaging handlers, and the dispatcher tying them to the wire codec.

pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod registry;
pub mod room;

pub use dispatch::{Connection, Dispatcher};
pub use error::{Result, RosettaError};
