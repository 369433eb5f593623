//! Wire constants and packet codec shared by the Rosetta server and client.
//!
//! This crate has no async runtime or crypto dependency of its own — it
//! only knows how to turn bytes into typed records and back, and which
//! magic numbers the dispatcher (spec.md §4.6) accepts from a client.

pub mod constants;
pub mod error;
pub mod packet;

pub use constants::*;
pub use error::{CodecError, Result};
pub use packet::{
    expected_len, is_dispatchable_magic, ClientHello, ClientLoginAuth, GuestEntry,
    IdentitySigned, JoinReply, NewGuestNotify, RoomRequest, ServerHello, ServerLoginOk, Signature,
    Signed, TextEnvelope, TextSlot,
};
