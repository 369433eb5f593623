//! server-side errors (spec.md §7)
//!
//! Five categories, matching the reference dispatcher's boolean-return
//! contract: handlers return `Result<HandlerOutcome, RosettaError>` and
//! the dispatcher logs any `Err` at `warn!` before continuing to the next
//! packet — nothing here ever tears down the connection on its own.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RosettaError>;

#[derive(Debug, Error)]
pub enum RosettaError {
    #[error("malformed packet: {0}")]
    Malformed(#[from] rosetta_proto::CodecError),

    #[error(transparent)]
    Crypto(#[from] rosetta_crypto::CryptoError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("registry full: {0}")]
    RegistryFull(&'static str),

    #[error("unknown {0}: index {1}")]
    UnknownIndex(&'static str, usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
