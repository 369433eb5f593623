//! codec errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated packet: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("declared length {declared} does not match expected length {expected} for magic {magic:#x}")]
    LengthMismatch {
        magic: u64,
        declared: usize,
        expected: usize,
    },

    #[error("unknown magic {0:#x}")]
    UnknownMagic(u64),

    #[error("field {field} out of range: {reason}")]
    OutOfRange {
        field: &'static str,
        reason: String,
    },
}
