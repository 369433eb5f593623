//! crypto-layer errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("candidate public key is not in the order-Q subgroup")]
    NotInSubgroup,

    #[error("signature verification failed")]
    BadSignature,

    #[error("group parameter file malformed: {0}")]
    BadGroupParams(String),

    #[error("argon2id failed: {0}")]
    KdfFailed(String),

    #[error("stream cipher rejected key or nonce length: {0}")]
    BadCipherInput(String),

    #[error("value out of range: {0}")]
    OutOfRange(String),
}
