//! keystore errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeystoreError>;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("save file is {len} bytes, expected exactly {expected}")]
    BadLength { len: usize, expected: usize },

    #[error("io error reading or writing save file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] rosetta_crypto::CryptoError),

    #[error("wrong password, or save file is corrupt")]
    WrongPassword,
}
