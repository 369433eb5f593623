//! client-side error taxonomy, mirroring `rosetta_server::RosettaError`'s
//! five categories (spec.md §7) from the client's point of view.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("malformed packet: {0}")]
    Malformed(#[from] rosetta_proto::CodecError),

    #[error("crypto error: {0}")]
    Crypto(#[from] rosetta_crypto::CryptoError),

    #[error("keystore error: {0}")]
    Keystore(#[from] rosetta_keystore::KeystoreError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("server rejected request as full")]
    ServerFull,

    #[error("unknown roommate slot: {0}")]
    UnknownRoommate(usize),

    #[error("no free roommate slots")]
    RoommateTableFull,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
