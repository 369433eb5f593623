//! cryptographic primitives backing the Rosetta protocol
//!
//! - `group`: the Diffie-Hellman group, Montgomery-style modular
//!   exponentiation (via `num-bigint`), and the subgroup check
//! - `schnorr`: Schnorr-style sign/verify over that group
//! - `cipher`: the keyed stream cipher
//! - `hash`: the unkeyed hash and its HMAC construction
//! - `kdf`: Argon2id password-based key derivation for the save file
//! - `session`: shared-secret slicing, role assignment, nonce bookkeeping
//! - `scratch`: a zeroize-on-drop buffer for handshake key material

pub mod cipher;
pub mod error;
pub mod group;
pub mod hash;
pub mod kdf;
pub mod schnorr;
pub mod scratch;
pub mod session;

pub use error::{CryptoError, Result};
pub use group::{GroupParams, KeyPair};
pub use schnorr::Signature;
