//! keyed stream cipher wrapper (spec.md §4.1)
//!
//! The protocol uses a ChaCha20-like stream cipher as a symmetric,
//! involutive primitive: the same `stream_xor` call encrypts and decrypts,
//! since both are "xor the keystream over the data". `chacha20`'s `ChaCha20`
//! type is the RFC 8439 cipher with a 12-byte nonce; the protocol's
//! long-term ("long nonce") uses carry a 16-byte value, so those are folded
//! down to the 12 bytes the cipher primitive actually consumes with a
//! BLAKE2b hash rather than truncation, so every nonce bit still influences
//! the keystream.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;

use crate::error::{CryptoError, Result};
use crate::hash::hash_concat;
use rosetta_proto::{LONG_NONCE, SHORT_NONCE};

const CHACHA_NONCE_LEN: usize = 12;

fn to_chacha_nonce(nonce: &[u8]) -> Result<[u8; CHACHA_NONCE_LEN]> {
    match nonce.len() {
        SHORT_NONCE => {
            let mut out = [0u8; CHACHA_NONCE_LEN];
            out.copy_from_slice(nonce);
            Ok(out)
        }
        LONG_NONCE => {
            let digest = hash_concat(&[b"rosetta:long-nonce:v1", nonce]);
            let mut out = [0u8; CHACHA_NONCE_LEN];
            out.copy_from_slice(&digest[..CHACHA_NONCE_LEN]);
            Ok(out)
        }
        other => Err(CryptoError::BadCipherInput(format!(
            "nonce must be {SHORT_NONCE} or {LONG_NONCE} bytes, got {other}"
        ))),
    }
}

/// xor `data` with the cipher's keystream under `key`/`nonce`. Applying this
/// twice with the same key and nonce returns the original data.
pub fn stream_xor(key: &[u8; 32], nonce: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let chacha_nonce = to_chacha_nonce(nonce)?;
    let mut cipher = ChaCha20::new(key.into(), &chacha_nonce.into());
    let mut buf = data.to_vec();
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}
