//! password-protected save file for a client's long-term key pair
//! (spec.md §4.2).
//!
//! Layout, in order: `long_nonce[16] ‖ encrypted_privkey[40] ‖ pubkey[384]
//! ‖ argon_salt_string[8]`. The private key is never stored in the clear;
//! `register` and `open` are the only two operations this module exposes,
//! matching the reference client's `reg`/`login` pair.

use num_bigint::BigUint;
use rand::RngCore;
use zeroize::Zeroizing;

use rosetta_crypto::cipher::stream_xor;
use rosetta_crypto::group::{scalar_to_bytes, GroupParams, KeyPair};
use rosetta_crypto::kdf::derive_save_key;
use rosetta_proto::{LONG_NONCE, PRIVKEY_BYTES, PUBKEY_BYTES};

use crate::error::{KeystoreError, Result};

const SALT_LEN: usize = 8;
pub const SAVE_FILE_LEN: usize = LONG_NONCE + PRIVKEY_BYTES + PUBKEY_BYTES + SALT_LEN;

pub struct SaveFile {
    pub long_nonce: [u8; LONG_NONCE],
    pub encrypted_privkey: [u8; PRIVKEY_BYTES],
    pub pubkey: [u8; PUBKEY_BYTES],
    pub salt: [u8; SALT_LEN],
}

impl SaveFile {
    pub fn to_bytes(&self) -> [u8; SAVE_FILE_LEN] {
        let mut out = [0u8; SAVE_FILE_LEN];
        let mut off = 0;
        out[off..off + LONG_NONCE].copy_from_slice(&self.long_nonce);
        off += LONG_NONCE;
        out[off..off + PRIVKEY_BYTES].copy_from_slice(&self.encrypted_privkey);
        off += PRIVKEY_BYTES;
        out[off..off + PUBKEY_BYTES].copy_from_slice(&self.pubkey);
        off += PUBKEY_BYTES;
        out[off..off + SALT_LEN].copy_from_slice(&self.salt);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SAVE_FILE_LEN {
            return Err(KeystoreError::BadLength {
                len: bytes.len(),
                expected: SAVE_FILE_LEN,
            });
        }
        let mut off = 0;
        let mut long_nonce = [0u8; LONG_NONCE];
        long_nonce.copy_from_slice(&bytes[off..off + LONG_NONCE]);
        off += LONG_NONCE;
        let mut encrypted_privkey = [0u8; PRIVKEY_BYTES];
        encrypted_privkey.copy_from_slice(&bytes[off..off + PRIVKEY_BYTES]);
        off += PRIVKEY_BYTES;
        let mut pubkey = [0u8; PUBKEY_BYTES];
        pubkey.copy_from_slice(&bytes[off..off + PUBKEY_BYTES]);
        off += PUBKEY_BYTES;
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes[off..off + SALT_LEN]);

        Ok(Self {
            long_nonce,
            encrypted_privkey,
            pubkey,
            salt,
        })
    }
}

fn derive_cipher_key(password: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let stretched = derive_save_key(password, salt)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&stretched[..32]);
    Ok(Zeroizing::new(key))
}

/// create a new long-term key pair and wrap it in a save file under
/// `password`.
pub fn register<R: RngCore + rand::CryptoRng>(
    params: &GroupParams,
    password: &[u8],
    rng: &mut R,
) -> Result<(SaveFile, KeyPair)> {
    let keys = KeyPair::generate(params, rng);

    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let mut long_nonce = [0u8; LONG_NONCE];
    rng.fill_bytes(&mut long_nonce);

    let cipher_key = derive_cipher_key(password, &salt)?;
    let privkey_bytes = scalar_to_bytes(&keys.private);
    let encrypted = stream_xor(&cipher_key, &long_nonce, &privkey_bytes)?;

    let mut encrypted_privkey = [0u8; PRIVKEY_BYTES];
    encrypted_privkey.copy_from_slice(&encrypted);

    let pubkey_bytes = rosetta_crypto::group::pubkey_to_bytes(&keys.public);
    let mut pubkey = [0u8; PUBKEY_BYTES];
    pubkey.copy_from_slice(&pubkey_bytes);

    let file = SaveFile {
        long_nonce,
        encrypted_privkey,
        pubkey,
        salt,
    };
    Ok((file, keys))
}

/// recover the long-term key pair from a save file and its password.
/// Fails with [`KeystoreError::WrongPassword`] if the decrypted private
/// key does not regenerate the stored public key — the only signal
/// available that the password (or the file) was wrong, since the
/// stream cipher has no authentication tag of its own.
pub fn open(params: &GroupParams, file: &SaveFile, password: &[u8]) -> Result<KeyPair> {
    let cipher_key = derive_cipher_key(password, &file.salt)?;
    let decrypted = stream_xor(&cipher_key, &file.long_nonce, &file.encrypted_privkey)?;
    let private = BigUint::from_bytes_be(&decrypted);
    let keys = KeyPair::from_private(params, private);

    let expected_pubkey = rosetta_crypto::group::pubkey_to_bytes(&keys.public);
    if expected_pubkey != file.pubkey {
        return Err(KeystoreError::WrongPassword);
    }
    Ok(keys)
}
