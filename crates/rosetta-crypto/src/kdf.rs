//! password-based key derivation for the save-file (spec.md §4.2)
//!
//! Argon2id with memory-hard parameters tuned to slow down offline
//! guessing against a stolen save file, not for interactive speed.

use argon2::{Argon2, Params, Version};

use crate::error::{CryptoError, Result};

const ARGON2_P_COST: u32 = 4;
const ARGON2_M_COST_KIB: u32 = 2_097_000;
const ARGON2_T_COST: u32 = 1;
const KDF_OUTPUT_LEN: usize = 64;

/// derive a 64-byte key from `password` and `salt` (the save file's
/// `argon_salt_string[8]`). The output is split by the caller into the
/// stream-cipher key used to wrap the long-term private key.
pub fn derive_save_key(password: &[u8], salt: &[u8]) -> Result<[u8; KDF_OUTPUT_LEN]> {
    let params = Params::new(ARGON2_M_COST_KIB, ARGON2_T_COST, ARGON2_P_COST, Some(KDF_OUTPUT_LEN))
        .map_err(|e| CryptoError::KdfFailed(e.to_string()))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; KDF_OUTPUT_LEN];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::KdfFailed(e.to_string()))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_give_same_key() {
        let a = derive_save_key(b"hunter2", b"saltsalt").unwrap();
        let b = derive_save_key(b"hunter2", b"saltsalt").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_password_gives_different_key() {
        let a = derive_save_key(b"hunter2", b"saltsalt").unwrap();
        let b = derive_save_key(b"hunter3", b"saltsalt").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn different_salt_gives_different_key() {
        let a = derive_save_key(b"hunter2", b"saltsalt").unwrap();
        let b = derive_save_key(b"hunter2", b"pepperpp").unwrap();
        assert_ne!(a, b);
    }
}
