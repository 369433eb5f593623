//! session-key derivation and nonce bookkeeping (spec.md §4.4, §4.5)
//!
//! A completed Diffie-Hellman exchange yields one shared group element;
//! both peers slice its fixed-width byte representation into four pieces
//! (`KAB`, `KBA`, the initial authenticator `Y`, and a nonce seed `N`) and
//! then use the numeric ordering of their public keys to agree, without
//! any further messages, on who encrypts with which half.

use num_bigint::BigUint;

use crate::group::pubkey_to_bytes;
use rosetta_proto::{INIT_AUTH, SESSION_KEY, SHORT_NONCE, SMALL_FIELD};

/// the four pieces sliced out of a shared secret's byte representation.
pub struct SharedMaterial {
    pub kab: [u8; SESSION_KEY],
    pub kba: [u8; SESSION_KEY],
    pub y: [u8; INIT_AUTH],
    pub n: [u8; SMALL_FIELD],
}

/// slice a DH shared secret into `KAB ‖ KBA ‖ Y ‖ N` (spec.md §4.4).
pub fn slice_shared_secret(shared: &BigUint) -> SharedMaterial {
    let bytes = pubkey_to_bytes(shared);
    let mut kab = [0u8; SESSION_KEY];
    let mut kba = [0u8; SESSION_KEY];
    let mut y = [0u8; INIT_AUTH];
    let mut n = [0u8; SMALL_FIELD];

    let mut off = 0;
    kab.copy_from_slice(&bytes[off..off + SESSION_KEY]);
    off += SESSION_KEY;
    kba.copy_from_slice(&bytes[off..off + SESSION_KEY]);
    off += SESSION_KEY;
    y.copy_from_slice(&bytes[off..off + INIT_AUTH]);
    off += INIT_AUTH;
    n.copy_from_slice(&bytes[off..off + SMALL_FIELD]);

    SharedMaterial { kab, kba, y, n }
}

/// the two session keys a peer actually uses, after the role tiebreak.
pub struct SessionKeys {
    pub encrypt: [u8; SESSION_KEY],
    pub decrypt: [u8; SESSION_KEY],
}

/// resolve `KAB`/`KBA` into `encrypt`/`decrypt` by comparing the two
/// parties' public keys: the numerically larger one is "A" and encrypts
/// with `KAB`; the other is "B" and encrypts with `KBA`. Both sides
/// compute the same comparison independently, so no extra round trip is
/// needed to agree on roles (spec.md invariant I5).
pub fn assign_roles(material: &SharedMaterial, my_pub: &BigUint, peer_pub: &BigUint) -> SessionKeys {
    if my_pub >= peer_pub {
        SessionKeys {
            encrypt: material.kab,
            decrypt: material.kba,
        }
    } else {
        SessionKeys {
            encrypt: material.kba,
            decrypt: material.kab,
        }
    }
}

/// a per-peer monotonic nonce counter (spec.md invariant I6). Every
/// encryption under a session key must use a fresh, increasing counter
/// value so no two messages ever reuse a keystream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NonceCounter(u64);

impl NonceCounter {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn current(&self) -> u64 {
        self.0
    }

    /// advance and return the value to use for the next message. Panics
    /// on overflow rather than silently wrapping back to a reused nonce.
    pub fn next(&mut self) -> u64 {
        let value = self.0;
        self.0 = self
            .0
            .checked_add(1)
            .expect("nonce counter exhausted — session must be re-keyed");
        value
    }
}

/// build the short nonce used for one message: the seed `N` from the
/// handshake with the low 8 bytes xored against the message's counter
/// value, so every message in a session gets a distinct nonce.
pub fn nonce_for_counter(seed: &[u8; SMALL_FIELD], counter: u64) -> [u8; SHORT_NONCE] {
    let mut nonce = [0u8; SHORT_NONCE];
    nonce[..SMALL_FIELD].copy_from_slice(seed);
    for (b, c) in nonce[..SMALL_FIELD].iter_mut().zip(counter.to_le_bytes()) {
        *b ^= c;
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{toy_params, KeyPair};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn roles_are_symmetric_and_complementary() {
        let params = toy_params();
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let alice = KeyPair::generate(&params, &mut rng);
        let bob = KeyPair::generate(&params, &mut rng);

        let shared_a = alice.shared_secret(&params, &bob.public);
        let shared_b = bob.shared_secret(&params, &alice.public);
        assert_eq!(shared_a, shared_b);

        let material = slice_shared_secret(&shared_a);
        let alice_keys = assign_roles(&material, &alice.public, &bob.public);
        let bob_keys = assign_roles(&material, &bob.public, &alice.public);

        assert_eq!(alice_keys.encrypt, bob_keys.decrypt);
        assert_eq!(alice_keys.decrypt, bob_keys.encrypt);
    }

    #[test]
    fn nonce_counter_is_monotonic_and_distinct() {
        let mut counter = NonceCounter::new();
        let seed = [1u8; SMALL_FIELD];
        let a = counter.next();
        let b = counter.next();
        assert!(a < b);
        assert_ne!(nonce_for_counter(&seed, a), nonce_for_counter(&seed, b));
    }
}
