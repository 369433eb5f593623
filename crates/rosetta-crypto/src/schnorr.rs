//! Schnorr-style signatures over the group from [`crate::group`]
//! (spec.md §4.1, §9 Open Question 2).
//!
//! Wire form is `s_bytes[PRIVKEY_BYTES] ‖ e_bytes[PRIVKEY_BYTES]` — a
//! `(s, e)` pair rather than `(s, R)`, so the verifier recomputes
//! `R' = G^s * Y^e mod M` and accepts iff `H(R' ‖ message) mod Q == e`.

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::Zero;

use crate::error::{CryptoError, Result};
use crate::group::{random_scalar, scalar_to_bytes, GroupParams};
use crate::hash::hash_concat;
use rosetta_proto::PRIVKEY_BYTES;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub s: BigUint,
    pub e: BigUint,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; rosetta_proto::SIGNATURE_LEN] {
        let mut out = [0u8; rosetta_proto::SIGNATURE_LEN];
        out[..PRIVKEY_BYTES].copy_from_slice(&scalar_to_bytes(&self.s));
        out[PRIVKEY_BYTES..].copy_from_slice(&scalar_to_bytes(&self.e));
        out
    }

    pub fn from_bytes(bytes: &[u8; rosetta_proto::SIGNATURE_LEN]) -> Self {
        let s = BigUint::from_bytes_be(&bytes[..PRIVKEY_BYTES]);
        let e = BigUint::from_bytes_be(&bytes[PRIVKEY_BYTES..]);
        Self { s, e }
    }
}

fn hash_to_scalar(params: &GroupParams, parts: &[&[u8]]) -> BigUint {
    let digest = hash_concat(parts);
    BigUint::from_bytes_be(&digest) % &params.q
}

fn mod_q(value: &BigInt, q: &BigUint) -> BigUint {
    let q_signed = BigInt::from_biguint(Sign::Plus, q.clone());
    let reduced = value.mod_floor(&q_signed);
    reduced.to_biguint().expect("mod_floor result is non-negative")
}

/// sign `message` under `private_key`, drawing a fresh nonce from `rng`.
pub fn sign<R: rand::RngCore + rand::CryptoRng>(
    params: &GroupParams,
    private_key: &BigUint,
    message: &[u8],
    rng: &mut R,
) -> Signature {
    loop {
        let k = random_scalar(params, rng);
        let r = params.pow_g(&k);
        let r_bytes = crate::group::pubkey_to_bytes(&r);
        let e = hash_to_scalar(params, &[&r_bytes, message]);
        if e.is_zero() {
            continue;
        }

        let k_signed = BigInt::from_biguint(Sign::Plus, k);
        let x_signed = BigInt::from_biguint(Sign::Plus, private_key.clone());
        let e_signed = BigInt::from_biguint(Sign::Plus, e.clone());
        let s = mod_q(&(k_signed - x_signed * e_signed), &params.q);

        if !s.is_zero() {
            return Signature { s, e };
        }
    }
}

/// verify `sig` over `message` under `public_key`. Never panics on
/// attacker-controlled input — a malformed signature just fails to verify.
pub fn verify(params: &GroupParams, public_key: &BigUint, message: &[u8], sig: &Signature) -> Result<()> {
    if sig.s >= params.q || sig.e >= params.q {
        return Err(CryptoError::BadSignature);
    }
    let g_s = params.pow_g(&sig.s);
    let y_e = params.pow_mod_m(public_key, &sig.e);
    let r_prime = (&g_s * &y_e) % &params.m;
    let r_prime_bytes = crate::group::pubkey_to_bytes(&r_prime);
    let e_prime = hash_to_scalar(params, &[&r_prime_bytes, message]);

    if e_prime == sig.e {
        Ok(())
    } else {
        Err(CryptoError::BadSignature)
    }
}
