//! the multiplicative group Rosetta's Diffie-Hellman and signatures run over
//! (spec.md §3): a 3071-bit prime modulus `M`, a 320-bit prime order `Q`
//! dividing `M-1`, and a generator `G` of the order-`Q` subgroup.
//!
//! `num-bigint`'s `modpow` stands in for the reference implementation's
//! hand-rolled Montgomery exponentiation — both compute the same integer,
//! and the Montgomery form is strictly a performance detail the protocol
//! itself does not depend on.

use num_bigint::BigUint;
use num_traits::One;

use crate::error::{CryptoError, Result};
use rosetta_proto::{PRIVKEY_BYTES, PUBKEY_BYTES};

/// the shared group parameters, loaded once at process start from the
/// `saved_M.dat` / `saved_Q.dat` / `saved_G.dat` files (spec.md §6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupParams {
    pub m: BigUint,
    pub q: BigUint,
    pub g: BigUint,
}

impl GroupParams {
    /// build from big-endian magnitude bytes, checking `G` actually
    /// generates the order-`Q` subgroup of `Z/MZ`.
    pub fn new(m: &[u8], q: &[u8], g: &[u8]) -> Result<Self> {
        let m = BigUint::from_bytes_be(m);
        let q = BigUint::from_bytes_be(q);
        let g = BigUint::from_bytes_be(g);

        if m.bits() == 0 || q.bits() == 0 {
            return Err(CryptoError::BadGroupParams("M or Q is zero".into()));
        }
        let m_minus_one = &m - BigUint::one();
        if &m_minus_one % &q != BigUint::from(0u8) {
            return Err(CryptoError::BadGroupParams("Q does not divide M-1".into()));
        }
        let params = Self { m, q, g };
        if !params.is_in_subgroup(&params.g) {
            return Err(CryptoError::BadGroupParams(
                "G does not generate the order-Q subgroup".into(),
            ));
        }
        Ok(params)
    }

    /// spec.md's subgroup check: `A^((M-1)/Q) mod M == 1`.
    pub fn is_in_subgroup(&self, candidate: &BigUint) -> bool {
        if candidate.is_zero() || candidate >= &self.m {
            return false;
        }
        let cofactor = (&self.m - BigUint::one()) / &self.q;
        candidate.modpow(&cofactor, &self.m) == BigUint::one()
    }

    /// `base^exp mod M`.
    pub fn pow_mod_m(&self, base: &BigUint, exp: &BigUint) -> BigUint {
        base.modpow(exp, &self.m)
    }

    /// `G^exp mod M`.
    pub fn pow_g(&self, exp: &BigUint) -> BigUint {
        self.g.modpow(exp, &self.m)
    }
}

trait IsZero {
    fn is_zero(&self) -> bool;
}
impl IsZero for BigUint {
    fn is_zero(&self) -> bool {
        *self == BigUint::from(0u8)
    }
}

/// a private/public key pair over a [`GroupParams`] group: `x` in `[1, Q)`
/// and `Y = G^x mod M`.
#[derive(Clone)]
pub struct KeyPair {
    pub private: BigUint,
    pub public: BigUint,
}

impl KeyPair {
    pub fn generate<R: rand::RngCore + rand::CryptoRng>(params: &GroupParams, rng: &mut R) -> Self {
        let private = random_scalar(params, rng);
        let public = params.pow_g(&private);
        Self { private, public }
    }

    pub fn from_private(params: &GroupParams, private: BigUint) -> Self {
        let public = params.pow_g(&private);
        Self { private, public }
    }

    /// the DH shared secret `peer_public^self.private mod M`.
    pub fn shared_secret(&self, params: &GroupParams, peer_public: &BigUint) -> BigUint {
        params.pow_mod_m(peer_public, &self.private)
    }
}

/// a uniform scalar in `[1, Q)`, suitable for a private exponent.
pub fn random_scalar<R: rand::RngCore + rand::CryptoRng>(params: &GroupParams, rng: &mut R) -> BigUint {
    loop {
        let mut bytes = vec![0u8; PRIVKEY_BYTES];
        rng.fill_bytes(&mut bytes);
        let candidate = BigUint::from_bytes_be(&bytes) % &params.q;
        if candidate != BigUint::from(0u8) {
            return candidate;
        }
    }
}

/// serialize a field element as a fixed-width big-endian byte string,
/// left-padded with zeros (never truncates — callers size buffers from
/// the group's own bit length).
pub fn to_fixed_bytes(value: &BigUint, width: usize) -> Vec<u8> {
    let raw = value.to_bytes_be();
    if raw.len() > width {
        // only ever happens for a malformed/foreign group; return the
        // low `width` bytes rather than panicking so callers can turn
        // this into a CodecError instead of crashing on attacker input.
        return raw[raw.len() - width..].to_vec();
    }
    let mut out = vec![0u8; width - raw.len()];
    out.extend_from_slice(&raw);
    out
}

pub fn pubkey_to_bytes(value: &BigUint) -> Vec<u8> {
    to_fixed_bytes(value, PUBKEY_BYTES)
}

pub fn scalar_to_bytes(value: &BigUint) -> Vec<u8> {
    to_fixed_bytes(value, PRIVKEY_BYTES)
}

#[cfg(test)]
pub(crate) fn toy_params() -> GroupParams {
    // a deliberately small, hand-verifiable group for tests only: M=467
    // (prime), Q=233 (prime, 467-1=466=2*233), G=4 (order 233 in Z/467Z).
    GroupParams::new(&467u32.to_be_bytes(), &233u32.to_be_bytes(), &4u32.to_be_bytes()).unwrap()
}
