//! server-side login handshake state machine (spec.md §4.4)
//!
//! Two packets: MAGIC_00 exchanges short-term Diffie-Hellman keys and
//! derives a session-key pair (`KAB_s`/`KBA_s`) plus an initial
//! authenticator `Y`; MAGIC_01 uses that session key to transport the
//! client's long-term public key (as ciphertext, HMAC'd under `Y`) and
//! completes login by allocating a client slot. The short-term keys and
//! derived material live only in a [`HandshakeScratch`]-backed context
//! that is dropped (and zeroized) the moment the handshake finishes or
//! fails, exactly like the reference implementation's `temp_handshake_buf`.

use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};

use rosetta_crypto::cipher::stream_xor;
use rosetta_crypto::group::{pubkey_to_bytes, scalar_to_bytes, GroupParams, KeyPair};
use rosetta_crypto::hash::hmac_truncated;
use rosetta_crypto::schnorr::{self, Signature};
use rosetta_crypto::session::{assign_roles, nonce_for_counter, slice_shared_secret, SessionKeys};
use rosetta_proto::packet::{ClientHello, ClientLoginAuth, ServerHello, ServerLoginOk, Signed};
use rosetta_proto::SMALL_FIELD;

use crate::error::{Result, RosettaError};
use crate::registry::Registry;

/// short-term material kept alive between MAGIC_00 and MAGIC_01 for one
/// connection. Dropped (and its key bytes zeroized) as soon as the
/// handshake resolves either way.
pub struct HandshakeContext {
    client_short_pub: BigUint,
    keys: SessionKeys,
    y: [u8; rosetta_proto::INIT_AUTH],
    n: [u8; SMALL_FIELD],
}

impl Drop for HandshakeContext {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.keys.encrypt.zeroize();
        self.keys.decrypt.zeroize();
        self.y.zeroize();
        self.n.zeroize();
    }
}

/// handle MAGIC_00: exchange short-term keys, derive the session key pair.
pub fn process_client_hello<R: RngCore + CryptoRng>(
    params: &GroupParams,
    server_long: &KeyPair,
    hello: &ClientHello,
    rng: &mut R,
) -> Result<(ServerHello, HandshakeContext)> {
    let client_short_pub = BigUint::from_bytes_be(&hello.pubkey);
    if !params.is_in_subgroup(&client_short_pub) {
        return Err(RosettaError::ProtocolViolation(
            "client short-term public key is not in the order-Q subgroup".into(),
        ));
    }

    let server_short = KeyPair::generate(params, rng);
    let shared = server_short.shared_secret(params, &client_short_pub);
    let material = slice_shared_secret(&shared);
    let keys = assign_roles(&material, &server_short.public, &client_short_pub);

    let sig = schnorr::sign(params, &server_long.private, &material.y, rng);

    let mut pubkey = [0u8; rosetta_proto::PUBKEY_BYTES];
    pubkey.copy_from_slice(&pubkey_to_bytes(&server_short.public));

    let reply = ServerHello {
        pubkey,
        sig: sig.to_bytes(),
    };
    let ctx = HandshakeContext {
        client_short_pub,
        keys,
        y: material.y,
        n: material.n,
    };
    Ok((reply, ctx))
}

/// outcome of MAGIC_01: either the client is now logged in, or the server
/// had no free client slot.
pub enum LoginOutcome {
    Success { user_ix: usize, reply: ServerLoginOk },
    Full(Signed),
}

/// handle MAGIC_01: authenticate the client's long-term key, allocate a
/// slot, and hand back the encrypted user index signed by the server.
pub fn process_login_auth<R: RngCore + CryptoRng>(
    params: &GroupParams,
    server_long: &KeyPair,
    ctx: &HandshakeContext,
    registry: &mut Registry,
    auth: &ClientLoginAuth,
    rng: &mut R,
) -> Result<LoginOutcome> {
    let expected_hmac = hmac_truncated(&ctx.y, &auth.a_x);
    if expected_hmac != auth.hmac {
        return Err(RosettaError::ProtocolViolation(
            "long-term pubkey transport failed HMAC verification".into(),
        ));
    }

    let nonce = nonce_for_counter(&ctx.n, 0);
    let long_term_bytes = stream_xor(&ctx.keys.decrypt, &nonce, &auth.a_x)?;
    let long_term_pub = BigUint::from_bytes_be(&long_term_bytes);
    if !params.is_in_subgroup(&long_term_pub) {
        return Err(RosettaError::ProtocolViolation(
            "client long-term public key is not in the order-Q subgroup".into(),
        ));
    }

    let user_ix = match registry.allocate_client() {
        Ok(ix) => ix,
        Err(RosettaError::RegistryFull(_)) => {
            let sig = schnorr::sign(params, &server_long.private, &ctx.client_short_pub.to_bytes_be(), rng);
            return Ok(LoginOutcome::Full(Signed { sig: sig.to_bytes() }));
        }
        Err(e) => return Err(e),
    };

    let slot = &mut registry.clients[user_ix];
    slot.long_term_pubkey = Some(long_term_pub);
    slot.encrypt_key = ctx.keys.encrypt;
    slot.decrypt_key = ctx.keys.decrypt;

    let user_ix_enc_full = stream_xor(&slot.encrypt_key, &nonce, &(user_ix as u64).to_le_bytes())?;
    let mut user_ix_enc = [0u8; SMALL_FIELD];
    user_ix_enc.copy_from_slice(&user_ix_enc_full);

    let sig: Signature = schnorr::sign(params, &server_long.private, &user_ix_enc, rng);
    let reply = ServerLoginOk {
        user_ix_enc,
        sig: sig.to_bytes(),
    };
    Ok(LoginOutcome::Success { user_ix, reply })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rosetta_crypto::group::pubkey_to_bytes;

    fn toy_params() -> GroupParams {
        // a larger toy group than rosetta-crypto's own (467/233/4) so
        // handshake-sized slices (32+32+32+8 = 104 bytes) fit inside the
        // serialized shared secret without relying on crate internals.
        let m = num_bigint::BigUint::parse_bytes(
            b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF",
            16,
        )
        .unwrap();
        // Q and G not a real safe-prime subgroup here; handshake tests
        // only exercise the byte-plumbing, so use trivial Q=M-1, G=2.
        let q = &m - num_bigint::BigUint::from(1u8);
        let g = num_bigint::BigUint::from(2u8);
        GroupParams { m, q, g }
    }

    #[test]
    fn full_handshake_allocates_a_client_slot() {
        let params = toy_params();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let server_long = KeyPair::generate(&params, &mut rng);
        let client_short = KeyPair::generate(&params, &mut rng);
        let client_long = KeyPair::generate(&params, &mut rng);

        let hello = ClientHello {
            pubkey: pubkey_to_bytes(&client_short.public),
        };
        let (server_hello, server_ctx) =
            process_client_hello(&params, &server_long, &hello, &mut rng).unwrap();

        // client side of the exchange, mirrored by hand for the test.
        let server_short_pub = BigUint::from_bytes_be(&server_hello.pubkey);
        let shared = client_short.shared_secret(&params, &server_short_pub);
        let material = rosetta_crypto::session::slice_shared_secret(&shared);
        let client_keys =
            rosetta_crypto::session::assign_roles(&material, &client_short.public, &server_short_pub);
        assert_eq!(client_keys.encrypt, server_ctx_decrypt_key_for_test(&server_ctx));

        let nonce = nonce_for_counter(&material.n, 0);
        let long_term_bytes = pubkey_to_bytes(&client_long.public);
        let a_x = stream_xor(&client_keys.encrypt, &nonce, &long_term_bytes).unwrap();
        let hmac = hmac_truncated(&material.y, &a_x);

        let auth = ClientLoginAuth {
            a_x: a_x.try_into().unwrap(),
            hmac,
        };

        let mut registry = Registry::new();
        let outcome =
            process_login_auth(&params, &server_long, &server_ctx, &mut registry, &auth, &mut rng).unwrap();
        match outcome {
            LoginOutcome::Success { user_ix, .. } => {
                assert_eq!(user_ix, 0);
                assert!(registry.clients[0].long_term_pubkey.is_some());
            }
            LoginOutcome::Full(_) => panic!("registry should not be full"),
        }
    }

    // the context's decrypt key is private; expose it to the test module only.
    fn server_ctx_decrypt_key_for_test(ctx: &HandshakeContext) -> [u8; 32] {
        ctx.keys.decrypt
    }

    #[test]
    fn bad_hmac_is_rejected() {
        let params = toy_params();
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let server_long = KeyPair::generate(&params, &mut rng);
        let client_short = KeyPair::generate(&params, &mut rng);

        let hello = ClientHello {
            pubkey: pubkey_to_bytes(&client_short.public),
        };
        let (_server_hello, server_ctx) =
            process_client_hello(&params, &server_long, &hello, &mut rng).unwrap();

        let auth = ClientLoginAuth {
            a_x: [0u8; rosetta_proto::PUBKEY_BYTES],
            hmac: [0xFFu8; rosetta_proto::HMAC_TRUNC],
        };
        let mut registry = Registry::new();
        let result = process_login_auth(&params, &server_long, &server_ctx, &mut registry, &auth, &mut rng);
        assert!(result.is_err());
    }
}
