//! client side of the login handshake (spec.md §4.4), mirroring
//! `rosetta_server::handshake` step for step from the other end of the
//! wire.

use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};

use rosetta_crypto::cipher::stream_xor;
use rosetta_crypto::group::{pubkey_to_bytes, GroupParams, KeyPair};
use rosetta_crypto::hash::hmac_truncated;
use rosetta_crypto::schnorr;
use rosetta_crypto::session::{assign_roles, nonce_for_counter, slice_shared_secret, NonceCounter};
use rosetta_proto::packet::{ClientHello, ClientLoginAuth, ServerLoginOk, ServerHello};

use crate::error::{ClientError, Result};
use crate::state::ServerSession;

/// first leg: draw a fresh short-term keypair and announce it.
pub fn start(params: &GroupParams, rng: &mut (impl RngCore + CryptoRng)) -> (KeyPair, ClientHello) {
    let short_term = KeyPair::generate(params, rng);
    let hello = ClientHello {
        pubkey: pubkey_to_bytes(&short_term.public),
    };
    (short_term, hello)
}

/// second leg: validate the server's short-term reply, derive the
/// session key pair, and build the encrypted-long-term-pubkey packet.
///
/// Returns the [`ClientLoginAuth`] to send, the long-term [`ServerSession`]
/// (whose keys survive the handshake), and the handshake-era `N` seed —
/// needed for exactly one more decryption, the login reply's
/// `user_ix_enc`, before it is discarded like the server discards its
/// own copy once `process_login_auth` returns.
pub fn process_server_hello(
    params: &GroupParams,
    server_pubkey: &BigUint,
    short_term: &KeyPair,
    long_term: &KeyPair,
    reply: &ServerHello,
) -> Result<(ClientLoginAuth, ServerSession, [u8; rosetta_proto::SMALL_FIELD])> {
    let server_short_pub = BigUint::from_bytes_be(&reply.pubkey);
    if !params.is_in_subgroup(&server_short_pub) {
        return Err(ClientError::ProtocolViolation(
            "server short-term public key is not in the order-Q subgroup".into(),
        ));
    }

    let shared = short_term.shared_secret(params, &server_short_pub);
    let material = slice_shared_secret(&shared);

    let sig = schnorr::Signature::from_bytes(&reply.sig);
    schnorr::verify(params, server_pubkey, &material.y, &sig)?;

    let keys = assign_roles(&material, &short_term.public, &server_short_pub);

    let nonce = nonce_for_counter(&material.n, 0);
    let long_term_bytes = pubkey_to_bytes(&long_term.public);
    let a_x = stream_xor(&keys.encrypt, &nonce, &long_term_bytes)?;
    let hmac = hmac_truncated(&material.y, &a_x);

    let auth = ClientLoginAuth {
        a_x: a_x.try_into().map_err(|_| {
            ClientError::ProtocolViolation("long-term pubkey did not serialize to PUBKEY_BYTES".into())
        })?,
        hmac,
    };

    let session = ServerSession {
        send_key: keys.encrypt,
        recv_key: keys.decrypt,
        nonce_counter: NonceCounter::new(),
    };

    Ok((auth, session, material.n))
}

/// third leg: decrypt the server's reply to learn this client's own
/// user index, or report that the server had no free slot.
pub enum LoginResult {
    Success { user_ix: u64 },
    Full,
}

pub fn process_login_reply(
    params: &GroupParams,
    server_pubkey: &BigUint,
    session: &ServerSession,
    handshake_n: &[u8; rosetta_proto::SMALL_FIELD],
    reply_magic: u64,
    raw: &[u8],
) -> Result<LoginResult> {
    if reply_magic == rosetta_proto::MAGIC_02 {
        let signed = rosetta_proto::packet::Signed::decode(raw)?;
        let sig = schnorr::Signature::from_bytes(&signed.sig);
        schnorr::verify(params, server_pubkey, b"login-full", &sig)?;
        return Ok(LoginResult::Full);
    }

    let reply = ServerLoginOk::decode(raw)?;
    let sig = schnorr::Signature::from_bytes(&reply.sig);
    schnorr::verify(params, server_pubkey, &reply.user_ix_enc, &sig)?;

    let nonce = nonce_for_counter(handshake_n, 0);
    let user_ix_bytes = stream_xor(&session.recv_key, &nonce, &reply.user_ix_enc)?;
    let user_ix = u64::from_le_bytes(
        user_ix_bytes[..8]
            .try_into()
            .map_err(|_| ClientError::ProtocolViolation("decrypted user_ix was not 8 bytes".into()))?,
    );
    Ok(LoginResult::Success { user_ix })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn toy_params() -> GroupParams {
        let m = BigUint::parse_bytes(
            b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF",
            16,
        )
        .unwrap();
        let q = &m - BigUint::from(1u8);
        let g = BigUint::from(2u8);
        GroupParams { m, q, g }
    }

    #[test]
    fn start_produces_a_subgroup_element() {
        let params = toy_params();
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let (short_term, hello) = start(&params, &mut rng);
        assert_eq!(hello.pubkey.len(), rosetta_proto::PUBKEY_BYTES);
        assert!(params.is_in_subgroup(&short_term.public));
    }

    #[test]
    fn server_hello_with_wrong_signature_is_rejected() {
        let params = toy_params();
        let mut rng = ChaCha20Rng::seed_from_u64(6);
        let server_long = KeyPair::generate(&params, &mut rng);
        let other_long = KeyPair::generate(&params, &mut rng);
        let (client_short, _hello) = start(&params, &mut rng);
        let client_long = KeyPair::generate(&params, &mut rng);

        let server_short = KeyPair::generate(&params, &mut rng);
        let bogus_sig = schnorr::sign(&params, &other_long.private, b"wrong message", &mut rng);
        let reply = ServerHello {
            pubkey: rosetta_crypto::group::pubkey_to_bytes(&server_short.public)
                .try_into()
                .unwrap(),
            sig: bogus_sig.to_bytes(),
        };

        let result = process_server_hello(
            &params,
            &server_long.public,
            &client_short,
            &client_long,
            &reply,
        );
        assert!(result.is_err());
    }
}
