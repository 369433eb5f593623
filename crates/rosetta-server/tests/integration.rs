//! end-to-end walk through login, room create/join, send-text, poll and
//! leave, exercising the `Dispatcher`/`Connection` API exactly the way
//! `main.rs`'s TCP loop would drive it, but without any socket.

use num_bigint::BigUint;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use rosetta_crypto::cipher::stream_xor;
use rosetta_crypto::group::{pubkey_to_bytes, GroupParams, KeyPair};
use rosetta_crypto::hash::hmac_truncated;
use rosetta_crypto::schnorr;
use rosetta_crypto::session::{assign_roles, nonce_for_counter, slice_shared_secret};
use rosetta_proto::packet::{
    ClientHello, ClientLoginAuth, IdentitySigned, JoinReply, RoomRequest, ServerHello, ServerLoginOk,
    TextEnvelope, TextSlot,
};
use rosetta_proto::{MAGIC_10, MAGIC_20, MAGIC_30, MAGIC_40, MAGIC_50, MAGIC_60, NO_ROOM};
use rosetta_server::dispatch::{process, Connection, Dispatcher};

// a ~3072-bit-shaped modulus with Q = M-1 and G = 2, used purely to
// exercise the byte-level protocol plumbing end to end. Not a real
// safe-prime group; see rosetta-server's own unit tests for the same
// caveat.
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

/// drive one full client login (MAGIC_00 + MAGIC_01) against `dispatcher`
/// through the same `process` entry point the TCP loop uses, returning
/// the client's long-term keypair and the user index the server assigned.
fn login(
    params: &GroupParams,
    dispatcher: &mut Dispatcher,
    conn: &mut Connection,
    rng: &mut ChaCha20Rng,
) -> (KeyPair, usize) {
    let client_short = KeyPair::generate(params, rng);
    let client_long = KeyPair::generate(params, rng);

    let hello = ClientHello {
        pubkey: pubkey_to_bytes(&client_short.public),
    };
    let reply = process(dispatcher, conn, &hello.encode()).unwrap().unwrap();
    let server_hello = ServerHello::decode(&reply).unwrap();

    let server_short_pub = BigUint::from_bytes_be(&server_hello.pubkey);
    let shared = client_short.shared_secret(params, &server_short_pub);
    let material = slice_shared_secret(&shared);
    let client_keys = assign_roles(&material, &client_short.public, &server_short_pub);

    let nonce = nonce_for_counter(&material.n, 0);
    let long_term_bytes = pubkey_to_bytes(&client_long.public);
    let a_x = stream_xor(&client_keys.encrypt, &nonce, &long_term_bytes).unwrap();
    let hmac = hmac_truncated(&material.y, &a_x);

    let auth = ClientLoginAuth {
        a_x: a_x.try_into().unwrap(),
        hmac,
    };
    let reply = process(dispatcher, conn, &auth.encode()).unwrap().unwrap();
    let _login_ok = ServerLoginOk::decode(&reply).unwrap();
    let user_ix = conn.user_ix.expect("login should have set user_ix");

    (client_long, user_ix)
}

fn sign_room_request(params: &GroupParams, long: &KeyPair, field: u64, rng: &mut ChaCha20Rng) -> RoomRequest {
    let k_onetime = [0u8; rosetta_proto::SESSION_KEY];
    let payload = [0u8; 16];
    let mut signed_over = field.to_le_bytes().to_vec();
    signed_over.extend_from_slice(&k_onetime);
    signed_over.extend_from_slice(&payload);
    let sig = schnorr::sign(params, &long.private, &signed_over, rng);
    RoomRequest {
        user_ix: field,
        k_onetime,
        payload,
        sig: sig.to_bytes(),
    }
}

#[test]
fn full_session_login_room_message_leave() {
    let params = toy_params();
    let mut rng = ChaCha20Rng::seed_from_u64(42);
    let server_long = KeyPair::generate(&params, &mut rng);
    let mut dispatcher = Dispatcher::new(params.clone(), server_long);

    let mut alice_conn = Connection::default();
    let (alice_long, alice_ix) = login(&params, &mut dispatcher, &mut alice_conn, &mut rng);

    let mut bob_conn = Connection::default();
    let (bob_long, bob_ix) = login(&params, &mut dispatcher, &mut bob_conn, &mut rng);
    assert_ne!(alice_ix, bob_ix);

    // Alice creates a room.
    let create_req = sign_room_request(&params, &alice_long, alice_ix as u64, &mut rng);
    let reply = process(&mut dispatcher, &mut alice_conn, &create_req.encode(MAGIC_10))
        .unwrap()
        .unwrap();
    assert_eq!(u64::from_le_bytes(reply[0..8].try_into().unwrap()), MAGIC_10);
    let room_ix = dispatcher.registry.clients[alice_ix].room_ix;
    assert_ne!(room_ix, NO_ROOM);

    // Bob joins the room Alice just created.
    let join_req = sign_room_request(&params, &bob_long, room_ix as u64, &mut rng);
    let reply = process(&mut dispatcher, &mut bob_conn, &join_req.encode(MAGIC_20))
        .unwrap()
        .unwrap();
    assert_eq!(u64::from_le_bytes(reply[0..8].try_into().unwrap()), MAGIC_20);
    let join_reply = JoinReply::decode(&reply).unwrap();
    assert_eq!(join_reply.guests.len(), 1);
    assert_eq!(dispatcher.registry.clients[bob_ix].room_ix, room_ix);

    // Alice should have a MAGIC_21 new-guest notification waiting.
    let alice_poll = process(
        &mut dispatcher,
        &mut alice_conn,
        &sign_poll(&params, &alice_long, &mut rng),
    )
    .unwrap()
    .unwrap();
    assert_eq!(
        u64::from_le_bytes(alice_poll[0..8].try_into().unwrap()),
        rosetta_proto::MAGIC_21
    );

    // Alice sends a text message addressed to Bob.
    let text_len = 5u64;
    let plaintext = b"hello";
    let k_i = [7u8; rosetta_proto::SESSION_KEY];
    let msg_nonce = nonce_for_counter(&[0u8; rosetta_proto::SMALL_FIELD], 0);
    let msg_enc = stream_xor(&k_i, &msg_nonce, plaintext).unwrap();
    let mut bob_id = [0u8; rosetta_proto::SMALL_FIELD];
    bob_id[..8].copy_from_slice(&(bob_ix as u64).to_le_bytes());
    let slot = TextSlot {
        guest_id: bob_id,
        k_i_enc: k_i,
        msg_enc,
    };

    let mut signed_over = (alice_ix as u64).to_le_bytes().to_vec();
    signed_over.extend_from_slice(&text_len.to_le_bytes());
    signed_over.extend_from_slice(&slot.guest_id);
    signed_over.extend_from_slice(&slot.k_i_enc);
    signed_over.extend_from_slice(&slot.msg_enc);
    let client_sig = schnorr::sign(&params, &alice_long.private, &signed_over, &mut rng);

    let envelope = TextEnvelope {
        sender_ix: alice_ix as u64,
        text_len,
        slots: vec![slot],
        client_sig: client_sig.to_bytes(),
        server_sig: None,
    };
    let reply = process(&mut dispatcher, &mut alice_conn, &envelope.encode()).unwrap();
    assert!(reply.is_none());

    // Bob polls and receives it.
    let bob_poll_req = sign_poll(&params, &bob_long, &mut rng);
    let delivered = process(&mut dispatcher, &mut bob_conn, &bob_poll_req)
        .unwrap()
        .unwrap();
    let delivered_envelope = TextEnvelope::decode(&delivered, true).unwrap();
    assert_eq!(delivered_envelope.slots.len(), 1);
    assert!(delivered_envelope.server_sig.is_some());
    let decrypted = stream_xor(&k_i, &msg_nonce, &delivered_envelope.slots[0].msg_enc).unwrap();
    assert_eq!(decrypted, plaintext);

    // Bob leaves the room.
    let mut bob_id_field = [0u8; rosetta_proto::SMALL_FIELD];
    bob_id_field[..8].copy_from_slice(&(bob_ix as u64).to_le_bytes());
    let leave_sig = schnorr::sign(&params, &bob_long.private, &bob_id_field, &mut rng);
    let leave_req = IdentitySigned {
        user_id: bob_id_field,
        sig: leave_sig.to_bytes(),
    };
    process(&mut dispatcher, &mut bob_conn, &leave_req.encode(MAGIC_50))
        .unwrap();
    assert_eq!(dispatcher.registry.clients[bob_ix].room_ix, NO_ROOM);

    // Bob logs off entirely.
    let logoff_sig = schnorr::sign(&params, &bob_long.private, &bob_id_field, &mut rng);
    let logoff_req = IdentitySigned {
        user_id: bob_id_field,
        sig: logoff_sig.to_bytes(),
    };
    process(&mut dispatcher, &mut bob_conn, &logoff_req.encode(MAGIC_60))
        .unwrap();
    assert!(!dispatcher.registry.clients[bob_ix].in_use);
}

fn sign_poll(params: &GroupParams, long: &KeyPair, rng: &mut ChaCha20Rng) -> Vec<u8> {
    let user_id = [0u8; rosetta_proto::SMALL_FIELD];
    let sig = schnorr::sign(params, &long.private, &user_id, rng);
    IdentitySigned { user_id, sig: sig.to_bytes() }.encode(MAGIC_40)
}
