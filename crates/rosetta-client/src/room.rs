//! client side of room creation/joining and message fan-out (spec.md
//! §4.6), the mirror image of `rosetta_server::room`: here we build
//! outgoing requests and decode incoming replies/notifications, updating
//! [`RoomState`] as we go.

use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};

use rosetta_crypto::cipher::stream_xor;
use rosetta_crypto::schnorr;
use rosetta_crypto::session::nonce_for_counter;
use rosetta_proto::packet::{
    IdentitySigned, JoinReply, NewGuestNotify, RoomRequest, Signed, TextEnvelope, TextSlot,
};
use rosetta_proto::{MAGIC_50, MAGIC_60, SESSION_KEY, SMALL_FIELD};

use rosetta_crypto::group::GroupParams;

use crate::error::{ClientError, Result};
use crate::state::{Roommate, RoomState, ServerSession};

/// build a signed create-room request (spec.md §4.6 "Create room").
/// `room_id`/`user_id` become the 16-byte payload encrypted under a
/// fresh one-time key, per the receiver's contract (spec.md §9 Open
/// Question 1).
pub fn build_create_room(
    params: &GroupParams,
    own_long: &rosetta_crypto::group::KeyPair,
    own_user_ix: u64,
    session: &ServerSession,
    room_id: u64,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<RoomRequest> {
    let mut k_onetime = [0u8; SESSION_KEY];
    rng.fill_bytes(&mut k_onetime);

    // mirrors `rosetta_server::room::join_room`'s fixed-counter transport
    // nonces rather than the long-running per-session counter: the
    // server's create-room handler never decrypts this field (it only
    // verifies the signature over it), so there is no shared counter
    // state to stay in sync with here.
    let nonce_k = nonce_for_counter(&[0u8; SMALL_FIELD], 0);
    let k_onetime_enc_vec = stream_xor(&session.send_key, &nonce_k, &k_onetime)?;
    let mut k_onetime_enc = [0u8; SESSION_KEY];
    k_onetime_enc.copy_from_slice(&k_onetime_enc_vec);

    let nonce_payload = nonce_for_counter(&[0u8; SMALL_FIELD], 1);
    let mut payload = room_id.to_le_bytes().to_vec();
    payload.extend_from_slice(&own_user_ix.to_le_bytes());
    let payload_enc_vec = stream_xor(&k_onetime, &nonce_payload, &payload)?;
    let mut payload_enc = [0u8; 16];
    payload_enc.copy_from_slice(&payload_enc_vec);

    let mut signed_over = own_user_ix.to_le_bytes().to_vec();
    signed_over.extend_from_slice(&k_onetime_enc);
    signed_over.extend_from_slice(&payload_enc);
    let sig = schnorr::sign(params, &own_long.private, &signed_over, rng);

    Ok(RoomRequest {
        user_ix: own_user_ix,
        k_onetime: k_onetime_enc,
        payload: payload_enc,
        sig: sig.to_bytes(),
    })
}

/// decode the server's create-room reply: either the signed success ack
/// (MAGIC_10) or the signed "no space" ack (MAGIC_11).
///
/// Neither reply shape carries the newly allocated room index back to
/// the client (spec.md §4.6 only specifies "signed packet 10" for
/// success) — callers learn their own room's index out of band (e.g. a
/// GUI-level room code), which is consistent with the reference server
/// leaving join/leave/send unimplemented beyond this stub (spec.md §9
/// Open Question 3; see DESIGN.md).
pub fn process_create_reply(
    params: &GroupParams,
    server_pubkey: &BigUint,
    reply_magic: u64,
    raw: &[u8],
) -> Result<()> {
    let signed = Signed::decode(raw)?;
    let sig = schnorr::Signature::from_bytes(&signed.sig);
    if reply_magic == rosetta_proto::MAGIC_11 {
        schnorr::verify(params, server_pubkey, b"room-full", &sig)?;
        return Err(ClientError::ProtocolViolation("server has no free room slots".into()));
    }
    Ok(())
}

/// build a signed join-room request. `target_room` is carried in the
/// same `user_ix` wire field a create request uses for self-identity —
/// the two request shapes are byte-identical, only the field's meaning
/// differs by direction (see DESIGN.md).
pub fn build_join_room(
    params: &GroupParams,
    own_long: &rosetta_crypto::group::KeyPair,
    target_room: u64,
    rng: &mut (impl RngCore + CryptoRng),
) -> RoomRequest {
    let k_onetime = [0u8; SESSION_KEY];
    let payload = [0u8; 16];
    let mut signed_over = target_room.to_le_bytes().to_vec();
    signed_over.extend_from_slice(&k_onetime);
    signed_over.extend_from_slice(&payload);
    let sig = schnorr::sign(params, &own_long.private, &signed_over, rng);
    RoomRequest {
        user_ix: target_room,
        k_onetime,
        payload,
        sig: sig.to_bytes(),
    }
}

/// decode a join reply: verify the server's signature, decrypt the
/// one-time key under this session's receive key, decrypt every guest
/// entry under it, and populate one roommate slot per entry.
pub fn process_join_reply(
    params: &GroupParams,
    server_pubkey: &BigUint,
    session: &ServerSession,
    room_state: &mut RoomState,
    target_room: u64,
    reply: &JoinReply,
) -> Result<usize> {
    let mut signed_over = reply.k_onetime_enc.to_vec();
    for g in &reply.guests {
        signed_over.extend_from_slice(&g.user_id);
        signed_over.extend_from_slice(&g.pubkey);
    }
    let sig = schnorr::Signature::from_bytes(&reply.sig);
    schnorr::verify(params, server_pubkey, &signed_over, &sig)?;

    // matches `rosetta_server::room::join_room`'s fixed transport nonce
    // (counter 0) for `k_onetime_enc`; guest slots use counter `i+1`
    // under the now-decrypted one-time key, same as the server's loop.
    let nonce = nonce_for_counter(&[0u8; SMALL_FIELD], 0);
    let k_onetime_vec = stream_xor(&session.recv_key, &nonce, &reply.k_onetime_enc)?;
    let mut k_onetime = [0u8; SESSION_KEY];
    k_onetime.copy_from_slice(&k_onetime_vec);

    let mut inserted = 0;
    for (i, guest) in reply.guests.iter().enumerate() {
        let slot_nonce = nonce_for_counter(&[0u8; SMALL_FIELD], i as u64 + 1);
        let id_bytes = stream_xor(&k_onetime, &slot_nonce, &guest.user_id)?;
        let pubkey_bytes = stream_xor(&k_onetime, &slot_nonce, &guest.pubkey)?;
        let user_id = u64::from_le_bytes(
            id_bytes[..8]
                .try_into()
                .map_err(|_| ClientError::ProtocolViolation("guest id was not 8 bytes".into()))?,
        );
        let pubkey = BigUint::from_bytes_be(&pubkey_bytes);
        let roommate = Roommate {
            user_id,
            pubkey,
            send_key: [0u8; 32],
            recv_key: [0u8; 32],
            nonce_counter: rosetta_crypto::session::NonceCounter::new(),
        };
        room_state
            .insert(roommate)
            .ok_or(ClientError::RoommateTableFull)?;
        inserted += 1;
    }
    room_state.room_ix = Some(target_room);
    Ok(inserted)
}

/// decode a MAGIC_21 new-guest notification and add one roommate slot.
pub fn process_new_guest(
    params: &GroupParams,
    server_pubkey: &BigUint,
    session: &ServerSession,
    room_state: &mut RoomState,
    notify: &NewGuestNotify,
) -> Result<()> {
    let mut signed_over = notify.k_onetime_enc.to_vec();
    signed_over.extend_from_slice(&notify.guest_id_enc);
    signed_over.extend_from_slice(&notify.guest_pubkey_enc);
    let sig = schnorr::Signature::from_bytes(&notify.sig);
    schnorr::verify(params, server_pubkey, &signed_over, &sig)?;

    // matches `rosetta_server::room::notify_new_guest`'s single fixed
    // nonce (keyed on the room index) reused across all three fields.
    let nonce = nonce_for_counter(&[0u8; SMALL_FIELD], room_state.room_ix.unwrap_or(0));
    let k_onetime_vec = stream_xor(&session.recv_key, &nonce, &notify.k_onetime_enc)?;
    let mut k_onetime = [0u8; SESSION_KEY];
    k_onetime.copy_from_slice(&k_onetime_vec);

    let id_bytes = stream_xor(&k_onetime, &nonce, &notify.guest_id_enc)?;
    let pubkey_bytes = stream_xor(&k_onetime, &nonce, &notify.guest_pubkey_enc)?;
    let user_id = u64::from_le_bytes(
        id_bytes[..8]
            .try_into()
            .map_err(|_| ClientError::ProtocolViolation("guest id was not 8 bytes".into()))?,
    );
    let pubkey = BigUint::from_bytes_be(&pubkey_bytes);

    let roommate = Roommate {
        user_id,
        pubkey,
        send_key: [0u8; 32],
        recv_key: [0u8; 32],
        nonce_counter: rosetta_crypto::session::NonceCounter::new(),
    };
    room_state
        .insert(roommate)
        .ok_or(ClientError::RoommateTableFull)?;
    Ok(())
}

/// build a send-text envelope addressed to every current roommate,
/// following the receiver's contract (spec.md §9 Open Question 1): each
/// recipient slot carries a fresh per-message key `K_i`, itself
/// encrypted under the pairwise session key shared with that roommate.
pub fn build_send_text(
    params: &GroupParams,
    own_long: &rosetta_crypto::group::KeyPair,
    own_user_ix: u64,
    room_state: &mut RoomState,
    plaintext: &[u8],
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<TextEnvelope> {
    let text_len = plaintext.len() as u64;
    let mut slots = Vec::new();

    let roommate_ixs: Vec<usize> = room_state.occupied().map(|(ix, _)| ix).collect();
    for ix in roommate_ixs {
        let roommate = room_state.get_mut(ix).ok_or(ClientError::UnknownRoommate(ix))?;
        let mut k_i = [0u8; SESSION_KEY];
        rng.fill_bytes(&mut k_i);

        let msg_nonce = nonce_for_counter(&[0u8; SMALL_FIELD], roommate.nonce_counter.current());
        let msg_enc = stream_xor(&k_i, &msg_nonce, plaintext)?;
        roommate.nonce_counter.next();

        let key_nonce = nonce_for_counter(&[0u8; SMALL_FIELD], roommate.nonce_counter.current());
        let k_i_enc_vec = stream_xor(&roommate.send_key, &key_nonce, &k_i)?;
        roommate.nonce_counter.next();
        let mut k_i_enc = [0u8; SESSION_KEY];
        k_i_enc.copy_from_slice(&k_i_enc_vec);

        let mut guest_id = [0u8; SMALL_FIELD];
        guest_id[..8].copy_from_slice(&roommate.user_id.to_le_bytes());
        slots.push(TextSlot {
            guest_id,
            k_i_enc,
            msg_enc,
        });
    }

    let mut signed_over = own_user_ix.to_le_bytes().to_vec();
    signed_over.extend_from_slice(&text_len.to_le_bytes());
    for s in &slots {
        signed_over.extend_from_slice(&s.guest_id);
        signed_over.extend_from_slice(&s.k_i_enc);
        signed_over.extend_from_slice(&s.msg_enc);
    }
    let sig = schnorr::sign(params, &own_long.private, &signed_over, rng);

    Ok(TextEnvelope {
        sender_ix: own_user_ix,
        text_len,
        slots,
        client_sig: sig.to_bytes(),
        server_sig: None,
    })
}

/// verify and decrypt a delivered envelope (spec.md §4.6 "Receive text").
/// Returns the plaintext addressed to `own_user_ix`.
pub fn process_receive_text(
    params: &GroupParams,
    server_pubkey: &BigUint,
    room_state: &mut RoomState,
    own_user_ix: u64,
    envelope: &TextEnvelope,
) -> Result<Vec<u8>> {
    let server_sig_bytes = envelope
        .server_sig
        .ok_or_else(|| ClientError::ProtocolViolation("delivered envelope missing server signature".into()))?;

    let mut signed_over = envelope.sender_ix.to_le_bytes().to_vec();
    signed_over.extend_from_slice(&envelope.text_len.to_le_bytes());
    for s in &envelope.slots {
        signed_over.extend_from_slice(&s.guest_id);
        signed_over.extend_from_slice(&s.k_i_enc);
        signed_over.extend_from_slice(&s.msg_enc);
    }
    let server_sig = schnorr::Signature::from_bytes(&server_sig_bytes);
    schnorr::verify(params, server_pubkey, &signed_over, &server_sig)?;

    let sender_ix = envelope.sender_ix;
    let sender_room_ix = room_state
        .find_by_user_id(sender_ix)
        .ok_or(ClientError::UnknownRoommate(sender_ix as usize))?;
    let sender_pubkey = room_state
        .get(sender_room_ix)
        .map(|r| r.pubkey.clone())
        .ok_or(ClientError::UnknownRoommate(sender_room_ix))?;

    let client_sig = schnorr::Signature::from_bytes(&envelope.client_sig);
    schnorr::verify(params, &sender_pubkey, &signed_over, &client_sig)?;

    let own_slot = envelope
        .slots
        .iter()
        .find(|s| u64::from_le_bytes(s.guest_id[..8].try_into().unwrap()) == own_user_ix)
        .ok_or_else(|| ClientError::ProtocolViolation("no slot addressed to this client".into()))?;

    let sender = room_state
        .get_mut(sender_room_ix)
        .ok_or(ClientError::UnknownRoommate(sender_room_ix))?;

    // the sender encrypts the message under the counter value in use at
    // the time (N), then K_i under the next one (N+1) — see
    // build_send_text. Decryption must use the same two values even
    // though K_i has to be recovered first.
    let base = sender.nonce_counter.current();
    let msg_nonce = nonce_for_counter(&[0u8; SMALL_FIELD], base);
    let key_nonce = nonce_for_counter(&[0u8; SMALL_FIELD], base + 1);
    sender.nonce_counter.next();
    sender.nonce_counter.next();

    let k_i = stream_xor(&sender.recv_key, &key_nonce, &own_slot.k_i_enc)?;
    let plaintext = stream_xor(&k_i, &msg_nonce, &own_slot.msg_enc)?;

    Ok(plaintext)
}

/// build the signed poll request (spec.md §4.6 "Poll").
pub fn build_poll(
    params: &GroupParams,
    own_long: &rosetta_crypto::group::KeyPair,
    own_user_ix: u64,
    rng: &mut (impl RngCore + CryptoRng),
) -> IdentitySigned {
    let mut user_id = [0u8; SMALL_FIELD];
    user_id[..8].copy_from_slice(&own_user_ix.to_le_bytes());
    let sig = schnorr::sign(params, &own_long.private, &user_id, rng);
    IdentitySigned { user_id, sig: sig.to_bytes() }
}

/// build a signed leave-room request (C→S, MAGIC_50).
pub fn build_leave(
    params: &GroupParams,
    own_long: &rosetta_crypto::group::KeyPair,
    own_user_ix: u64,
    rng: &mut (impl RngCore + CryptoRng),
) -> Vec<u8> {
    build_poll(params, own_long, own_user_ix, rng).encode(MAGIC_50)
}

/// build a signed logoff request (C→S, MAGIC_60).
pub fn build_logoff(
    params: &GroupParams,
    own_long: &rosetta_crypto::group::KeyPair,
    own_user_ix: u64,
    rng: &mut (impl RngCore + CryptoRng),
) -> Vec<u8> {
    build_poll(params, own_long, own_user_ix, rng).encode(MAGIC_60)
}

/// process a MAGIC_50 leave notification: one named roommate departs.
pub fn process_guest_left(
    params: &GroupParams,
    server_pubkey: &BigUint,
    room_state: &mut RoomState,
    notify: &IdentitySigned,
) -> Result<()> {
    let sig = schnorr::Signature::from_bytes(&notify.sig);
    schnorr::verify(params, server_pubkey, &notify.user_id, &sig)?;
    let user_id = u64::from_le_bytes(notify.user_id[..8].try_into().unwrap());
    if let Some(ix) = room_state.find_by_user_id(user_id) {
        room_state.remove(ix);
    }
    Ok(())
}

/// process a MAGIC_51 owner-left broadcast: wipe the whole room.
pub fn process_owner_left(params: &GroupParams, server_pubkey: &BigUint, room_state: &mut RoomState, signed: &Signed) -> Result<()> {
    let sig = schnorr::Signature::from_bytes(&signed.sig);
    schnorr::verify(params, server_pubkey, b"owner-left", &sig)?;
    room_state.clear_room();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rosetta_crypto::group::KeyPair;
    use rosetta_proto::packet::GuestEntry;
    use rosetta_proto::PUBKEY_BYTES;

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

    fn toy_session(rng: &mut ChaCha20Rng) -> ServerSession {
        let mut send_key = [0u8; 32];
        let mut recv_key = [0u8; 32];
        rng.fill_bytes(&mut send_key);
        rng.fill_bytes(&mut recv_key);
        ServerSession {
            send_key,
            recv_key,
            nonce_counter: rosetta_crypto::session::NonceCounter::new(),
        }
    }

    #[test]
    fn create_room_request_is_signed_and_verifiable() {
        let params = toy_params();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let long = KeyPair::generate(&params, &mut rng);
        let session = toy_session(&mut rng);

        let req = build_create_room(&params, &long, 3, &session, 99, &mut rng).unwrap();

        let mut signed_over = req.user_ix.to_le_bytes().to_vec();
        signed_over.extend_from_slice(&req.k_onetime);
        signed_over.extend_from_slice(&req.payload);
        let sig = schnorr::Signature::from_bytes(&req.sig);
        assert!(schnorr::verify(&params, &long.public, &signed_over, &sig).is_ok());
    }

    #[test]
    fn join_reply_round_trip_populates_roommate_slot() {
        let params = toy_params();
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let server_long = KeyPair::generate(&params, &mut rng);
        let session = toy_session(&mut rng);
        let mut room_state = RoomState::new();

        // mirror the server's literal-nonce construction directly, since
        // `rosetta_server::room` is the producer of this packet shape.
        let mut k_onetime = [0u8; SESSION_KEY];
        rng.fill_bytes(&mut k_onetime);
        let nonce0 = nonce_for_counter(&[0u8; SMALL_FIELD], 0);
        let k_onetime_enc_vec = stream_xor(&session.recv_key, &nonce0, &k_onetime).unwrap();
        let mut k_onetime_enc = [0u8; SESSION_KEY];
        k_onetime_enc.copy_from_slice(&k_onetime_enc_vec);

        let guest_user_id: u64 = 7;
        let guest_long = KeyPair::generate(&params, &mut rng);
        let slot_nonce = nonce_for_counter(&[0u8; SMALL_FIELD], 1);
        let mut id_plain = [0u8; SMALL_FIELD];
        id_plain[..8].copy_from_slice(&guest_user_id.to_le_bytes());
        let pubkey_plain = rosetta_crypto::group::pubkey_to_bytes(&guest_long.public);
        let id_enc = stream_xor(&k_onetime, &slot_nonce, &id_plain).unwrap();
        let pubkey_enc_vec = stream_xor(&k_onetime, &slot_nonce, &pubkey_plain).unwrap();
        let mut pubkey_enc = [0u8; PUBKEY_BYTES];
        pubkey_enc.copy_from_slice(&pubkey_enc_vec);

        let mut signed_over = k_onetime_enc.to_vec();
        signed_over.extend_from_slice(&id_enc);
        signed_over.extend_from_slice(&pubkey_enc);
        let sig = schnorr::sign(&params, &server_long.private, &signed_over, &mut rng);

        let reply = JoinReply {
            k_onetime_enc,
            guests: vec![GuestEntry {
                user_id: id_enc.try_into().unwrap(),
                pubkey: pubkey_enc,
            }],
            sig: sig.to_bytes(),
        };

        let inserted = process_join_reply(&params, &server_long.public, &session, &mut room_state, 42, &reply)
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(room_state.room_ix, Some(42));
        let ix = room_state.find_by_user_id(guest_user_id).unwrap();
        assert_eq!(room_state.get(ix).unwrap().user_id, guest_user_id);
    }

    #[test]
    fn send_then_receive_text_round_trips_between_two_roommates() {
        let params = toy_params();
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let server_long = KeyPair::generate(&params, &mut rng);
        let alice_long = KeyPair::generate(&params, &mut rng);
        let bob_long = KeyPair::generate(&params, &mut rng);

        let mut pairwise_a_to_b = [0u8; 32];
        let mut pairwise_b_to_a = [0u8; 32];
        rng.fill_bytes(&mut pairwise_a_to_b);
        rng.fill_bytes(&mut pairwise_b_to_a);

        let mut alice_room = RoomState::new();
        alice_room.own_user_ix = Some(1);
        alice_room.room_ix = Some(9);
        alice_room
            .insert(Roommate {
                user_id: 2,
                pubkey: bob_long.public.clone(),
                send_key: pairwise_a_to_b,
                recv_key: pairwise_b_to_a,
                nonce_counter: rosetta_crypto::session::NonceCounter::new(),
            })
            .unwrap();

        let mut bob_room = RoomState::new();
        bob_room.own_user_ix = Some(2);
        bob_room.room_ix = Some(9);
        bob_room
            .insert(Roommate {
                user_id: 1,
                pubkey: alice_long.public.clone(),
                send_key: pairwise_b_to_a,
                recv_key: pairwise_a_to_b,
                nonce_counter: rosetta_crypto::session::NonceCounter::new(),
            })
            .unwrap();

        let plaintext = b"hey bob";
        let mut envelope =
            build_send_text(&params, &alice_long, 1, &mut alice_room, plaintext, &mut rng).unwrap();

        let server_sig = schnorr::sign(
            &params,
            &server_long.private,
            &{
                let mut signed_over = envelope.sender_ix.to_le_bytes().to_vec();
                signed_over.extend_from_slice(&envelope.text_len.to_le_bytes());
                for s in &envelope.slots {
                    signed_over.extend_from_slice(&s.guest_id);
                    signed_over.extend_from_slice(&s.k_i_enc);
                    signed_over.extend_from_slice(&s.msg_enc);
                }
                signed_over
            },
            &mut rng,
        );
        envelope.server_sig = Some(server_sig.to_bytes());

        let decrypted =
            process_receive_text(&params, &server_long.public, &mut bob_room, 2, &envelope).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn owner_left_clears_room_state() {
        let params = toy_params();
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let server_long = KeyPair::generate(&params, &mut rng);
        let mut room_state = RoomState::new();
        room_state.room_ix = Some(5);
        room_state
            .insert(Roommate {
                user_id: 1,
                pubkey: BigUint::from(2u8),
                send_key: [0u8; 32],
                recv_key: [0u8; 32],
                nonce_counter: rosetta_crypto::session::NonceCounter::new(),
            })
            .unwrap();

        let sig = schnorr::sign(&params, &server_long.private, b"owner-left", &mut rng);
        let signed = Signed { sig: sig.to_bytes() };
        process_owner_left(&params, &server_long.public, &mut room_state, &signed).unwrap();

        assert!(room_state.is_empty());
        assert!(room_state.room_ix.is_none());
    }
}

