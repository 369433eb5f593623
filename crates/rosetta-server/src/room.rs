//! server-side room and messaging handlers (spec.md §4.6)
//!
//! Every request here is signed by the requester's long-term key and
//! verified against the pubkey the handshake recorded for that client
//! slot — the registry is the only source of truth for "who is this
//! connection", the packet's own `user_ix` field is never trusted on its
//! own. Room-membership broadcasts go through [`Registry::enqueue_pending`]
//! rather than being written to a socket directly, since the handler layer
//! never touches the network itself (spec.md §4.6, §5).

use rand::{CryptoRng, RngCore};

use rosetta_crypto::group::{pubkey_to_bytes, GroupParams, KeyPair};
use rosetta_crypto::cipher::stream_xor;
use rosetta_crypto::schnorr;
use rosetta_crypto::session::nonce_for_counter;
use rosetta_proto::packet::{
    GuestEntry, IdentitySigned, JoinReply, NewGuestNotify, RoomRequest, Signed, TextEnvelope, TextSlot,
};
use rosetta_proto::{MAGIC_50, MAGIC_51, SESSION_KEY, SMALL_FIELD};

use crate::error::{Result, RosettaError};
use crate::registry::Registry;

fn verify_request(params: &GroupParams, registry: &Registry, user_ix: usize, req: &RoomRequest) -> Result<()> {
    let slot = registry
        .clients
        .get(user_ix)
        .filter(|s| s.in_use)
        .ok_or(RosettaError::UnknownIndex("client", user_ix))?;
    let pubkey = slot
        .long_term_pubkey
        .as_ref()
        .ok_or_else(|| RosettaError::ProtocolViolation("client has no long-term key on record".into()))?;

    let mut signed_over = Vec::with_capacity(8 + SESSION_KEY + 16);
    signed_over.extend_from_slice(&req.user_ix.to_le_bytes());
    signed_over.extend_from_slice(&req.k_onetime);
    signed_over.extend_from_slice(&req.payload);

    let sig = schnorr::Signature::from_bytes(&req.sig);
    schnorr::verify(params, pubkey, &signed_over, &sig)?;
    Ok(())
}

/// create a new room owned by `user_ix`. `req.user_ix` is the requester's
/// own index, used only as part of the signed payload.
pub fn create_room<R: RngCore + CryptoRng>(
    params: &GroupParams,
    server_long: &KeyPair,
    registry: &mut Registry,
    user_ix: usize,
    req: &RoomRequest,
    rng: &mut R,
) -> Result<Result<Signed>> {
    verify_request(params, registry, user_ix, req)?;

    if registry.clients[user_ix].room_ix != rosetta_proto::NO_ROOM {
        return Err(RosettaError::ProtocolViolation(
            "client already belongs to a room".into(),
        ));
    }

    let room_ix = match registry.allocate_room(user_ix) {
        Ok(ix) => ix,
        Err(RosettaError::RegistryFull(_)) => {
            let sig = schnorr::sign(params, &server_long.private, b"room-full", rng);
            return Ok(Err(Signed { sig: sig.to_bytes() }));
        }
        Err(e) => return Err(e),
    };
    registry.clients[user_ix].room_ix = room_ix as u32;

    let sig = schnorr::sign(params, &server_long.private, &(room_ix as u64).to_le_bytes(), rng);
    Ok(Ok(Signed { sig: sig.to_bytes() }))
}

/// join an existing room. `req.user_ix` is overloaded here to carry the
/// target room index, matching the reference layout's reuse of the same
/// field across create and join requests (see DESIGN.md).
pub fn join_room<R: RngCore + CryptoRng>(
    params: &GroupParams,
    server_long: &KeyPair,
    registry: &mut Registry,
    user_ix: usize,
    req: &RoomRequest,
    rng: &mut R,
) -> Result<Result<JoinReply, Signed>> {
    verify_request(params, registry, user_ix, req)?;

    let target_room = req.user_ix as usize;
    let room_exists = registry
        .rooms
        .get(target_room)
        .map(|r| r.in_use)
        .unwrap_or(false);
    if !room_exists || registry.clients[user_ix].room_ix != rosetta_proto::NO_ROOM {
        let sig = schnorr::sign(params, &server_long.private, b"join-failed", rng);
        return Ok(Err(Signed { sig: sig.to_bytes() }));
    }

    let existing_members: Vec<usize> = registry.room_members(target_room).collect();

    let mut k_onetime = [0u8; SESSION_KEY];
    rng.fill_bytes(&mut k_onetime);
    let encrypt_key = registry.clients[user_ix].encrypt_key;
    let transport_nonce = nonce_for_counter(&[0u8; SMALL_FIELD], 0);
    let k_onetime_enc_vec = stream_xor(&encrypt_key, &transport_nonce, &k_onetime)?;
    let mut k_onetime_enc = [0u8; SESSION_KEY];
    k_onetime_enc.copy_from_slice(&k_onetime_enc_vec);

    let mut guests = Vec::with_capacity(existing_members.len());
    for (i, member_ix) in existing_members.iter().enumerate() {
        let member = &registry.clients[*member_ix];
        let member_pub = member
            .long_term_pubkey
            .as_ref()
            .ok_or_else(|| RosettaError::ProtocolViolation("roommate missing long-term key".into()))?;
        let slot_nonce = nonce_for_counter(&[0u8; SMALL_FIELD], i as u64 + 1);
        let id_enc = stream_xor(&k_onetime, &slot_nonce, &(*member_ix as u64).to_le_bytes())?;
        let pubkey_enc = stream_xor(&k_onetime, &slot_nonce, &pubkey_to_bytes(member_pub))?;

        let mut user_id = [0u8; SMALL_FIELD];
        user_id.copy_from_slice(&id_enc);
        let mut pubkey = [0u8; rosetta_proto::PUBKEY_BYTES];
        pubkey.copy_from_slice(&pubkey_enc);
        guests.push(GuestEntry { user_id, pubkey });
    }

    registry.add_room_member(target_room, user_ix)?;
    registry.clients[user_ix].room_ix = target_room as u32;

    let mut signed_over = k_onetime_enc.to_vec();
    for g in &guests {
        signed_over.extend_from_slice(&g.user_id);
        signed_over.extend_from_slice(&g.pubkey);
    }
    let sig = schnorr::sign(params, &server_long.private, &signed_over, rng);

    notify_new_guest(registry, target_room, user_ix, &existing_members, rng, params, server_long)?;

    Ok(Ok(JoinReply {
        k_onetime_enc,
        guests,
        sig: sig.to_bytes(),
    }))
}

/// queue a MAGIC_21 notification for every existing roommate, telling
/// them about the client that just joined.
fn notify_new_guest<R: RngCore + CryptoRng>(
    registry: &mut Registry,
    room_ix: usize,
    new_member_ix: usize,
    existing_members: &[usize],
    rng: &mut R,
    params: &GroupParams,
    server_long: &KeyPair,
) -> Result<()> {
    let new_member_pub = registry.clients[new_member_ix]
        .long_term_pubkey
        .clone()
        .ok_or_else(|| RosettaError::ProtocolViolation("new member missing long-term key".into()))?;

    for recipient_ix in existing_members {
        let recipient_encrypt_key = registry.clients[*recipient_ix].encrypt_key;
        let mut k_onetime = [0u8; SESSION_KEY];
        rng.fill_bytes(&mut k_onetime);
        let nonce = nonce_for_counter(&[0u8; SMALL_FIELD], room_ix as u64);
        let k_onetime_enc_vec = stream_xor(&recipient_encrypt_key, &nonce, &k_onetime)?;
        let guest_id_enc_vec = stream_xor(&k_onetime, &nonce, &(new_member_ix as u64).to_le_bytes())?;
        let guest_pubkey_enc_vec = stream_xor(&k_onetime, &nonce, &pubkey_to_bytes(&new_member_pub))?;

        let mut k_onetime_enc = [0u8; SESSION_KEY];
        k_onetime_enc.copy_from_slice(&k_onetime_enc_vec);
        let mut guest_id_enc = [0u8; SMALL_FIELD];
        guest_id_enc.copy_from_slice(&guest_id_enc_vec);
        let mut guest_pubkey_enc = [0u8; rosetta_proto::PUBKEY_BYTES];
        guest_pubkey_enc.copy_from_slice(&guest_pubkey_enc_vec);

        let mut signed_over = k_onetime_enc.to_vec();
        signed_over.extend_from_slice(&guest_id_enc);
        signed_over.extend_from_slice(&guest_pubkey_enc);
        let sig = schnorr::sign(params, &server_long.private, &signed_over, rng);

        let notify = NewGuestNotify {
            k_onetime_enc,
            guest_id_enc,
            guest_pubkey_enc,
            sig: sig.to_bytes(),
        };
        registry.enqueue_pending(*recipient_ix, notify.encode());
    }
    Ok(())
}

/// fan out a send-text request (MAGIC_30) to every slot named in its
/// additional-data, after countersigning it. The server never decrypts
/// `msg_enc` — only the sender and each named recipient hold the key for
/// their own slot.
pub fn send_text<R: RngCore + CryptoRng>(
    params: &GroupParams,
    server_long: &KeyPair,
    registry: &mut Registry,
    sender_ix: usize,
    envelope: &TextEnvelope,
    rng: &mut R,
) -> Result<()> {
    let slot = registry
        .clients
        .get(sender_ix)
        .filter(|s| s.in_use)
        .ok_or(RosettaError::UnknownIndex("client", sender_ix))?;
    let pubkey = slot
        .long_term_pubkey
        .clone()
        .ok_or_else(|| RosettaError::ProtocolViolation("client has no long-term key on record".into()))?;

    let mut signed_over = envelope.sender_ix.to_le_bytes().to_vec();
    signed_over.extend_from_slice(&envelope.text_len.to_le_bytes());
    for slot in &envelope.slots {
        signed_over.extend_from_slice(&slot.guest_id);
        signed_over.extend_from_slice(&slot.k_i_enc);
        signed_over.extend_from_slice(&slot.msg_enc);
    }
    let client_sig = schnorr::Signature::from_bytes(&envelope.client_sig);
    schnorr::verify(params, &pubkey, &signed_over, &client_sig)?;

    let server_sig = schnorr::sign(params, &server_long.private, &signed_over, rng);
    let delivered = TextEnvelope {
        sender_ix: envelope.sender_ix,
        text_len: envelope.text_len,
        slots: envelope.slots.clone(),
        client_sig: envelope.client_sig,
        server_sig: Some(server_sig.to_bytes()),
    };
    let encoded = delivered.encode();

    for recipient_slot in &envelope.slots {
        let recipient_ix = u64::from_le_bytes(
            recipient_slot.guest_id[..8]
                .try_into()
                .map_err(|_| RosettaError::ProtocolViolation("bad guest_id width".into()))?,
        ) as usize;
        registry.enqueue_pending(recipient_ix, encoded.clone());
    }
    Ok(())
}

/// MAGIC_40: either nothing new, or one queued envelope handed back
/// verbatim for the dispatcher to write straight to the socket.
pub fn poll(registry: &mut Registry, user_ix: usize) -> Result<Option<Vec<u8>>> {
    registry
        .clients
        .get(user_ix)
        .filter(|s| s.in_use)
        .ok_or(RosettaError::UnknownIndex("client", user_ix))?;
    Ok(registry.drain_pending(user_ix))
}

/// MAGIC_50: the client leaves its current room. If it was the owner the
/// whole room closes (MAGIC_51 broadcast); otherwise the other roommates
/// get a MAGIC_50 notification naming who left.
pub fn leave_room<R: RngCore + CryptoRng>(
    params: &GroupParams,
    server_long: &KeyPair,
    registry: &mut Registry,
    user_ix: usize,
    req: &IdentitySigned,
    rng: &mut R,
) -> Result<()> {
    let slot = registry
        .clients
        .get(user_ix)
        .filter(|s| s.in_use)
        .ok_or(RosettaError::UnknownIndex("client", user_ix))?;
    let pubkey = slot
        .long_term_pubkey
        .clone()
        .ok_or_else(|| RosettaError::ProtocolViolation("client has no long-term key on record".into()))?;
    let sig = schnorr::Signature::from_bytes(&req.sig);
    schnorr::verify(params, &pubkey, &req.user_id, &sig)?;

    let room_ix = registry.clients[user_ix].room_ix as usize;
    if room_ix == rosetta_proto::NO_ROOM as usize {
        return Err(RosettaError::ProtocolViolation("client is not in a room".into()));
    }
    let owner_ix = registry.rooms[room_ix].owner_ix;
    let other_members: Vec<usize> = registry
        .room_members(room_ix)
        .filter(|ix| *ix != user_ix)
        .collect();

    registry.remove_room_member(room_ix, user_ix)?;
    registry.clients[user_ix].room_ix = rosetta_proto::NO_ROOM;

    if user_ix == owner_ix {
        let sig = schnorr::sign(params, &server_long.private, b"owner-left", rng);
        let notify = Signed { sig: sig.to_bytes() };
        let encoded = notify.encode(MAGIC_51);
        for member_ix in &other_members {
            registry.enqueue_pending(*member_ix, encoded.clone());
            registry.clients[*member_ix].room_ix = rosetta_proto::NO_ROOM;
        }
        registry.free_room(room_ix)?;
    } else {
        let mut user_id = [0u8; SMALL_FIELD];
        user_id.copy_from_slice(&(user_ix as u64).to_le_bytes());
        let sig = schnorr::sign(params, &server_long.private, &user_id, rng);
        let notify = IdentitySigned { user_id, sig: sig.to_bytes() };
        let encoded = notify.encode(MAGIC_50);
        for member_ix in &other_members {
            registry.enqueue_pending(*member_ix, encoded.clone());
        }
    }
    Ok(())
}

/// MAGIC_60: the client logs off entirely — leaves its room first if it
/// is in one, then frees its client slot.
pub fn logoff<R: RngCore + CryptoRng>(
    params: &GroupParams,
    server_long: &KeyPair,
    registry: &mut Registry,
    user_ix: usize,
    req: &IdentitySigned,
    rng: &mut R,
) -> Result<()> {
    if registry.clients[user_ix].room_ix != rosetta_proto::NO_ROOM {
        leave_room(params, server_long, registry, user_ix, req, rng)?;
    } else {
        let slot = registry
            .clients
            .get(user_ix)
            .filter(|s| s.in_use)
            .ok_or(RosettaError::UnknownIndex("client", user_ix))?;
        let pubkey = slot
            .long_term_pubkey
            .clone()
            .ok_or_else(|| RosettaError::ProtocolViolation("client has no long-term key on record".into()))?;
        let sig = schnorr::Signature::from_bytes(&req.sig);
        schnorr::verify(params, &pubkey, &req.user_id, &sig)?;
    }
    registry.free_client(user_ix)
}
