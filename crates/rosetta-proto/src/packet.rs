//! typed packet records and their wire encode/decode (spec.md §4.4, §4.6)
//!
//! Every shape here replaces the reference implementation's raw
//! `buf + offset` arithmetic with a named-field record whose `encode`/
//! `decode` are each other's inverse (spec.md §9, property P6 generalized).
//! None of these carry the bigint ABI headers the original put on the wire;
//! signatures are always exactly [`SIGNATURE_LEN`] bytes.

use crate::constants::*;
use crate::error::{CodecError, Result};

fn take<'a>(buf: &'a [u8], off: &mut usize, n: usize) -> Result<&'a [u8]> {
    let end = *off + n;
    if end > buf.len() {
        return Err(CodecError::Truncated {
            need: end,
            have: buf.len(),
        });
    }
    let slice = &buf[*off..end];
    *off = end;
    Ok(slice)
}

fn take_u64(buf: &[u8], off: &mut usize) -> Result<u64> {
    let s = take(buf, off, 8)?;
    Ok(u64::from_le_bytes(s.try_into().unwrap()))
}

fn take_array<const N: usize>(buf: &[u8], off: &mut usize) -> Result<[u8; N]> {
    let s = take(buf, off, N)?;
    Ok(s.try_into().unwrap())
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// `sig[SIGNATURE_LEN]` tail shared by almost every packet shape.
pub type Signature = [u8; SIGNATURE_LEN];

/// client's short-term public key announcement (C→S, MAGIC_00).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientHello {
    pub pubkey: Vec<u8>,
}

impl ClientHello {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.pubkey.len());
        put_u64(&mut out, MAGIC_00);
        put_u64(&mut out, self.pubkey.len() as u64);
        out.extend_from_slice(&self.pubkey);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut off = 8; // magic already consumed by caller's dispatch
        let pubkey_len = take_u64(buf, &mut off)? as usize;
        if pubkey_len == 0 || pubkey_len > PUBKEY_BYTES {
            return Err(CodecError::OutOfRange {
                field: "pubkey_len",
                reason: format!("{pubkey_len} not in 1..={PUBKEY_BYTES}"),
            });
        }
        let pubkey = take(buf, &mut off, pubkey_len)?.to_vec();
        Ok(Self { pubkey })
    }
}

/// server's short-term public key + signature of Y (S→C, MAGIC_00).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerHello {
    pub pubkey: [u8; PUBKEY_BYTES],
    pub sig: Signature,
}

impl ServerHello {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + PUBKEY_BYTES + 8 + SIGNATURE_LEN);
        put_u64(&mut out, MAGIC_00);
        put_u64(&mut out, PUBKEY_BYTES as u64);
        out.extend_from_slice(&self.pubkey);
        put_u64(&mut out, SIGNATURE_LEN as u64);
        out.extend_from_slice(&self.sig);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut off = 8;
        let pubkey_len = take_u64(buf, &mut off)? as usize;
        if pubkey_len != PUBKEY_BYTES {
            return Err(CodecError::LengthMismatch {
                magic: MAGIC_00,
                declared: pubkey_len,
                expected: PUBKEY_BYTES,
            });
        }
        let pubkey = take_array(buf, &mut off)?;
        let sig_len = take_u64(buf, &mut off)? as usize;
        if sig_len != SIGNATURE_LEN {
            return Err(CodecError::LengthMismatch {
                magic: MAGIC_00,
                declared: sig_len,
                expected: SIGNATURE_LEN,
            });
        }
        let sig = take_array(buf, &mut off)?;
        Ok(Self { pubkey, sig })
    }
}

/// client's encrypted long-term public key + HMAC (C→S, MAGIC_01).
///
/// `pubkey_len` is carried explicitly (always [`PUBKEY_BYTES`]) so the
/// dispatcher's declared-length check works the same way for every magic;
/// see DESIGN.md for why this departs from the original's implicit layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientLoginAuth {
    pub a_x: [u8; PUBKEY_BYTES],
    pub hmac: [u8; HMAC_TRUNC],
}

impl ClientLoginAuth {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + PUBKEY_BYTES + HMAC_TRUNC);
        put_u64(&mut out, MAGIC_01);
        put_u64(&mut out, PUBKEY_BYTES as u64);
        out.extend_from_slice(&self.a_x);
        out.extend_from_slice(&self.hmac);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut off = 8;
        let pubkey_len = take_u64(buf, &mut off)? as usize;
        if pubkey_len != PUBKEY_BYTES {
            return Err(CodecError::LengthMismatch {
                magic: MAGIC_01,
                declared: pubkey_len,
                expected: PUBKEY_BYTES,
            });
        }
        let a_x = take_array(buf, &mut off)?;
        let hmac = take_array(buf, &mut off)?;
        Ok(Self { a_x, hmac })
    }
}

/// server login success, carrying the encrypted user index (S→C, MAGIC_01).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerLoginOk {
    pub user_ix_enc: [u8; SMALL_FIELD],
    pub sig: Signature,
}

impl ServerLoginOk {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + SMALL_FIELD + 8 + SIGNATURE_LEN);
        put_u64(&mut out, MAGIC_01);
        out.extend_from_slice(&self.user_ix_enc);
        put_u64(&mut out, SIGNATURE_LEN as u64);
        out.extend_from_slice(&self.sig);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut off = 8;
        let user_ix_enc = take_array(buf, &mut off)?;
        let sig_len = take_u64(buf, &mut off)? as usize;
        if sig_len != SIGNATURE_LEN {
            return Err(CodecError::LengthMismatch {
                magic: MAGIC_01,
                declared: sig_len,
                expected: SIGNATURE_LEN,
            });
        }
        let sig = take_array(buf, &mut off)?;
        Ok(Self { user_ix_enc, sig })
    }
}

/// a packet that is nothing but `magic ‖ sig[SIGNATURE_LEN]`.
///
/// Used for MAGIC_02 (server full), MAGIC_11 (room full), the MAGIC_10/
/// MAGIC_20 success acks, MAGIC_40's "nothing new" reply, and MAGIC_51
/// (owner left).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signed {
    pub sig: Signature,
}

impl Signed {
    pub fn encode(&self, magic: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + SIGNATURE_LEN);
        put_u64(&mut out, magic);
        out.extend_from_slice(&self.sig);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut off = 8;
        let sig = take_array(buf, &mut off)?;
        Ok(Self { sig })
    }
}

/// identity + signature, no other payload.
///
/// Used for MAGIC_40 (poll), MAGIC_50 (leave, both directions) and
/// MAGIC_60 (logoff) bodies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentitySigned {
    pub user_id: [u8; SMALL_FIELD],
    pub sig: Signature,
}

impl IdentitySigned {
    pub fn encode(&self, magic: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + SMALL_FIELD + SIGNATURE_LEN);
        put_u64(&mut out, magic);
        out.extend_from_slice(&self.user_id);
        out.extend_from_slice(&self.sig);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut off = 8;
        let user_id = take_array(buf, &mut off)?;
        let sig = take_array(buf, &mut off)?;
        Ok(Self { user_id, sig })
    }
}

/// create-room / join-room request, identical outer layout (spec.md §4.6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomRequest {
    pub user_ix: u64,
    pub k_onetime: [u8; SESSION_KEY],
    pub payload: [u8; 16],
    pub sig: Signature,
}

impl RoomRequest {
    pub fn encode(&self, magic: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 8 + SESSION_KEY + 16 + SIGNATURE_LEN);
        put_u64(&mut out, magic);
        put_u64(&mut out, self.user_ix);
        out.extend_from_slice(&self.k_onetime);
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.sig);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut off = 8;
        let user_ix = take_u64(buf, &mut off)?;
        let k_onetime = take_array(buf, &mut off)?;
        let payload = take_array(buf, &mut off)?;
        let sig = take_array(buf, &mut off)?;
        Ok(Self {
            user_ix,
            k_onetime,
            payload,
            sig,
        })
    }
}

/// one `(user_id, pubkey)` pair inside a [`JoinReply`]'s guest list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestEntry {
    pub user_id: [u8; SMALL_FIELD],
    pub pubkey: [u8; PUBKEY_BYTES],
}

const GUEST_ENTRY_LEN: usize = SMALL_FIELD + PUBKEY_BYTES;

/// reply to a join request: current roommates, encrypted under a one-time key
/// (S→C, MAGIC_20).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinReply {
    pub k_onetime_enc: [u8; SESSION_KEY],
    pub guests: Vec<GuestEntry>,
    pub sig: Signature,
}

impl JoinReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(8 + SESSION_KEY + 8 + self.guests.len() * GUEST_ENTRY_LEN + SIGNATURE_LEN);
        put_u64(&mut out, MAGIC_20);
        out.extend_from_slice(&self.k_onetime_enc);
        put_u64(&mut out, self.guests.len() as u64);
        for g in &self.guests {
            out.extend_from_slice(&g.user_id);
            out.extend_from_slice(&g.pubkey);
        }
        out.extend_from_slice(&self.sig);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut off = 8;
        let k_onetime_enc = take_array(buf, &mut off)?;
        let n = take_u64(buf, &mut off)? as usize;
        let mut guests = Vec::with_capacity(n);
        for _ in 0..n {
            let user_id = take_array(buf, &mut off)?;
            let pubkey = take_array(buf, &mut off)?;
            guests.push(GuestEntry { user_id, pubkey });
        }
        let sig = take_array(buf, &mut off)?;
        Ok(Self {
            k_onetime_enc,
            guests,
            sig,
        })
    }
}

/// new-guest notification to existing roommates (S→C, MAGIC_21).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewGuestNotify {
    pub k_onetime_enc: [u8; SESSION_KEY],
    pub guest_id_enc: [u8; SMALL_FIELD],
    pub guest_pubkey_enc: [u8; PUBKEY_BYTES],
    pub sig: Signature,
}

impl NewGuestNotify {
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(8 + SESSION_KEY + SMALL_FIELD + PUBKEY_BYTES + SIGNATURE_LEN);
        put_u64(&mut out, MAGIC_21);
        out.extend_from_slice(&self.k_onetime_enc);
        out.extend_from_slice(&self.guest_id_enc);
        out.extend_from_slice(&self.guest_pubkey_enc);
        out.extend_from_slice(&self.sig);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut off = 8;
        let k_onetime_enc = take_array(buf, &mut off)?;
        let guest_id_enc = take_array(buf, &mut off)?;
        let guest_pubkey_enc = take_array(buf, &mut off)?;
        let sig = take_array(buf, &mut off)?;
        Ok(Self {
            k_onetime_enc,
            guest_id_enc,
            guest_pubkey_enc,
            sig,
        })
    }
}

/// one recipient's slot inside a [`TextEnvelope`]'s additional data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextSlot {
    pub guest_id: [u8; SMALL_FIELD],
    pub k_i_enc: [u8; SESSION_KEY],
    pub msg_enc: Vec<u8>,
}

/// send-text request (C→S, MAGIC_30) / fan-out delivery (S→C, MAGIC_30).
///
/// The server-delivered form carries `server_sig` in addition to the
/// sender's `client_sig`, per spec.md §4.6's receive-shape note. `slots`
/// carries its own count on the wire (mirroring [`JoinReply`]'s `N`) so
/// the dispatcher can frame the packet off the byte stream before it has
/// any of the additional data in hand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextEnvelope {
    pub sender_ix: u64,
    pub text_len: u64,
    pub slots: Vec<TextSlot>,
    pub client_sig: Signature,
    pub server_sig: Option<Signature>,
}

impl TextEnvelope {
    pub fn encode(&self) -> Vec<u8> {
        let slot_len = SMALL_FIELD + SESSION_KEY + self.text_len as usize;
        let mut out = Vec::with_capacity(
            32 + self.slots.len() * slot_len + SIGNATURE_LEN + SIGNATURE_LEN,
        );
        put_u64(&mut out, MAGIC_30);
        put_u64(&mut out, self.sender_ix);
        put_u64(&mut out, self.text_len);
        put_u64(&mut out, self.slots.len() as u64);
        for s in &self.slots {
            out.extend_from_slice(&s.guest_id);
            out.extend_from_slice(&s.k_i_enc);
            out.extend_from_slice(&s.msg_enc);
        }
        out.extend_from_slice(&self.client_sig);
        if let Some(server_sig) = &self.server_sig {
            out.extend_from_slice(server_sig);
        }
        out
    }

    pub fn decode(buf: &[u8], with_server_sig: bool) -> Result<Self> {
        let mut off = 8;
        let sender_ix = take_u64(buf, &mut off)?;
        let text_len = take_u64(buf, &mut off)?;
        if text_len as usize > MAX_TEXT {
            return Err(CodecError::OutOfRange {
                field: "text_len",
                reason: format!("{text_len} exceeds MAX_TEXT={MAX_TEXT}"),
            });
        }
        let count = take_u64(buf, &mut off)? as usize;
        let slot_len = SMALL_FIELD + SESSION_KEY + text_len as usize;
        let trailer = SIGNATURE_LEN + if with_server_sig { SIGNATURE_LEN } else { 0 };
        let expected_total = off + count * slot_len + trailer;
        if buf.len() != expected_total {
            return Err(CodecError::LengthMismatch {
                magic: MAGIC_30,
                declared: buf.len(),
                expected: expected_total,
            });
        }

        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            let guest_id = take_array(buf, &mut off)?;
            let k_i_enc = take_array(buf, &mut off)?;
            let msg_enc = take(buf, &mut off, text_len as usize)?.to_vec();
            slots.push(TextSlot {
                guest_id,
                k_i_enc,
                msg_enc,
            });
        }
        let client_sig = take_array(buf, &mut off)?;
        let server_sig = if with_server_sig {
            Some(take_array(buf, &mut off)?)
        } else {
            None
        };
        Ok(Self {
            sender_ix,
            text_len,
            slots,
            client_sig,
            server_sig,
        })
    }
}

/// dispatcher-side declared-length check (spec.md §4.6's length table).
///
/// `prefix` must contain at least the first 24 bytes already read off the
/// wire (magic + up to two `u64` fields) so variable-length magics can be
/// validated before the rest of the packet arrives. Length mismatch or an
/// unknown magic both mean "drop silently" per spec.md §4.6 and §7 — this
/// function only classifies which case applies.
pub fn expected_len(magic: u64, prefix: &[u8]) -> Result<usize> {
    let read_u64_at = |byte_off: usize| -> Result<u64> {
        let s = prefix.get(byte_off..byte_off + 8).ok_or(CodecError::Truncated {
            need: byte_off + 8,
            have: prefix.len(),
        })?;
        Ok(u64::from_le_bytes(s.try_into().unwrap()))
    };

    match magic {
        MAGIC_00 => {
            let pubkey_len = read_u64_at(8)? as usize;
            Ok(16 + pubkey_len)
        }
        MAGIC_01 => {
            let pubkey_len = read_u64_at(8)? as usize;
            Ok(16 + pubkey_len + HMAC_TRUNC)
        }
        MAGIC_10 | MAGIC_20 => Ok(8 + 8 + SESSION_KEY + 16 + SIGNATURE_LEN),
        MAGIC_30 => {
            let text_len = read_u64_at(16)? as usize;
            let count = read_u64_at(24)? as usize;
            let slot_len = SMALL_FIELD + SESSION_KEY + text_len;
            Ok(32 + count * slot_len + SIGNATURE_LEN)
        }
        MAGIC_40 | MAGIC_50 | MAGIC_60 => Ok(8 + SMALL_FIELD + SIGNATURE_LEN),
        other => Err(CodecError::UnknownMagic(other)),
    }
}

/// true when `magic` is one the dispatcher table (spec.md §4.6) accepts
/// directly from a client.
pub fn is_dispatchable_magic(magic: u64) -> bool {
    matches!(
        magic,
        MAGIC_00 | MAGIC_01 | MAGIC_10 | MAGIC_20 | MAGIC_30 | MAGIC_40 | MAGIC_50 | MAGIC_60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_hello_roundtrip() {
        let pkt = ClientHello {
            pubkey: vec![0xAB; 300],
        };
        let bytes = pkt.encode();
        assert_eq!(u64::from_le_bytes(bytes[0..8].try_into().unwrap()), MAGIC_00);
        let decoded = ClientHello::decode(&bytes).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn server_hello_roundtrip() {
        let pkt = ServerHello {
            pubkey: [7u8; PUBKEY_BYTES],
            sig: [9u8; SIGNATURE_LEN],
        };
        let bytes = pkt.encode();
        let decoded = ServerHello::decode(&bytes).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn server_hello_rejects_bad_pubkey_len() {
        let mut bytes = ServerHello {
            pubkey: [1u8; PUBKEY_BYTES],
            sig: [2u8; SIGNATURE_LEN],
        }
        .encode();
        bytes[8..16].copy_from_slice(&100u64.to_le_bytes());
        assert!(matches!(
            ServerHello::decode(&bytes),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn room_request_roundtrip() {
        let pkt = RoomRequest {
            user_ix: 3,
            k_onetime: [1u8; SESSION_KEY],
            payload: [2u8; 16],
            sig: [3u8; SIGNATURE_LEN],
        };
        let bytes = pkt.encode(MAGIC_10);
        assert_eq!(expected_len(MAGIC_10, &bytes).unwrap(), bytes.len());
        let decoded = RoomRequest::decode(&bytes).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn join_reply_roundtrip_with_multiple_guests() {
        let pkt = JoinReply {
            k_onetime_enc: [4u8; SESSION_KEY],
            guests: vec![
                GuestEntry {
                    user_id: [1u8; SMALL_FIELD],
                    pubkey: [2u8; PUBKEY_BYTES],
                },
                GuestEntry {
                    user_id: [3u8; SMALL_FIELD],
                    pubkey: [4u8; PUBKEY_BYTES],
                },
            ],
            sig: [5u8; SIGNATURE_LEN],
        };
        let bytes = pkt.encode();
        let decoded = JoinReply::decode(&bytes).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn text_envelope_roundtrip_client_and_server_form() {
        let pkt = TextEnvelope {
            sender_ix: 0,
            text_len: 6,
            slots: vec![
                TextSlot {
                    guest_id: [1u8; SMALL_FIELD],
                    k_i_enc: [2u8; SESSION_KEY],
                    msg_enc: b"abcdef".to_vec(),
                },
                TextSlot {
                    guest_id: [3u8; SMALL_FIELD],
                    k_i_enc: [4u8; SESSION_KEY],
                    msg_enc: b"ghijkl".to_vec(),
                },
            ],
            client_sig: [9u8; SIGNATURE_LEN],
            server_sig: None,
        };
        let bytes = pkt.encode();
        let decoded = TextEnvelope::decode(&bytes, false).unwrap();
        assert_eq!(decoded, pkt);

        let mut delivered = pkt.clone();
        delivered.server_sig = Some([8u8; SIGNATURE_LEN]);
        let bytes = delivered.encode();
        let decoded = TextEnvelope::decode(&bytes, true).unwrap();
        assert_eq!(decoded, delivered);
    }

    #[test]
    fn text_envelope_rejects_oversized_text() {
        let mut bytes = Vec::new();
        put_u64(&mut bytes, MAGIC_30);
        put_u64(&mut bytes, 0);
        put_u64(&mut bytes, (MAX_TEXT + 1) as u64);
        assert!(matches!(
            TextEnvelope::decode(&bytes, false),
            Err(CodecError::OutOfRange { field: "text_len", .. })
        ));
    }

    #[test]
    fn identity_signed_roundtrip() {
        let pkt = IdentitySigned {
            user_id: [5u8; SMALL_FIELD],
            sig: [6u8; SIGNATURE_LEN],
        };
        let bytes = pkt.encode(MAGIC_40);
        assert_eq!(expected_len(MAGIC_40, &bytes).unwrap(), bytes.len());
        let decoded = IdentitySigned::decode(&bytes).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn unknown_magic_rejected() {
        assert!(matches!(
            expected_len(0xDEAD_BEEF_DEAD_BEEF, &[0u8; 24]),
            Err(CodecError::UnknownMagic(_))
        ));
    }
}
