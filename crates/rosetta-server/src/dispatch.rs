//! top-level dispatcher (spec.md §4.6, §5, §7)
//!
//! One [`Dispatcher`] is shared (behind a `tokio::sync::Mutex`) across
//! every connection task; a [`Connection`] holds the per-connection state
//! a single TCP stream accumulates (its in-progress handshake context and,
//! once logged in, its client index). The dispatcher never touches a
//! socket directly — `process` takes bytes in and gives bytes-to-write
//! back out, so the accept loop in `main.rs` is the only place `tokio::
//! net::TcpStream` appears.

use rand::rngs::OsRng;

use rosetta_crypto::group::{GroupParams, KeyPair};
use rosetta_proto::packet::{
    self, ClientHello, ClientLoginAuth, IdentitySigned, RoomRequest, TextEnvelope,
};
use rosetta_proto::{MAGIC_00, MAGIC_01, MAGIC_10, MAGIC_20, MAGIC_30, MAGIC_40, MAGIC_50, MAGIC_60};

use crate::error::{Result, RosettaError};
use crate::handshake::{self, HandshakeContext, LoginOutcome};
use crate::registry::Registry;
use crate::room;

pub struct Dispatcher {
    pub params: GroupParams,
    pub server_long: KeyPair,
    pub registry: Registry,
    /// serializes login attempts server-wide, mirroring the reference
    /// server's single static handshake scratch buffer (spec.md §5).
    handshake_locked: bool,
}

impl Dispatcher {
    pub fn new(params: GroupParams, server_long: KeyPair) -> Self {
        Self {
            params,
            server_long,
            registry: Registry::new(),
            handshake_locked: false,
        }
    }
}

/// per-connection state: at most one in-flight handshake, then a stable
/// client index once logged in.
#[derive(Default)]
pub struct Connection {
    pub user_ix: Option<usize>,
    handshake: Option<HandshakeContext>,
}

fn read_magic(buf: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = buf
        .get(0..8)
        .ok_or(rosetta_proto::CodecError::Truncated { need: 8, have: buf.len() })?
        .try_into()
        .unwrap();
    Ok(u64::from_le_bytes(bytes))
}

/// validate a fully-received packet's length against spec.md §4.6's
/// table before decoding it — malformed-length packets are dropped, not
/// turned into a crash (spec.md §7).
pub fn validate_length(magic: u64, buf: &[u8]) -> Result<()> {
    let expected = packet::expected_len(magic, buf)?;
    if buf.len() != expected {
        return Err(rosetta_proto::CodecError::LengthMismatch {
            magic,
            declared: buf.len(),
            expected,
        }
        .into());
    }
    Ok(())
}

/// process one fully-framed packet and produce the bytes to write back,
/// if any. `None` means the packet was handled with no direct reply
/// (broadcasts go through the pending queue instead).
pub fn process(dispatcher: &mut Dispatcher, conn: &mut Connection, raw: &[u8]) -> Result<Option<Vec<u8>>> {
    let magic = read_magic(raw)?;
    if !packet::is_dispatchable_magic(magic) {
        return Err(RosettaError::Malformed(rosetta_proto::CodecError::UnknownMagic(magic)));
    }
    validate_length(magic, raw)?;

    let mut rng = OsRng;
    match magic {
        MAGIC_00 => {
            if dispatcher.handshake_locked {
                return Err(RosettaError::ProtocolViolation(
                    "a handshake is already in progress elsewhere".into(),
                ));
            }
            let hello = ClientHello::decode(raw)?;
            let (reply, ctx) =
                handshake::process_client_hello(&dispatcher.params, &dispatcher.server_long, &hello, &mut rng)?;
            dispatcher.handshake_locked = true;
            conn.handshake = Some(ctx);
            Ok(Some(reply.encode()))
        }
        MAGIC_01 => {
            let ctx = conn.handshake.take().ok_or_else(|| {
                RosettaError::ProtocolViolation("MAGIC_01 received before MAGIC_00".into())
            })?;
            let auth = ClientLoginAuth::decode(raw)?;
            let outcome = handshake::process_login_auth(
                &dispatcher.params,
                &dispatcher.server_long,
                &ctx,
                &mut dispatcher.registry,
                &auth,
                &mut rng,
            );
            dispatcher.handshake_locked = false;
            match outcome? {
                LoginOutcome::Success { user_ix, reply } => {
                    conn.user_ix = Some(user_ix);
                    Ok(Some(reply.encode()))
                }
                LoginOutcome::Full(reply) => Ok(Some(reply.encode(rosetta_proto::MAGIC_02))),
            }
        }
        MAGIC_10 => {
            let user_ix = require_login(conn)?;
            let req = RoomRequest::decode(raw)?;
            let result = room::create_room(
                &dispatcher.params,
                &dispatcher.server_long,
                &mut dispatcher.registry,
                user_ix,
                &req,
                &mut rng,
            )?;
            let bytes = match result {
                Ok(signed) => signed.encode(MAGIC_10),
                Err(signed) => signed.encode(rosetta_proto::MAGIC_11),
            };
            Ok(Some(bytes))
        }
        MAGIC_20 => {
            let user_ix = require_login(conn)?;
            let req = RoomRequest::decode(raw)?;
            let result = room::join_room(
                &dispatcher.params,
                &dispatcher.server_long,
                &mut dispatcher.registry,
                user_ix,
                &req,
                &mut rng,
            )?;
            let bytes = match result {
                Ok(reply) => reply.encode(),
                Err(signed) => signed.encode(rosetta_proto::MAGIC_11),
            };
            Ok(Some(bytes))
        }
        MAGIC_30 => {
            let user_ix = require_login(conn)?;
            let envelope = TextEnvelope::decode(raw, false)?;
            room::send_text(
                &dispatcher.params,
                &dispatcher.server_long,
                &mut dispatcher.registry,
                user_ix,
                &envelope,
                &mut rng,
            )?;
            Ok(None)
        }
        MAGIC_40 => {
            let user_ix = require_login(conn)?;
            match room::poll(&mut dispatcher.registry, user_ix)? {
                Some(queued) => Ok(Some(queued)),
                None => {
                    let sig = rosetta_crypto::schnorr::sign(
                        &dispatcher.params,
                        &dispatcher.server_long.private,
                        b"poll-empty",
                        &mut rng,
                    );
                    Ok(Some(
                        packet::Signed { sig: sig.to_bytes() }.encode(MAGIC_40),
                    ))
                }
            }
        }
        MAGIC_50 => {
            let user_ix = require_login(conn)?;
            let req = IdentitySigned::decode(raw)?;
            room::leave_room(
                &dispatcher.params,
                &dispatcher.server_long,
                &mut dispatcher.registry,
                user_ix,
                &req,
                &mut rng,
            )?;
            Ok(None)
        }
        MAGIC_60 => {
            let user_ix = require_login(conn)?;
            let req = IdentitySigned::decode(raw)?;
            room::logoff(
                &dispatcher.params,
                &dispatcher.server_long,
                &mut dispatcher.registry,
                user_ix,
                &req,
                &mut rng,
            )?;
            conn.user_ix = None;
            Ok(None)
        }
        other => Err(RosettaError::Malformed(rosetta_proto::CodecError::UnknownMagic(other))),
    }
}

fn require_login(conn: &Connection) -> Result<usize> {
    conn.user_ix
        .ok_or_else(|| RosettaError::ProtocolViolation("packet requires a logged-in connection".into()))
}
