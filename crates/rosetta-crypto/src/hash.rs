//! unkeyed hash and HMAC construction (spec.md §4.1)
//!
//! `blake2` gives us the unkeyed 64-byte hash; the HMAC wrapper around it is
//! a plain RFC 2104 construction using BLAKE2b's native 128-byte block size,
//! used to authenticate the client's long-term public key transport during
//! login (spec.md §4.4).

use blake2::{Blake2b512, Digest};

const BLOCK_SIZE: usize = 128;
const IPAD: u8 = 0x36;
const OPAD: u8 = 0x5c;

/// `BLAKE2b-512(data)`.
pub fn hash(data: &[u8]) -> [u8; 64] {
    let mut hasher = Blake2b512::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn hash_concat(parts: &[&[u8]]) -> [u8; 64] {
    let mut hasher = Blake2b512::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}

fn pad_key(key: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let digest = hash(key);
        block[..digest.len()].copy_from_slice(&digest);
    } else {
        block[..key.len()].copy_from_slice(key);
    }
    block
}

fn xor_pad(block: &[u8; BLOCK_SIZE], pad: u8) -> [u8; BLOCK_SIZE] {
    let mut out = [0u8; BLOCK_SIZE];
    for (o, b) in out.iter_mut().zip(block.iter()) {
        *o = b ^ pad;
    }
    out
}

/// `HMAC-BLAKE2b(key, data)`, full 64-byte tag.
pub fn hmac(key: &[u8], data: &[u8]) -> [u8; 64] {
    let key_block = pad_key(key);
    let inner_key = xor_pad(&key_block, IPAD);
    let outer_key = xor_pad(&key_block, OPAD);

    let inner = hash_concat(&[&inner_key, data]);
    hash_concat(&[&outer_key, &inner])
}

/// `HMAC-BLAKE2b(key, data)` truncated to [`rosetta_proto::HMAC_TRUNC`] bytes,
/// the form carried on the wire in the MAGIC_01 packet.
pub fn hmac_truncated(key: &[u8], data: &[u8]) -> [u8; rosetta_proto::HMAC_TRUNC] {
    let full = hmac(key, data);
    let mut out = [0u8; rosetta_proto::HMAC_TRUNC];
    out.copy_from_slice(&full[..rosetta_proto::HMAC_TRUNC]);
    out
}
