//! wire-visible sizes, magics and limits (spec.md §3, §6)

/// exponent size for both short-term and long-term DH keys (320-bit)
pub const PRIVKEY_BYTES: usize = 40;
/// group element size (3072-bit, fits the 3071-bit group modulus M)
pub const PUBKEY_BYTES: usize = 384;
/// size of the `Y`/HMAC-adjacent small field slice cut out of a shared secret
pub const SMALL_FIELD: usize = 8;
/// size of a derived session key (KAB or KBA)
pub const SESSION_KEY: usize = 32;
/// size of the handshake's initial authenticator slice (`Y`)
pub const INIT_AUTH: usize = 32;
/// nonce size for the short-term (handshake) stream cipher use
pub const SHORT_NONCE: usize = 12;
/// nonce size for long-term session stream cipher use
pub const LONG_NONCE: usize = 16;
/// truncated HMAC output length
pub const HMAC_TRUNC: usize = 8;

/// signature wire size: `s_bytes[PRIVKEY_BYTES] ‖ e_bytes[PRIVKEY_BYTES]`.
///
/// Resolves spec.md §9 Open Question 2: the reference implementation's
/// in-memory signature representation carries bigint header structs: those
/// are ABI-sensitive and MUST NOT appear on the wire. This is the
/// portable, fixed-size replacement both ends of a deployment must agree on.
pub const SIGNATURE_LEN: usize = 2 * PRIVKEY_BYTES;

pub const MAX_CLIENTS: usize = 64;
pub const MAX_ROOMS: usize = 64;
pub const MAX_PENDING: usize = 1024;
pub const MAX_MSG: usize = 131072;
pub const MAX_TEXT: usize = 1024;

/// room slot 0 means "not in any room"
pub const NO_ROOM: u32 = 0;

/// process-wide handshake scratch size (spec.md §3)
pub const HANDSHAKE_SCRATCH_BYTES: usize = 16_384;

/// TCP listening port (spec.md §6)
pub const SERVER_PORT: u16 = 54746;

pub const MAGIC_00: u64 = 0xAD0084FF0CC25B0E;
pub const MAGIC_01: u64 = 0xE7D09F1FEFEA708B;
pub const MAGIC_02: u64 = 0x146AAE4D100DAEEA;
pub const MAGIC_10: u64 = 0x13C4A44F70842AC1;
pub const MAGIC_11: u64 = 0xAEFB70A4A8E610DF;
pub const MAGIC_20: u64 = 0x9FF4D1E0EAE100A5;
pub const MAGIC_21: u64 = 0x7C8124568ED45F1A;
pub const MAGIC_30: u64 = 0x9FFA7475DDC8B11C;
pub const MAGIC_40: u64 = 0xCAFB1C01456DF7F0;
pub const MAGIC_41: u64 = 0xDC4F771C0B22FDAB;
pub const MAGIC_50: u64 = 0x41C20F0BB4E34890;
pub const MAGIC_51: u64 = 0x2CC04FBEDA0B5E63;
pub const MAGIC_60: u64 = 0x0A7F4E5D330A14DD;
