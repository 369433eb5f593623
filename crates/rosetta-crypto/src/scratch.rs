//! a zeroize-on-drop scratch buffer for handshake short-term key material
//! (spec.md §3, §9 supplemented behavior).
//!
//! The reference implementation calls `explicit_bzero` on its handshake
//! scratch region on every exit from the login handlers, success or
//! failure. `zeroize`'s `ZeroizeOnDrop` gives the same guarantee without a
//! manual cleanup label at every return site.

use zeroize::Zeroize;

/// a fixed-capacity byte buffer that is wiped the moment it goes out of
/// scope, used to hold short-term private keys and derived session
/// material for the lifetime of one handshake.
#[derive(Default)]
pub struct HandshakeScratch {
    bytes: Vec<u8>,
}

impl HandshakeScratch {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(cap),
        }
    }

    pub fn as_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for HandshakeScratch {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroize_clears_contents_before_drop_runs() {
        let mut scratch = HandshakeScratch::with_capacity(16);
        scratch.as_mut().extend_from_slice(&[0xAAu8; 16]);
        assert_eq!(scratch.as_slice(), &[0xAAu8; 16]);
        scratch.as_mut().zeroize();
        assert_eq!(scratch.as_slice(), &[0u8; 16]);
    }
}
