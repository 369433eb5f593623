//! client-side session and roommate state (spec.md §3 "client view", §4.5)
//!
//! Mirrors `rosetta_server::registry`'s fixed-array-plus-bitmask shape,
//! but from the other side of the wire: one slot per roommate instead of
//! one per logged-in client, and a single [`ServerSession`] instead of a
//! per-connection [`rosetta_server::registry::ClientSlot`].

use num_bigint::BigUint;

use rosetta_crypto::session::NonceCounter;
use rosetta_proto::MAX_CLIENTS;

/// one peer currently sharing a room with this client.
#[derive(Clone)]
pub struct Roommate {
    pub user_id: u64,
    pub pubkey: BigUint,
    /// this client's "send" key to this roommate, after the I5 tiebreak.
    pub send_key: [u8; 32],
    /// this client's "receive" key from this roommate.
    pub recv_key: [u8; 32],
    pub nonce_counter: NonceCounter,
}

/// this client's long-term session with the server: the shared secret
/// derived in §4.5, plus the nonce counter that advances it.
pub struct ServerSession {
    pub send_key: [u8; 32],
    pub recv_key: [u8; 32],
    pub nonce_counter: NonceCounter,
}

/// fixed 64-slot roommate table (spec.md §3's `roommate_slots_bitmask`),
/// plus this client's own identity once logged in.
pub struct RoomState {
    pub own_user_ix: Option<u64>,
    pub room_ix: Option<u64>,
    slots: Vec<Option<Roommate>>,
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomState {
    pub fn new() -> Self {
        Self {
            own_user_ix: None,
            room_ix: None,
            slots: vec![None; MAX_CLIENTS],
        }
    }

    /// leftmost free roommate slot, mirroring the server registry's
    /// leftmost-empty allocation rule.
    pub fn insert(&mut self, roommate: Roommate) -> Option<usize> {
        for (ix, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(roommate);
                return Some(ix);
            }
        }
        None
    }

    pub fn get(&self, ix: usize) -> Option<&Roommate> {
        self.slots.get(ix).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, ix: usize) -> Option<&mut Roommate> {
        self.slots.get_mut(ix).and_then(|s| s.as_mut())
    }

    pub fn find_by_user_id(&self, user_id: u64) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().map(|r| r.user_id) == Some(user_id))
    }

    pub fn remove(&mut self, ix: usize) {
        if let Some(slot) = self.slots.get_mut(ix) {
            *slot = None;
        }
    }

    /// spec.md S6: the owner leaving wipes every roommate slot and
    /// resets this client's own room membership.
    pub fn clear_room(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.room_ix = None;
    }

    pub fn occupied(&self) -> impl Iterator<Item = (usize, &Roommate)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(ix, s)| s.as_ref().map(|r| (ix, r)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
