//! server-side client/room registry (spec.md §4.3)
//!
//! A fixed 64-slot table for clients and one for rooms, mirroring the
//! reference server's static arrays rather than growable collections —
//! the protocol bounds both at [`MAX_CLIENTS`]/[`MAX_ROOMS`], so there is
//! no reason to let either grow past what the wire format can even
//! address. Slot 0 of the room table is reserved to mean "not in a room"
//! ([`NO_ROOM`]), matching a room-index field of 0 on a client that
//! hasn't joined anything yet.

use std::collections::VecDeque;

use num_bigint::BigUint;

use rosetta_crypto::session::NonceCounter;
use rosetta_proto::{MAX_CLIENTS, MAX_PENDING, MAX_ROOMS, NO_ROOM};

use crate::error::{Result, RosettaError};

/// one logged-in client's session state.
#[derive(Clone)]
pub struct ClientSlot {
    pub in_use: bool,
    pub long_term_pubkey: Option<BigUint>,
    pub encrypt_key: [u8; 32],
    pub decrypt_key: [u8; 32],
    pub nonce_counter: NonceCounter,
    pub room_ix: u32,
    pub pending: VecDeque<Vec<u8>>,
}

impl Default for ClientSlot {
    fn default() -> Self {
        Self {
            in_use: false,
            long_term_pubkey: None,
            encrypt_key: [0u8; 32],
            decrypt_key: [0u8; 32],
            nonce_counter: NonceCounter::new(),
            room_ix: NO_ROOM,
            pending: VecDeque::new(),
        }
    }
}

/// one chat room's membership.
#[derive(Clone, Default)]
pub struct RoomSlot {
    pub in_use: bool,
    pub owner_ix: usize,
    /// bit `i` set means client slot `i` is a member.
    pub members: u64,
}

pub struct Registry {
    pub clients: Vec<ClientSlot>,
    pub rooms: Vec<RoomSlot>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            clients: vec![ClientSlot::default(); MAX_CLIENTS],
            rooms: vec![RoomSlot::default(); MAX_ROOMS],
        }
    }

    /// leftmost free client slot, starting the scan from 0 and never
    /// wrapping past [`MAX_CLIENTS`] (spec.md §9 supplemented behavior).
    pub fn allocate_client(&mut self) -> Result<usize> {
        for (ix, slot) in self.clients.iter_mut().enumerate() {
            if !slot.in_use {
                *slot = ClientSlot {
                    in_use: true,
                    ..ClientSlot::default()
                };
                return Ok(ix);
            }
        }
        Err(RosettaError::RegistryFull("clients"))
    }

    pub fn free_client(&mut self, ix: usize) -> Result<()> {
        let slot = self
            .clients
            .get_mut(ix)
            .ok_or(RosettaError::UnknownIndex("client", ix))?;
        *slot = ClientSlot::default();
        Ok(())
    }

    /// leftmost free room slot, skipping slot 0 ([`NO_ROOM`]) and never
    /// wrapping past [`MAX_ROOMS`].
    pub fn allocate_room(&mut self, owner_ix: usize) -> Result<usize> {
        for ix in 1..MAX_ROOMS {
            if !self.rooms[ix].in_use {
                self.rooms[ix] = RoomSlot {
                    in_use: true,
                    owner_ix,
                    members: 1 << owner_ix,
                };
                return Ok(ix);
            }
        }
        Err(RosettaError::RegistryFull("rooms"))
    }

    pub fn free_room(&mut self, ix: usize) -> Result<()> {
        if ix == NO_ROOM as usize {
            return Err(RosettaError::ProtocolViolation("cannot free room 0".into()));
        }
        let slot = self
            .rooms
            .get_mut(ix)
            .ok_or(RosettaError::UnknownIndex("room", ix))?;
        *slot = RoomSlot::default();
        Ok(())
    }

    pub fn room_members(&self, room_ix: usize) -> impl Iterator<Item = usize> + '_ {
        let mask = self.rooms.get(room_ix).map(|r| r.members).unwrap_or(0);
        (0..MAX_CLIENTS).filter(move |ix| mask & (1 << ix) != 0)
    }

    pub fn add_room_member(&mut self, room_ix: usize, client_ix: usize) -> Result<()> {
        let room = self
            .rooms
            .get_mut(room_ix)
            .ok_or(RosettaError::UnknownIndex("room", room_ix))?;
        room.members |= 1 << client_ix;
        Ok(())
    }

    pub fn remove_room_member(&mut self, room_ix: usize, client_ix: usize) -> Result<()> {
        let room = self
            .rooms
            .get_mut(room_ix)
            .ok_or(RosettaError::UnknownIndex("room", room_ix))?;
        room.members &= !(1u64 << client_ix);
        Ok(())
    }

    /// queue a pre-encoded packet for `user_ix` to pick up on its next
    /// poll. Returns `false` (drop, do not error the caller) once the
    /// queue is at [`MAX_PENDING`] — a slow poller is the client's
    /// problem, not grounds to tear down the server's state.
    pub fn enqueue_pending(&mut self, user_ix: usize, packet: Vec<u8>) -> bool {
        let Some(slot) = self.clients.get_mut(user_ix) else {
            return false;
        };
        if slot.pending.len() >= MAX_PENDING {
            return false;
        }
        slot.pending.push_back(packet);
        true
    }

    pub fn drain_pending(&mut self, user_ix: usize) -> Option<Vec<u8>> {
        self.clients.get_mut(user_ix)?.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_allocation_is_leftmost_and_never_wraps() {
        let mut reg = Registry::new();
        let a = reg.allocate_client().unwrap();
        let b = reg.allocate_client().unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);

        reg.free_client(a).unwrap();
        let c = reg.allocate_client().unwrap();
        assert_eq!(c, 0, "freed leftmost slot must be reused before scanning past it");
    }

    #[test]
    fn client_registry_reports_full_at_capacity() {
        let mut reg = Registry::new();
        for _ in 0..MAX_CLIENTS {
            reg.allocate_client().unwrap();
        }
        assert!(matches!(
            reg.allocate_client(),
            Err(RosettaError::RegistryFull("clients"))
        ));
    }

    #[test]
    fn room_allocation_skips_reserved_slot_zero() {
        let mut reg = Registry::new();
        let room = reg.allocate_room(0).unwrap();
        assert_ne!(room, NO_ROOM as usize);
        assert_eq!(room, 1);
    }

    #[test]
    fn pending_queue_respects_capacity() {
        let mut reg = Registry::new();
        let client = reg.allocate_client().unwrap();
        for i in 0..MAX_PENDING {
            assert!(reg.enqueue_pending(client, vec![i as u8]));
        }
        assert!(!reg.enqueue_pending(client, vec![0xFF]));

        let first = reg.drain_pending(client).unwrap();
        assert_eq!(first, vec![0u8]);
    }

    #[test]
    fn room_membership_mask_tracks_add_and_remove() {
        let mut reg = Registry::new();
        let owner = reg.allocate_client().unwrap();
        let room = reg.allocate_room(owner).unwrap();
        let guest = reg.allocate_client().unwrap();
        reg.add_room_member(room, guest).unwrap();

        let members: Vec<usize> = reg.room_members(room).collect();
        assert_eq!(members, vec![owner, guest]);

        reg.remove_room_member(room, guest).unwrap();
        let members: Vec<usize> = reg.room_members(room).collect();
        assert_eq!(members, vec![owner]);
    }
}
