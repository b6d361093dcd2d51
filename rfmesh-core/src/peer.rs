//! Known- and unknown-peer tables.
//!
//! The original used an 8-bucket array of singly linked lists hashed by
//! `CRC8(mac) & 7`; Rust's ownership model makes the linked-list
//! indirection unnecessary, so each bucket here is just a `HashMap`, but
//! the bucket count and hash function are kept identical since the
//! bucket count itself is part of the wire-adjacent design (the
//! original's `TABLE_SIZE`/`TABLE_MASK`).

use std::collections::HashMap;
use std::collections::VecDeque;

use rfmesh_crypto::lfsr::{LfsrPair, TapMask};

use crate::mac::{bucket_of, Mac};
use crate::packet::MessageType;

pub const TABLE_SIZE: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectState {
    Connected,
    Connecting,
    Reset,
    ResetConnecting,
}

/// A message queued to send to this peer, retried by the retransmit
/// worker until acknowledged or abandoned. Covers both application
/// writes (`MessageType::Message`) and the one outstanding
/// `MessageType::Disconnect`, since both occupy the same single-slot
/// flow-control rule and are retried identically.
///
/// `sequence_id`/`lfsr_out_snapshot` are captured at send time rather
/// than re-read from the peer's `lfsr_out_prev` when a retry is needed:
/// an unrelated ack sent to the same peer in the meantime advances
/// `lfsr_out`/`lfsr_out_prev` too, since both directions share one
/// outgoing channel, which would otherwise silently corrupt the
/// rewind point this retry needs.
pub struct PendingWrite {
    pub plaintext: Vec<u8>,
    pub msg_type: MessageType,
    pub sequence_id: u32,
    pub lfsr_out_snapshot: LfsrPair,
    pub check_count: u32,
    /// Set when this write was queued against a peer still in `Reset`,
    /// before any session LFSR existed to encrypt it under.
    /// `sequence_id`/`lfsr_out_snapshot` are placeholders until the
    /// rekey handshake completes and the write gets its first real
    /// transmission; `false` means it already went out over the wire at
    /// least once and these fields are meaningful.
    pub awaiting_session: bool,
}

/// Transient state alive only between sending/receiving one handshake
/// message and the next. Mirrors the Open Question resolution in
/// `DESIGN.md`: the original reused the peer's persistent reset-LFSR
/// scratch slot to smuggle a DH private key or a one-shot master
/// register across a single handshake round; here that gets its own
/// field instead of overloading `lfsr_reset`, but the same *instance*
/// threading (no intermediate clone) is preserved for the master
/// register, since the rekey sentinel and the following CRC check must
/// observe the same advanced state.
pub struct HandshakeState {
    /// Our Diffie-Hellman private exponent, held from `ConnectRequest`
    /// until `ConnHandshake` arrives (fresh connect only).
    pub dh_private: Option<u64>,
    /// The tap-mask pair we proposed in `ConnectRequest` (fresh connect
    /// only), reused for every LFSR -- reset, in, and out -- struck with
    /// this peer. Not needed on a rekey, since that reuses the masks
    /// already stored on `lfsr_reset`.
    pub mask: Option<TapMask>,
    pub rot_mask: Option<TapMask>,
    /// The one-shot master register derived from the DH shared secret
    /// (fresh connect) or reused directly from `lfsr_reset` (rekey),
    /// used to encrypt/decrypt exactly one handshake payload.
    pub master: Option<LfsrPair>,
    /// The exact `ConnectRequest` payload we sent, kept verbatim so the
    /// retransmit worker can resend it unchanged rather than building a
    /// new (and differently keyed) request each retry.
    pub pending_request: Option<Vec<u8>>,
}

/// Everything tracked about one peer we have (or had) a session with.
pub struct KnownPeer {
    pub mac: Mac,
    pub state: ConnectState,

    /// The persistent rekey/reset register, carried across reboots.
    pub lfsr_reset: LfsrPair,

    pub lfsr_in: LfsrPair,
    pub lfsr_in_prev: LfsrPair,
    pub lfsr_out: LfsrPair,
    pub lfsr_out_prev: LfsrPair,

    pub id_in: u32,
    pub id_out: u32,

    pub pending_write: Option<PendingWrite>,

    /// Non-`None` only while a handshake (initial or rekey) is in flight.
    pub handshake: Option<HandshakeState>,

    /// Ticks spent in `ResetConnecting` since the current rekey attempt
    /// started, used by the retransmit worker's reset-handshake timeout.
    pub reset_connecting_ticks: u32,
}

impl KnownPeer {
    pub fn new(mac: Mac, state: ConnectState, lfsr_reset: LfsrPair) -> Self {
        Self {
            mac,
            state,
            lfsr_reset,
            lfsr_in: lfsr_reset,
            lfsr_in_prev: lfsr_reset,
            lfsr_out: lfsr_reset,
            lfsr_out_prev: lfsr_reset,
            id_in: 0,
            id_out: 0,
            pending_write: None,
            handshake: None,
            reset_connecting_ticks: 0,
        }
    }
}

/// Hash-chained (here: hash-bucketed) table of known peers, keyed by the
/// same `CRC8(mac) & 7` bucketing the original used, so a future
/// wire-compatible extension (e.g. exposing bucket occupancy) stays
/// meaningful against other implementations of this protocol.
#[derive(Default)]
pub struct KnownPeerTable {
    buckets: [HashMap<Mac, KnownPeer>; TABLE_SIZE],
}

impl KnownPeerTable {
    pub fn new() -> Self {
        Self { buckets: Default::default() }
    }

    pub fn get(&self, mac: &Mac) -> Option<&KnownPeer> {
        self.buckets[bucket_of(mac)].get(mac)
    }

    pub fn get_mut(&mut self, mac: &Mac) -> Option<&mut KnownPeer> {
        self.buckets[bucket_of(mac)].get_mut(mac)
    }

    /// Inserts `peer`, failing if one already exists for that MAC (mirrors
    /// the original's duplicate-insert guard).
    pub fn insert(&mut self, peer: KnownPeer) -> Result<(), KnownPeer> {
        let bucket = bucket_of(&peer.mac);
        if self.buckets[bucket].contains_key(&peer.mac) {
            return Err(peer);
        }
        self.buckets[bucket].insert(peer.mac, peer);
        Ok(())
    }

    pub fn remove(&mut self, mac: &Mac) -> Option<KnownPeer> {
        self.buckets[bucket_of(mac)].remove(mac)
    }

    pub fn contains(&self, mac: &Mac) -> bool {
        self.buckets[bucket_of(mac)].contains_key(mac)
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &KnownPeer> {
        self.buckets.iter().flat_map(|b| b.values())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut KnownPeer> {
        self.buckets.iter_mut().flat_map(|b| b.values_mut())
    }
}

/// A broadcast sender we've seen but never connected to: just enough state
/// (MAC + high-water sequence ID) to reject replayed or re-delivered
/// broadcast packets.
pub struct UnknownPeer {
    pub mac: Mac,
    pub high_water_id: u32,
}

/// Bounded (LRU-evicted) table of unknown broadcast senders.
///
/// Open Question in the source material: the original's unknown-peer
/// table had no eviction policy and could grow without bound for the
/// lifetime of the device. This resolves that by capping occupancy and
/// evicting the least-recently-updated sender once the cap is hit.
pub struct UnknownPeerTable {
    capacity: usize,
    buckets: [HashMap<Mac, UnknownPeer>; TABLE_SIZE],
    /// Global recency order, most-recently-touched at the back.
    recency: VecDeque<Mac>,
}

impl UnknownPeerTable {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, buckets: Default::default(), recency: VecDeque::new() }
    }

    pub fn get(&self, mac: &Mac) -> Option<&UnknownPeer> {
        self.buckets[bucket_of(mac)].get(mac)
    }

    fn touch(&mut self, mac: Mac) {
        self.recency.retain(|m| *m != mac);
        self.recency.push_back(mac);
    }

    /// Records (or updates) the high-water sequence ID seen from `mac`,
    /// evicting the least-recently-touched entry first if this would grow
    /// the table past capacity.
    pub fn observe(&mut self, mac: Mac, sequence_id: u32) {
        let bucket = bucket_of(&mac);
        if let Some(existing) = self.buckets[bucket].get_mut(&mac) {
            existing.high_water_id = sequence_id;
            self.touch(mac);
            return;
        }

        if self.buckets.iter().map(HashMap::len).sum::<usize>() >= self.capacity {
            if let Some(oldest) = self.recency.pop_front() {
                self.buckets[bucket_of(&oldest)].remove(&oldest);
            }
        }

        self.buckets[bucket].insert(mac, UnknownPeer { mac, high_water_id: sequence_id });
        self.touch(mac);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfmesh_crypto::lfsr::TapMask;

    fn zero_lfsr() -> LfsrPair {
        LfsrPair::new(1, 1, TapMask(0x3e000000), TapMask(0x3e000000))
    }

    #[test]
    fn insert_then_lookup_by_bucket() {
        let mut table = KnownPeerTable::new();
        let mac = Mac([1, 2, 3, 4, 5, 6]);
        table.insert(KnownPeer::new(mac, ConnectState::Connecting, zero_lfsr())).unwrap();
        assert!(table.get(&mac).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut table = KnownPeerTable::new();
        let mac = Mac([1, 2, 3, 4, 5, 6]);
        table.insert(KnownPeer::new(mac, ConnectState::Connecting, zero_lfsr())).unwrap();
        let dup = KnownPeer::new(mac, ConnectState::Connecting, zero_lfsr());
        assert!(table.insert(dup).is_err());
    }

    #[test]
    fn remove_drops_the_entry() {
        let mut table = KnownPeerTable::new();
        let mac = Mac([1, 2, 3, 4, 5, 6]);
        table.insert(KnownPeer::new(mac, ConnectState::Connecting, zero_lfsr())).unwrap();
        assert!(table.remove(&mac).is_some());
        assert!(table.get(&mac).is_none());
    }

    #[test]
    fn unknown_peer_table_evicts_least_recently_touched() {
        let mut table = UnknownPeerTable::new(2);
        let a = Mac([1, 0, 0, 0, 0, 0]);
        let b = Mac([2, 0, 0, 0, 0, 0]);
        let c = Mac([3, 0, 0, 0, 0, 0]);

        table.observe(a, 1);
        table.observe(b, 1);
        table.observe(c, 1); // should evict a

        assert!(table.get(&a).is_none());
        assert!(table.get(&b).is_some());
        assert!(table.get(&c).is_some());
    }

    #[test]
    fn re_observing_a_peer_refreshes_its_recency() {
        let mut table = UnknownPeerTable::new(2);
        let a = Mac([1, 0, 0, 0, 0, 0]);
        let b = Mac([2, 0, 0, 0, 0, 0]);
        let c = Mac([3, 0, 0, 0, 0, 0]);

        table.observe(a, 1);
        table.observe(b, 1);
        table.observe(a, 2); // touch a again, b becomes oldest
        table.observe(c, 1); // should evict b, not a

        assert!(table.get(&a).is_some());
        assert!(table.get(&b).is_none());
        assert!(table.get(&c).is_some());
    }
}
