//! The protocol's mutable core: peer tables, the broadcast LFSR, and the
//! local identity. Lives behind one `parking_lot::Mutex` in
//! [`crate::node::MeshNode`] and is otherwise synchronous and
//! side-effect-free -- every externally visible effect comes back as an
//! [`Effect`] for the caller to perform once the lock is released.

use rfmesh_crypto::lfsr::LfsrPair;

use crate::config::MeshConfig;
use crate::effect::Effect;
use crate::host::RandomSource;
use crate::mac::Mac;
use crate::peer::{KnownPeerTable, UnknownPeerTable};
use crate::persistence::PersistentRecord;

pub struct CoreState {
    pub mac: Mac,
    pub config: MeshConfig,
    pub known: KnownPeerTable,
    pub unknown: UnknownPeerTable,
    pub broadcast_seed: LfsrPair,
    pub broadcast_msg_id: u32,
    pub ping_data: Vec<u8>,
}

impl CoreState {
    pub fn new(mac: Mac, config: MeshConfig, broadcast_seed: LfsrPair, broadcast_msg_id: u32) -> Self {
        let unknown_capacity = config.unknown_peer_capacity;
        Self {
            mac,
            config,
            known: KnownPeerTable::new(),
            unknown: UnknownPeerTable::new(unknown_capacity),
            broadcast_seed,
            broadcast_msg_id,
            ping_data: Vec::new(),
        }
    }

    /// Generates a fresh random tap mask using the supplied random source.
    pub fn random_mask(&self, rng: &dyn RandomSource) -> rfmesh_crypto::lfsr::TapMask {
        rfmesh_crypto::mask::generate_tap_mask(|| rng.next_u32())
    }

    pub fn restore_peer(&mut self, record: PersistentRecord) {
        let peer = crate::peer::KnownPeer::new(record.mac, crate::peer::ConnectState::Reset, record.lfsr_reset);
        let _ = self.known.insert(peer);
    }
}

/// Encodes and queues a complete action frame addressed to `to`, of type
/// `msg_type`, carrying the already-encrypted-or-plaintext `payload`.
pub fn frame_effect(own_mac: Mac, to: Mac, msg_type: crate::packet::MessageType, payload: &[u8]) -> Option<Effect> {
    if payload.len() + crate::packet::FrameHeader::SIZE > crate::packet::MAX_PACKET_SIZE {
        return None;
    }
    let header = crate::packet::FrameHeader {
        frame_control: crate::packet::ACTION_FRAME_CONTROL,
        receiver: to,
        sender: own_mac,
        message_type: msg_type as u8,
    };
    let mut out = Vec::with_capacity(crate::packet::FrameHeader::SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    Some(Effect::Transmit(out))
}
