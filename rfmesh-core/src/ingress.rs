//! Inbound frame admission, dedup, and dispatch.
//!
//! [`IngressQueue`] sits between the raw radio and the state machine:
//! the radio task pushes frames into it as they arrive, and the ingress
//! worker (spawned by [`crate::node::MeshNode`]) drains it under the
//! core mutex one frame at a time. Collapsing exact duplicates here,
//! rather than inside the mutex, keeps a flooded radio from forcing
//! redundant lock acquisitions for frames that are going to be dropped
//! as replays anyway.

use std::collections::VecDeque;

use log::{trace, warn};

use rfmesh_crypto::lfsr::LfsrPair;

use crate::effect::Effect;
use crate::host::{ConnectOutcome, RandomSource};
use crate::mac::Mac;
use crate::packet::{self, FrameHeader, MessageType, ACTION_FRAME_CONTROL};
use crate::peer::ConnectState;
use crate::session;
use crate::state::{frame_effect, CoreState};

/// One admitted frame, plus how many byte-identical copies arrived before
/// it was drained (a retried broadcast relay, most commonly).
pub struct QueuedFrame {
    pub frame: Vec<u8>,
    pub duplicate_count: u32,
}

/// FIFO of raw action frames awaiting processing, collapsing consecutive
/// byte-identical pushes into a single entry with a running count instead
/// of queuing each copy separately.
#[derive(Default)]
pub struct IngressQueue {
    frames: VecDeque<QueuedFrame>,
}

impl IngressQueue {
    pub fn new() -> Self {
        Self { frames: VecDeque::new() }
    }

    pub fn push(&mut self, frame: Vec<u8>) {
        if let Some(back) = self.frames.back_mut() {
            if back.frame == frame {
                back.duplicate_count += 1;
                return;
            }
        }
        self.frames.push_back(QueuedFrame { frame, duplicate_count: 0 });
    }

    pub fn pop(&mut self) -> Option<QueuedFrame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Outcome of attempting to recover a unicast payload against a peer's
/// current and previous `in` registers.
enum Opened {
    /// Decrypted against the current register; state was advanced.
    Fresh(Vec<u8>),
    /// Decrypted against the *previous* register: the sender retransmitted
    /// because our reply to their last packet was lost. State is left
    /// untouched; the caller should re-acknowledge without re-delivering.
    Duplicate,
    Failed,
}

fn open_unicast(state: &mut CoreState, from: Mac, payload: &[u8]) -> Opened {
    let Some(peer) = state.known.get(&from) else {
        return Opened::Failed;
    };
    let mut current = peer.lfsr_in;
    let id_in = peer.id_in;
    if let Some(plain) = packet::open_packet(id_in, payload, &mut current) {
        let peer = state.known.get_mut(&from).expect("looked up above");
        peer.lfsr_in_prev = peer.lfsr_in;
        peer.lfsr_in = current;
        peer.id_in += 1;
        return Opened::Fresh(plain);
    }

    if id_in == 0 {
        return Opened::Failed;
    }
    let mut previous = peer.lfsr_in_prev;
    if packet::open_packet(id_in - 1, payload, &mut previous).is_some() {
        return Opened::Duplicate;
    }
    Opened::Failed
}

/// Builds and sends a minimal acknowledgement frame, consuming the
/// acker's own outgoing channel exactly like a real write would. Acks
/// are fire-and-forget: they are never placed in `pending_write` and
/// never retried directly -- if one is lost, the peer's own retransmit
/// of the message it's acknowledging will prompt another.
fn send_ack(state: &mut CoreState, to: Mac, ack_type: MessageType) -> Vec<Effect> {
    let Some(peer) = state.known.get(&to) else {
        return Vec::new();
    };
    let mut lfsr_out = peer.lfsr_out;
    let id_out = peer.id_out;
    let Some(packet) = packet::build_packet(id_out, &[0u8], &mut lfsr_out) else {
        return Vec::new();
    };
    let peer = state.known.get_mut(&to).expect("looked up above");
    peer.lfsr_out_prev = peer.lfsr_out;
    peer.lfsr_out = lfsr_out;
    peer.id_out += 1;

    frame_effect(state.mac, to, ack_type, &packet).into_iter().collect()
}

/// Processes one already-dequeued frame: validates the 802.11 action
/// frame envelope, filters on addressing, and dispatches by message type.
/// `duplicate_count` is how many byte-identical copies of this frame the
/// ingress queue collapsed before it was drained, used to cap broadcast
/// relay fan-out.
pub fn handle_frame(state: &mut CoreState, rng: &dyn RandomSource, raw: &[u8], duplicate_count: u32) -> Vec<Effect> {
    let Some(header) = FrameHeader::from_bytes(raw) else {
        trace!("drop: frame too short for a header");
        return Vec::new();
    };
    if header.frame_control != ACTION_FRAME_CONTROL {
        trace!("drop: unexpected frame_control {:#06x}", header.frame_control);
        return Vec::new();
    }
    let Some(msg_type) = MessageType::from_u8(header.message_type) else {
        trace!("drop: unrecognized message type {:#04x}", header.message_type);
        return Vec::new();
    };
    if header.sender == state.mac {
        trace!("drop: frame echoed from our own MAC");
        return Vec::new();
    }

    let payload = &raw[FrameHeader::SIZE..];

    if header.receiver.is_broadcast() {
        return handle_broadcast(state, header.sender, payload, duplicate_count);
    }
    if header.receiver != state.mac {
        trace!("drop: frame addressed to {}", header.receiver);
        return Vec::new();
    }

    match msg_type {
        MessageType::ConnectRequest => session::handle_connect_request(state, rng, header.sender, payload),
        MessageType::ConnHandshake => session::handle_conn_handshake(state, header.sender, payload),
        MessageType::Connected => match open_unicast(state, header.sender, payload) {
            Opened::Fresh(plain) => session::handle_connected(state, header.sender, &plain),
            Opened::Duplicate | Opened::Failed => Vec::new(),
        },
        MessageType::Message => match open_unicast(state, header.sender, payload) {
            Opened::Fresh(plain) => {
                let mut effects = vec![Effect::DeliverMessage { from: header.sender, data: plain }];
                effects.extend(send_ack(state, header.sender, MessageType::MessageAck));
                effects
            }
            Opened::Duplicate => send_ack(state, header.sender, MessageType::MessageAck),
            Opened::Failed => {
                trace!("drop: Message from {} failed to decrypt", header.sender);
                Vec::new()
            }
        },
        MessageType::MessageAck => {
            if let Some(peer) = state.known.get_mut(&header.sender) {
                if matches!(&peer.pending_write, Some(p) if p.msg_type == MessageType::Message) {
                    peer.pending_write = None;
                }
            }
            Vec::new()
        }
        MessageType::Ping => match open_unicast(state, header.sender, payload) {
            Opened::Fresh(plain) => {
                let mut effects = vec![Effect::DeliverPing { from: header.sender, data: plain }];
                effects.extend(send_ack(state, header.sender, MessageType::PingAck));
                effects
            }
            Opened::Duplicate => send_ack(state, header.sender, MessageType::PingAck),
            Opened::Failed => {
                trace!("drop: Ping from {} failed to decrypt", header.sender);
                Vec::new()
            }
        },
        MessageType::PingAck => match open_unicast(state, header.sender, payload) {
            Opened::Fresh(plain) => vec![Effect::DeliverPing { from: header.sender, data: plain }],
            Opened::Duplicate | Opened::Failed => Vec::new(),
        },
        MessageType::Disconnect => match open_unicast(state, header.sender, payload) {
            Opened::Fresh(plain) => session::receive_disconnect(state, header.sender, &plain),
            Opened::Duplicate | Opened::Failed => Vec::new(),
        },
        MessageType::DisconnectAck => match open_unicast(state, header.sender, payload) {
            Opened::Fresh(_) => session::receive_disconnect_ack(state, header.sender),
            Opened::Duplicate | Opened::Failed => Vec::new(),
        },
    }
}

/// Handles a frame addressed to the broadcast MAC: replay-rejects it
/// against the unknown-peer high-water table, decrypts it under the
/// sender-permuted broadcast LFSR, delivers it to the host, and
/// opportunistically relays it on to other peers -- but only while fewer
/// than `max_rebroadcast_copies` byte-identical copies of this frame have
/// already been observed, so relay fan-out dies out after a couple of hops
/// instead of echoing forever.
fn handle_broadcast(state: &mut CoreState, sender: Mac, payload: &[u8], duplicate_count: u32) -> Vec<Effect> {
    let Some(sequence_id) = packet::peek_sequence_id(payload) else {
        trace!("drop: malformed broadcast header from {sender}");
        return Vec::new();
    };

    if let Some(known) = state.unknown.get(&sender) {
        if sequence_id <= known.high_water_id {
            trace!("drop: replayed broadcast {sequence_id} from {sender}");
            return Vec::new();
        }
    }

    let mut lfsr = rfmesh_crypto::broadcast::permute_broadcast_lfsr(&state.broadcast_seed, &sender.0, sequence_id);
    let Some(plain) = packet::open_packet(sequence_id, payload, &mut lfsr) else {
        warn!("drop: broadcast from {sender} failed to decrypt");
        return Vec::new();
    };

    state.unknown.observe(sender, sequence_id);

    let mut effects = vec![Effect::DeliverBroadcast { from: sender, data: plain }];

    if state.config.broadcast_relay_enabled && duplicate_count < state.config.max_rebroadcast_copies {
        effects.push(Effect::Transmit(build_relay_frame(sender, payload)));
    }

    effects
}

/// Re-wraps an observed broadcast payload for relay, preserving the
/// original sender's address so downstream receivers' replay tables key
/// off the same MAC rather than this hop's.
fn build_relay_frame(original_sender: Mac, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader { frame_control: ACTION_FRAME_CONTROL, receiver: Mac::BROADCAST, sender: original_sender, message_type: MessageType::Message as u8 };
    let mut out = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshConfig;
    use crate::host::RandomSource as _;

    struct NullRng;
    impl RandomSource for NullRng {
        fn next_u32(&self) -> u32 {
            1
        }
    }

    fn test_config() -> MeshConfig {
        MeshConfig {
            broadcast_lfsr: [0xdead_beef, 0x1234_5678],
            broadcast_mask1: [1, 3, 5],
            broadcast_mask2: [7, 11, 13],
            dh_p: 0xFFFF_FFFB,
            dh_g: 5,
            broadcast_relay_enabled: true,
            retransmit_tick_interval_ms: 500,
            retransmit_budget_ticks: 5,
            unknown_peer_capacity: 64,
            max_rebroadcast_copies: 2,
        }
    }

    fn broadcast_frame(state: &CoreState, sender: Mac, sequence_id: u32, plaintext: &[u8]) -> Vec<u8> {
        let mut lfsr = rfmesh_crypto::broadcast::permute_broadcast_lfsr(&state.broadcast_seed, &sender.0, sequence_id);
        let payload = packet::build_packet(sequence_id, plaintext, &mut lfsr).unwrap();
        let header = FrameHeader { frame_control: ACTION_FRAME_CONTROL, receiver: Mac::BROADCAST, sender, message_type: MessageType::Message as u8 };
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&payload);
        out
    }

    #[test]
    fn broadcast_relays_while_under_the_copy_cap() {
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        let mut state = CoreState::new(Mac([1, 0, 0, 0, 0, 0]), test_config(), LfsrPair::new(0xdead_beef, 0x1234_5678, mask, mask), 0);
        let sender = Mac([2, 0, 0, 0, 0, 0]);
        let frame = broadcast_frame(&state, sender, 1, b"ping!");
        let rng = NullRng;

        let effects = handle_frame(&mut state, &rng, &frame, 0);
        assert!(effects.iter().any(|e| matches!(e, Effect::DeliverBroadcast { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::Transmit(_))));
    }

    #[test]
    fn broadcast_does_not_relay_once_the_copy_cap_is_reached() {
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        let mut state = CoreState::new(Mac([1, 0, 0, 0, 0, 0]), test_config(), LfsrPair::new(0xdead_beef, 0x1234_5678, mask, mask), 0);
        let sender = Mac([2, 0, 0, 0, 0, 0]);
        let frame = broadcast_frame(&state, sender, 1, b"ping!");
        let rng = NullRng;

        let effects = handle_frame(&mut state, &rng, &frame, state.config.max_rebroadcast_copies);
        assert!(effects.iter().any(|e| matches!(e, Effect::DeliverBroadcast { .. })));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Transmit(_))));
    }

    #[test]
    fn queue_collapses_consecutive_identical_pushes() {
        let mut q = IngressQueue::new();
        q.push(vec![1, 2, 3]);
        q.push(vec![1, 2, 3]);
        q.push(vec![4, 5, 6]);
        assert_eq!(q.len(), 2);
        let first = q.pop().unwrap();
        assert_eq!(first.duplicate_count, 1);
        let second = q.pop().unwrap();
        assert_eq!(second.duplicate_count, 0);
    }

    #[test]
    fn distinct_frames_between_duplicates_are_not_collapsed() {
        let mut q = IngressQueue::new();
        q.push(vec![1]);
        q.push(vec![2]);
        q.push(vec![1]);
        assert_eq!(q.len(), 3);
    }
}
