//! The per-peer session state machine: connect, reset/rekey, and
//! graceful disconnect. Every function here is synchronous and
//! side-effect-free -- callers run under [`crate::state::CoreState`]'s
//! mutex and perform the returned [`Effect`]s once it's released.

use log::{debug, trace, warn};

use rfmesh_crypto::dh::{create_challenge, finish_challenge};
use rfmesh_crypto::lfsr::{LfsrPair, TapMask};

use crate::effect::Effect;
use crate::error::SessionError;
use crate::handshake::{derive_master_lfsr, pack_name, ConnectedPayload, DhChallenge, DhFinalize};
use crate::host::{ConnectOutcome, RandomSource};
use crate::mac::Mac;
use crate::packet::{self, MessageType, CONNECTED_CMD, DISCONNECT_CMD, RESET_CMD};
use crate::peer::{ConnectState, HandshakeState, KnownPeer, PendingWrite};
use crate::state::{frame_effect, CoreState};

/// Initiates a session with `target`: a fresh three-message handshake if
/// no record exists, or a rekey if the existing record is in `Reset`.
/// Refuses if a session is already connected or mid-handshake.
pub fn connect(state: &mut CoreState, rng: &dyn RandomSource, target: Mac) -> Result<Vec<Effect>, SessionError> {
    if let Some(existing) = state.known.get(&target) {
        if existing.state != ConnectState::Reset {
            return Err(SessionError::AlreadyConnected(target));
        }
        return Ok(rekey(state, target));
    }

    let dh_private = rng.next_u64();
    let dh_public = create_challenge(state.config.dh_g, state.config.dh_p, dh_private).1;
    let mask = state.random_mask(rng);
    let rot_mask = state.random_mask(rng);

    let request = DhChallenge { challenge: dh_public, mask: mask.0, rot_mask: rot_mask.0 };
    let request_bytes = request.to_bytes();

    let mut peer = KnownPeer::new(target, ConnectState::Connecting, LfsrPair::new(1, 1, mask, rot_mask));
    peer.handshake = Some(HandshakeState {
        dh_private: Some(dh_private),
        mask: Some(mask),
        rot_mask: Some(rot_mask),
        master: None,
        pending_request: Some(request_bytes.to_vec()),
    });
    let _ = state.known.insert(peer);

    debug!("connect: sending ConnectRequest to {target}");
    Ok(frame_effect(state.mac, target, MessageType::ConnectRequest, &request_bytes).into_iter().collect())
}

/// Builds the rekey sentinel request for a peer already known to be in
/// `Reset`. The sentinel is `RESET_CMD` twice over, encrypted under the
/// peer's persisted reset register -- the *same* register instance is
/// left advanced afterward and stashed as this handshake's master state
/// (see the rekey Open Question resolution in `DESIGN.md`): when the
/// reply arrives it must be decrypted starting from exactly this
/// post-sentinel state, not a fresh copy of `lfsr_reset`.
fn rekey(state: &mut CoreState, target: Mac) -> Vec<Effect> {
    let peer = state.known.get_mut(&target).expect("checked by caller");
    let mut master = peer.lfsr_reset;

    let reset_bytes = RESET_CMD.to_le_bytes();
    let mut challenge_ct = [0u8; 4];
    let mut rot_ct = [0u8; 4];
    rfmesh_crypto::cipher::encrypt(&reset_bytes, &mut challenge_ct, &mut master);
    rfmesh_crypto::cipher::encrypt(&reset_bytes, &mut rot_ct, &mut master);

    let request = DhChallenge {
        challenge: u32::from_le_bytes(challenge_ct) as u64,
        mask: u32::from_le_bytes(rot_ct),
        rot_mask: 0,
    };
    let request_bytes = request.to_bytes();

    peer.state = ConnectState::ResetConnecting;
    peer.id_in = 0;
    peer.id_out = 0;
    peer.reset_connecting_ticks = 0;
    peer.handshake = Some(HandshakeState {
        dh_private: None,
        mask: None,
        rot_mask: None,
        master: Some(master),
        pending_request: Some(request_bytes.to_vec()),
    });

    debug!("connect: sending rekey ConnectRequest to {target}");
    frame_effect(state.mac, target, MessageType::ConnectRequest, &request_bytes).into_iter().collect()
}

/// CRC-8 over a (reset, in, out) LFSR block, chaining the three register
/// seeds and then the three rotation-register seeds, used to authenticate
/// a handshake reply without a full MAC primitive.
fn lfsr_block_crc(values: &[u32; 3], rot_seeds: &[u32; 3]) -> u8 {
    let mut crc = rfmesh_crypto::crc8::DEFAULT_SEED;
    for v in values {
        crc = rfmesh_crypto::crc8::crc8_seeded(&v.to_le_bytes(), crc);
    }
    for r in rot_seeds {
        crc = rfmesh_crypto::crc8::crc8_seeded(&r.to_le_bytes(), crc);
    }
    crc
}

/// Handles an inbound `ConnectRequest`. Covers three cases: a peer in
/// `Connecting` retried the request (start over), a `Connected` peer is
/// proposing a rekey (validate the sentinel or silently drop), or this is
/// a genuinely new peer.
pub fn handle_connect_request(state: &mut CoreState, rng: &dyn RandomSource, from: Mac, payload: &[u8]) -> Vec<Effect> {
    let Some(request) = DhChallenge::from_bytes(payload) else {
        trace!("drop: malformed ConnectRequest from {from}");
        return Vec::new();
    };

    if let Some(existing) = state.known.get(&from) {
        match existing.state {
            ConnectState::Connecting => {
                debug!("ConnectRequest from {from} while Connecting: restarting");
                state.known.remove(&from);
            }
            ConnectState::Connected => {
                return handle_rekey_request(state, from, &request);
            }
            ConnectState::Reset | ConnectState::ResetConnecting => {
                // A fresh (non-reset) request arrived while we still think
                // we're mid-reset with this peer: drop our half and let the
                // peer lead as responder instead.
                state.known.remove(&from);
            }
        }
    }

    let dh_private = rng.next_u64();
    let master_secret = finish_challenge(dh_private, request.challenge, state.config.dh_p);
    let reply_public = create_challenge(state.config.dh_g, state.config.dh_p, dh_private).1;

    let mask = TapMask(request.mask);
    let rot_mask = TapMask(request.rot_mask);
    let mut master = derive_master_lfsr(master_secret, mask, rot_mask);

    let reset_lfsr = LfsrPair::new(rng.next_u32().max(1), rng.next_u32().max(1), mask, rot_mask);
    let in_lfsr = LfsrPair::new(rng.next_u32().max(1), rng.next_u32().max(1), mask, rot_mask);
    let out_lfsr = LfsrPair::new(rng.next_u32().max(1), rng.next_u32().max(1), mask, rot_mask);

    let lfsr_values = [reset_lfsr.main, in_lfsr.main, out_lfsr.main];
    let lfsr_rot_seeds = [reset_lfsr.rot, in_lfsr.rot, out_lfsr.rot];
    let crc = lfsr_block_crc(&lfsr_values, &lfsr_rot_seeds);

    let finalize = DhFinalize { chal: crc as u64, lfsr: lfsr_values, lfsr_mask: lfsr_rot_seeds, name: pack_name(&state.ping_data) };
    let mut ciphertext = vec![0u8; DhFinalize::SIZE];
    rfmesh_crypto::cipher::encrypt(&finalize.to_bytes(), &mut ciphertext, &mut master);

    let mut payload_out = Vec::with_capacity(8 + ciphertext.len());
    payload_out.extend_from_slice(&reply_public.to_le_bytes());
    payload_out.extend_from_slice(&ciphertext);

    let mut peer = KnownPeer::new(from, ConnectState::Connecting, reset_lfsr);
    peer.lfsr_in = in_lfsr;
    peer.lfsr_in_prev = in_lfsr;
    peer.lfsr_out = out_lfsr;
    peer.lfsr_out_prev = out_lfsr;
    let _ = state.known.insert(peer);

    debug!("ConnectRequest from {from}: replying with ConnHandshake");
    frame_effect(state.mac, from, MessageType::ConnHandshake, &payload_out).into_iter().collect()
}

/// A `ConnectRequest` arrived for a peer we're already `Connected` to:
/// treat it as the peer proposing a rekey. Only proceeds if the sentinel
/// decrypts to `RESET_CMD` twice under our stored reset register;
/// otherwise an attacker without that register can't force a rekey, so we
/// drop silently.
fn handle_rekey_request(state: &mut CoreState, from: Mac, request: &DhChallenge) -> Vec<Effect> {
    let peer = state.known.get_mut(&from).expect("checked by caller");
    let mut master = peer.lfsr_reset;

    let mut challenge_pt = [0u8; 4];
    let mut rot_pt = [0u8; 4];
    rfmesh_crypto::cipher::decrypt(&(request.challenge as u32).to_le_bytes(), &mut challenge_pt, &mut master);
    rfmesh_crypto::cipher::decrypt(&request.mask.to_le_bytes(), &mut rot_pt, &mut master);

    if u32::from_le_bytes(challenge_pt) != RESET_CMD || u32::from_le_bytes(rot_pt) != RESET_CMD {
        warn!("drop: rekey ConnectRequest from {from} failed sentinel check");
        return Vec::new();
    }

    // The reset register itself never changes on a rekey; only in/out
    // get fresh seeds, reusing the reset register's tap masks.
    let mask = peer.lfsr_reset.main_mask;
    let rot_mask = peer.lfsr_reset.rot_mask;
    let in_lfsr = LfsrPair::new(wrapping_mix(peer.lfsr_reset.main, 0x9e37_79b1), wrapping_mix(peer.lfsr_reset.rot, 0x85eb_ca6b), mask, rot_mask);
    let out_lfsr = LfsrPair::new(wrapping_mix(peer.lfsr_reset.main, 0xc2b2_ae35), wrapping_mix(peer.lfsr_reset.rot, 0x27d4_eb2f), mask, rot_mask);

    let lfsr_values = [peer.lfsr_reset.main, in_lfsr.main, out_lfsr.main];
    let lfsr_rot_seeds = [peer.lfsr_reset.rot, in_lfsr.rot, out_lfsr.rot];
    let crc = lfsr_block_crc(&lfsr_values, &lfsr_rot_seeds);

    let finalize = DhFinalize { chal: crc as u64, lfsr: lfsr_values, lfsr_mask: lfsr_rot_seeds, name: pack_name(&state.ping_data) };
    let mut ciphertext = vec![0u8; DhFinalize::SIZE];
    rfmesh_crypto::cipher::encrypt(&finalize.to_bytes(), &mut ciphertext, &mut master);

    peer.state = ConnectState::ResetConnecting;
    peer.id_in = 0;
    peer.id_out = 0;
    peer.reset_connecting_ticks = 0;
    peer.lfsr_in = in_lfsr;
    peer.lfsr_in_prev = in_lfsr;
    peer.lfsr_out = out_lfsr;
    peer.lfsr_out_prev = out_lfsr;
    peer.handshake = None;

    debug!("rekey ConnectRequest from {from}: replying with ConnHandshake");
    frame_effect(state.mac, from, MessageType::ConnHandshake, &ciphertext).into_iter().collect()
}

/// Derives a fresh-looking seed from the persisted reset register without
/// consuming any randomness, so both ends of a rekey land on the same
/// in/out registers purely from state they already share. A cheap
/// fixed-point-free mix (xorshift-style constants) is enough here: the
/// actual security property rides on the tap masks and the stream
/// cipher, not on this seed being unpredictable.
fn wrapping_mix(seed: u32, k: u32) -> u32 {
    let mixed = seed.wrapping_mul(k) ^ seed.rotate_left(13);
    if mixed == 0 || mixed == u32::MAX {
        1
    } else {
        mixed
    }
}

/// Handles an inbound `ConnHandshake`: the initiator's (A's) side of
/// finishing either a fresh connect or a rekey.
pub fn handle_conn_handshake(state: &mut CoreState, from: Mac, payload: &[u8]) -> Vec<Effect> {
    let Some(peer) = state.known.get_mut(&from) else {
        trace!("drop: ConnHandshake from unknown peer {from}");
        return Vec::new();
    };
    let is_rekey = peer.state == ConnectState::ResetConnecting;
    if peer.state != ConnectState::Connecting && !is_rekey {
        trace!("drop: unexpected ConnHandshake from {from} in state {:?}", peer.state);
        return Vec::new();
    }
    let Some(handshake) = peer.handshake.take() else {
        trace!("drop: ConnHandshake from {from} with no handshake in flight");
        return Vec::new();
    };

    let finalize = if is_rekey {
        let Some(mut master) = handshake.master else {
            warn!("drop: rekey ConnHandshake from {from} missing master state");
            state.known.remove(&from);
            return Vec::new();
        };
        if payload.len() != DhFinalize::SIZE {
            trace!("drop: malformed rekey ConnHandshake from {from}");
            return Vec::new();
        }
        let mut plain = vec![0u8; payload.len()];
        rfmesh_crypto::cipher::decrypt(payload, &mut plain, &mut master);
        DhFinalize::from_lfsr_block_and_name(&plain[..DhFinalize::LFSR_BLOCK_SIZE], &plain[DhFinalize::LFSR_BLOCK_SIZE..])
    } else {
        if payload.len() != 8 + DhFinalize::SIZE {
            trace!("drop: malformed ConnHandshake from {from}");
            return Vec::new();
        }
        let Some(dh_private) = handshake.dh_private else {
            warn!("drop: ConnHandshake from {from} missing DH private key");
            state.known.remove(&from);
            return Vec::new();
        };
        let (Some(mask), Some(rot_mask)) = (handshake.mask, handshake.rot_mask) else {
            warn!("drop: ConnHandshake from {from} missing proposed tap masks");
            state.known.remove(&from);
            return Vec::new();
        };
        let responder_public = u64::from_le_bytes(payload[0..8].try_into().expect("checked length"));
        let shared_secret = finish_challenge(dh_private, responder_public, state.config.dh_p);
        let mut master = derive_master_lfsr(shared_secret, mask, rot_mask);
        let mut plain = vec![0u8; DhFinalize::SIZE];
        rfmesh_crypto::cipher::decrypt(&payload[8..], &mut plain, &mut master);
        DhFinalize::from_lfsr_block_and_name(&plain[..DhFinalize::LFSR_BLOCK_SIZE], &plain[DhFinalize::LFSR_BLOCK_SIZE..])
    };

    let Some(finalize) = finalize else {
        trace!("drop: unparseable ConnHandshake body from {from}");
        return Vec::new();
    };

    if finalize.chal as u8 != lfsr_block_crc(&finalize.lfsr, &finalize.lfsr_mask) {
        warn!("drop: ConnHandshake from {from} failed CRC check");
        state.known.remove(&from);
        return Vec::new();
    }

    let peer = state.known.get_mut(&from).expect("looked up above");
    let (mask, rot_mask) = if is_rekey {
        (peer.lfsr_reset.main_mask, peer.lfsr_reset.rot_mask)
    } else {
        (handshake.mask.expect("checked above"), handshake.rot_mask.expect("checked above"))
    };

    // Responder's "in" (slot 1) pairs with our "out"; its "out" (slot 2)
    // pairs with our "in".
    let new_out = LfsrPair::new(finalize.lfsr[1], finalize.lfsr_mask[1], mask, rot_mask);
    let new_in = LfsrPair::new(finalize.lfsr[2], finalize.lfsr_mask[2], mask, rot_mask);
    let new_reset = if is_rekey { peer.lfsr_reset } else { LfsrPair::new(finalize.lfsr[0], finalize.lfsr_mask[0], mask, rot_mask) };

    peer.lfsr_reset = new_reset;
    peer.lfsr_in = new_in;
    peer.lfsr_in_prev = new_in;
    peer.lfsr_out = new_out;
    peer.lfsr_out_prev = new_out;
    peer.id_in = 0;
    peer.id_out = 0;
    peer.handshake = None;
    peer.reset_connecting_ticks = 0;

    // A write queued while this peer was still in `Reset` has no real
    // session to encrypt under yet; its fields are placeholders until the
    // handshake lands here, so it gets its first real transmission now.
    let flushed_write = peer.pending_write.as_ref().filter(|p| p.awaiting_session).map(|p| (p.msg_type, p.plaintext.clone()));
    if let Some(pending) = peer.pending_write.as_mut() {
        pending.check_count = 0;
    }

    let connected_payload = ConnectedPayload { cmd: CONNECTED_CMD, id: peer.id_out, lfsr: new_reset.main, lfsr_mask: new_reset.rot, name: pack_name(&state.ping_data) };
    let mut lfsr_out_snapshot = peer.lfsr_out;
    let Some(packet) = packet::build_packet(peer.id_out, &connected_payload.to_bytes(), &mut lfsr_out_snapshot) else {
        warn!("drop: Connected payload from {from} exceeds the frame size limit");
        state.known.remove(&from);
        return Vec::new();
    };
    peer.lfsr_out_prev = peer.lfsr_out;
    peer.lfsr_out = lfsr_out_snapshot;
    peer.id_out += 1;
    peer.state = ConnectState::Connected;

    debug!("ConnHandshake from {from}: session established");

    let mut effects = Vec::new();
    if let Some(tx) = frame_effect(state.mac, from, MessageType::Connected, &packet) {
        effects.push(tx);
    }

    if let Some((msg_type, plaintext)) = flushed_write {
        let sequence_id = peer.id_out;
        let snapshot = peer.lfsr_out;
        let mut lfsr_out = snapshot;
        if let Some(write_packet) = packet::build_packet(sequence_id, &plaintext, &mut lfsr_out) {
            peer.lfsr_out_prev = peer.lfsr_out;
            peer.lfsr_out = lfsr_out;
            peer.id_out += 1;
            if let Some(pending) = peer.pending_write.as_mut() {
                pending.sequence_id = sequence_id;
                pending.lfsr_out_snapshot = snapshot;
                pending.awaiting_session = false;
            }
            debug!("ConnHandshake from {from}: flushing write queued while resetting");
            if let Some(tx) = frame_effect(state.mac, from, msg_type, &write_packet) {
                effects.push(tx);
            }
        } else {
            warn!("drop: write queued to {from} during reset no longer fits, abandoning it");
            peer.pending_write = None;
        }
    }

    effects.push(Effect::PersistPeer(crate::persistence::PersistentRecord { mac: from, lfsr_reset: new_reset }));
    effects.push(Effect::Connected { mac: from, name: Some(finalize.name.to_vec()), outcome: ConnectOutcome::Succeeded });
    effects
}

/// Handles the final `Connected` message, received by the responder (B)
/// after sending its `ConnHandshake` reply.
pub fn handle_connected(state: &mut CoreState, from: Mac, payload: &[u8]) -> Vec<Effect> {
    let Some(peer) = state.known.get_mut(&from) else {
        trace!("drop: Connected from unknown peer {from}");
        return Vec::new();
    };
    if peer.state != ConnectState::Connecting && peer.state != ConnectState::ResetConnecting {
        trace!("drop: unexpected Connected from {from} in state {:?}", peer.state);
        return Vec::new();
    }

    let Some(confirmed) = ConnectedPayload::from_bytes(payload) else {
        trace!("drop: malformed Connected payload from {from}");
        return Vec::new();
    };
    if confirmed.cmd != CONNECTED_CMD {
        warn!("drop: Connected from {from} failed sentinel check, removing peer");
        state.known.remove(&from);
        return vec![Effect::ForgetPeer(from), Effect::Connected { mac: from, name: None, outcome: ConnectOutcome::Failed }];
    }

    peer.state = ConnectState::Connected;
    peer.reset_connecting_ticks = 0;
    if let Some(pending) = peer.pending_write.as_mut() {
        pending.check_count = 0;
    }
    let record = crate::persistence::PersistentRecord { mac: from, lfsr_reset: peer.lfsr_reset };

    debug!("Connected from {from}: session established");
    vec![Effect::PersistPeer(record), Effect::Connected { mac: from, name: Some(confirmed.name.to_vec()), outcome: ConnectOutcome::Succeeded }]
}

/// Starts a graceful disconnect: queues an encrypted `Disconnect` frame
/// as the peer's one outstanding pending write, to be retried by the
/// retransmit worker until `DisconnectAck` arrives or the budget runs out.
pub fn disconnect(state: &mut CoreState, target: Mac) -> Result<Vec<Effect>, SessionError> {
    let peer = state.known.get_mut(&target).ok_or(SessionError::UnknownPeer(target))?;
    if peer.pending_write.is_some() {
        return Err(SessionError::PendingWriteInProgress(target));
    }
    match peer.state {
        ConnectState::Reset | ConnectState::ResetConnecting => return Err(SessionError::ResettingConnection(target)),
        ConnectState::Connecting => return Err(SessionError::UnknownPeer(target)),
        ConnectState::Connected => {}
    }

    let plaintext = DISCONNECT_CMD.to_le_bytes().to_vec();
    let sequence_id = peer.id_out;
    let snapshot = peer.lfsr_out;
    let mut lfsr_out = snapshot;
    let packet = packet::build_packet(sequence_id, &plaintext, &mut lfsr_out).ok_or(SessionError::UnknownPeer(target))?;
    peer.lfsr_out_prev = peer.lfsr_out;
    peer.lfsr_out = lfsr_out;
    peer.id_out += 1;
    peer.pending_write = Some(PendingWrite { plaintext, msg_type: MessageType::Disconnect, sequence_id, lfsr_out_snapshot: snapshot, check_count: 0, awaiting_session: false });

    debug!("disconnect: sending Disconnect to {target}");
    Ok(frame_effect(state.mac, target, MessageType::Disconnect, &packet).into_iter().collect())
}

/// Handles an inbound (already decrypted) `Disconnect` payload: replies
/// with `DisconnectAck` and tears the session down locally.
pub fn receive_disconnect(state: &mut CoreState, from: Mac, payload: &[u8]) -> Vec<Effect> {
    let Some(peer) = state.known.get(&from) else {
        trace!("drop: Disconnect from unknown peer {from}");
        return Vec::new();
    };
    if payload.len() < 4 || u32::from_le_bytes(payload[0..4].try_into().expect("checked length")) != DISCONNECT_CMD {
        trace!("drop: malformed Disconnect from {from}");
        return Vec::new();
    }

    let mut lfsr_out_snapshot = peer.lfsr_out;
    let id_out = peer.id_out;
    // A bare 1-byte payload, since `open_packet` refuses to recover a
    // zero-length one; the byte itself carries no meaning.
    let ack = packet::build_packet(id_out, &[0u8], &mut lfsr_out_snapshot);

    let peer = state.known.get_mut(&from).expect("looked up above");
    peer.lfsr_out_prev = peer.lfsr_out;
    peer.lfsr_out = lfsr_out_snapshot;
    peer.id_out += 1;

    state.known.remove(&from);
    debug!("Disconnect from {from}: session torn down");

    let mut effects = Vec::new();
    if let Some(ack) = ack {
        if let Some(tx) = frame_effect(state.mac, from, MessageType::DisconnectAck, &ack) {
            effects.push(tx);
        }
    }
    effects.push(Effect::ForgetPeer(from));
    effects.push(Effect::Connected { mac: from, name: None, outcome: ConnectOutcome::Disconnected });
    effects
}

/// Handles an inbound `DisconnectAck`: our own disconnect request was
/// acknowledged, so the session is torn down on our side too.
pub fn receive_disconnect_ack(state: &mut CoreState, from: Mac) -> Vec<Effect> {
    let Some(peer) = state.known.get(&from) else {
        trace!("drop: DisconnectAck from unknown peer {from}");
        return Vec::new();
    };
    let was_disconnecting = matches!(&peer.pending_write, Some(p) if p.msg_type == MessageType::Disconnect);
    if !was_disconnecting {
        trace!("drop: unexpected DisconnectAck from {from}");
        return Vec::new();
    }

    state.known.remove(&from);
    debug!("DisconnectAck from {from}: session torn down");
    vec![Effect::ForgetPeer(from), Effect::Connected { mac: from, name: None, outcome: ConnectOutcome::Disconnected }]
}

/// Tears a session down immediately without notifying the peer, for
/// host-initiated teardown where waiting on an ack doesn't make sense
/// (e.g. the host is shutting the radio down).
pub fn force_disconnect(state: &mut CoreState, target: Mac) -> Result<Vec<Effect>, SessionError> {
    if state.known.remove(&target).is_none() {
        return Err(SessionError::UnknownPeer(target));
    }
    debug!("force_disconnect: {target} removed");
    Ok(vec![Effect::ForgetPeer(target), Effect::Connected { mac: target, name: None, outcome: ConnectOutcome::Disconnected }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshConfig;
    use crate::mac::Mac;

    struct FixedRng(std::cell::Cell<u32>);
    impl RandomSource for FixedRng {
        fn next_u32(&self) -> u32 {
            let v = self.0.get();
            self.0.set(v.wrapping_add(0x1000_0001));
            v | 1
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

    fn fresh_state(mac: [u8; 6]) -> CoreState {
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        CoreState::new(Mac(mac), test_config(), LfsrPair::new(0xdead_beef, 0x1234_5678, mask, mask), 0)
    }

    #[test]
    fn connect_stages_connecting_peer_and_a_transmit_effect() {
        let mut state = fresh_state([1, 0, 0, 0, 0, 0]);
        let rng = FixedRng(std::cell::Cell::new(7));
        let target = Mac([2, 0, 0, 0, 0, 0]);

        let effects = connect(&mut state, &rng, target).unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::Transmit(_)));
        assert_eq!(state.known.get(&target).unwrap().state, ConnectState::Connecting);
        assert!(state.known.get(&target).unwrap().handshake.is_some());
    }

    #[test]
    fn connect_refuses_when_already_connected() {
        let mut state = fresh_state([1, 0, 0, 0, 0, 0]);
        let rng = FixedRng(std::cell::Cell::new(7));
        let target = Mac([2, 0, 0, 0, 0, 0]);
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        state.known.insert(KnownPeer::new(target, ConnectState::Connected, LfsrPair::new(1, 1, mask, mask))).unwrap();

        assert!(matches!(connect(&mut state, &rng, target), Err(SessionError::AlreadyConnected(_))));
    }

    #[test]
    fn full_handshake_lands_both_sides_connected_with_matching_registers() {
        let mut a = fresh_state([1, 0, 0, 0, 0, 0]);
        let mut b = fresh_state([2, 0, 0, 0, 0, 0]);
        let rng_a = FixedRng(std::cell::Cell::new(11));
        let rng_b = FixedRng(std::cell::Cell::new(97));
        let b_mac = Mac([2, 0, 0, 0, 0, 0]);
        let a_mac = Mac([1, 0, 0, 0, 0, 0]);

        let to_b = connect(&mut a, &rng_a, b_mac).unwrap();
        let Effect::Transmit(frame) = &to_b[0] else { panic!("expected transmit") };
        let payload = &frame[crate::packet::FrameHeader::SIZE..];

        let to_a = handle_connect_request(&mut b, &rng_b, a_mac, payload);
        assert_eq!(to_a.len(), 1);
        let Effect::Transmit(frame) = &to_a[0] else { panic!("expected transmit") };
        let payload = &frame[crate::packet::FrameHeader::SIZE..];

        let finish_a = handle_conn_handshake(&mut a, b_mac, payload);
        assert_eq!(a.known.get(&b_mac).unwrap().state, ConnectState::Connected);
        let Some(Effect::Transmit(frame)) = finish_a.first() else { panic!("expected transmit") };
        let payload = &frame[crate::packet::FrameHeader::SIZE..];

        let b_peer_in = b.known.get(&a_mac).unwrap().lfsr_in;
        let mut lfsr_in = b_peer_in;
        let opened = packet::open_packet(0, payload, &mut lfsr_in).expect("Connected packet should decrypt cleanly");

        let finish_b = handle_connected(&mut b, a_mac, &opened);
        assert_eq!(b.known.get(&a_mac).unwrap().state, ConnectState::Connected);
        assert!(finish_b.iter().any(|e| matches!(e, Effect::Connected { outcome: ConnectOutcome::Succeeded, .. })));

        let a_peer = a.known.get(&b_mac).unwrap();
        let b_peer = b.known.get(&a_mac).unwrap();
        assert_eq!(a_peer.lfsr_out, b_peer.lfsr_in);
        assert_eq!(a_peer.lfsr_in, b_peer.lfsr_out);
        assert_eq!(a_peer.lfsr_reset, b_peer.lfsr_reset);
    }

    #[test]
    fn disconnect_then_receive_disconnect_ack_clears_the_peer() {
        let mut state = fresh_state([1, 0, 0, 0, 0, 0]);
        let target = Mac([2, 0, 0, 0, 0, 0]);
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        state.known.insert(KnownPeer::new(target, ConnectState::Connected, LfsrPair::new(1, 1, mask, mask))).unwrap();

        let effects = disconnect(&mut state, target).unwrap();
        assert!(matches!(effects[0], Effect::Transmit(_)));
        assert!(state.known.get(&target).unwrap().pending_write.is_some());

        let teardown = receive_disconnect_ack(&mut state, target);
        assert!(state.known.get(&target).is_none());
        assert!(teardown.iter().any(|e| matches!(e, Effect::ForgetPeer(_))));
    }

    #[test]
    fn disconnect_refuses_with_a_pending_write_already_in_flight() {
        let mut state = fresh_state([1, 0, 0, 0, 0, 0]);
        let target = Mac([2, 0, 0, 0, 0, 0]);
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        let mut peer = KnownPeer::new(target, ConnectState::Connected, LfsrPair::new(1, 1, mask, mask));
        let snapshot = peer.lfsr_out;
        peer.pending_write = Some(PendingWrite { plaintext: vec![1, 2, 3], msg_type: MessageType::Message, sequence_id: 0, lfsr_out_snapshot: snapshot, check_count: 0, awaiting_session: false });
        state.known.insert(peer).unwrap();

        assert!(matches!(disconnect(&mut state, target), Err(SessionError::PendingWriteInProgress(_))));
    }

    #[test]
    fn force_disconnect_removes_an_unknown_peer_is_an_error() {
        let mut state = fresh_state([1, 0, 0, 0, 0, 0]);
        let target = Mac([2, 0, 0, 0, 0, 0]);
        assert!(matches!(force_disconnect(&mut state, target), Err(SessionError::UnknownPeer(_))));
    }
}
