//! The periodic retransmit sweep: resends unacknowledged handshake
//! requests and pending unicast writes, abandoning either once its
//! retry budget is exhausted.
//!
//! Called once per tick by [`crate::node::MeshNode`]'s retransmit
//! worker. Entirely synchronous, like the rest of the state machine --
//! the caller performs the returned [`Effect`]s after releasing the
//! core mutex.

use log::{debug, warn};

use crate::effect::Effect;
use crate::host::ConnectOutcome;
use crate::mac::Mac;
use crate::packet;
use crate::peer::ConnectState;
use crate::state::{frame_effect, CoreState};

/// Runs one retransmit tick over every known peer.
pub fn tick(state: &mut CoreState) -> Vec<Effect> {
    let budget = state.config.retransmit_budget_ticks;

    let mut handshake_resend = Vec::new();
    let mut handshake_timeout = Vec::new();
    let mut rekey_timeout = Vec::new();
    let mut write_resend = Vec::new();
    let mut write_timeout = Vec::new();

    for peer in state.known.iter_mut() {
        match peer.state {
            ConnectState::Connecting | ConnectState::ResetConnecting => {
                if let Some(request) = peer.handshake.as_ref().and_then(|h| h.pending_request.clone()) {
                    handshake_resend.push((peer.mac, request));
                }
                // A stuck handshake only gets a deadline when a queued
                // write is waiting on it. A peer with nothing of its own
                // outstanding -- e.g. a rekey responder that already sent
                // its ConnHandshake reply and is just waiting for the
                // initiator's Connected confirmation -- keeps waiting
                // indefinitely rather than being spuriously torn down.
                if peer.pending_write.is_some() {
                    peer.reset_connecting_ticks += 1;
                    if peer.reset_connecting_ticks > budget {
                        if peer.state == ConnectState::ResetConnecting {
                            rekey_timeout.push(peer.mac);
                        } else {
                            handshake_timeout.push(peer.mac);
                        }
                    }
                }
            }
            ConnectState::Connected => {
                if let Some(pending) = peer.pending_write.as_mut() {
                    pending.check_count += 1;
                    if pending.check_count > budget * 2 {
                        write_timeout.push(peer.mac);
                    } else if pending.check_count % 2 == 1 {
                        let mut lfsr = pending.lfsr_out_snapshot;
                        if let Some(packet) = packet::build_packet(pending.sequence_id, &pending.plaintext, &mut lfsr) {
                            write_resend.push((peer.mac, pending.msg_type, packet));
                        }
                    }
                }
            }
            ConnectState::Reset => {}
        }
    }

    let mut effects = Vec::new();

    for (mac, request) in handshake_resend {
        debug!("retransmit: resending handshake request to {mac}");
        if let Some(msg_type) = frame_effect(state.mac, mac, crate::packet::MessageType::ConnectRequest, &request) {
            effects.push(msg_type);
        }
    }

    for mac in handshake_timeout {
        warn!("retransmit: giving up on a fresh handshake with {mac} after {budget} ticks");
        state.known.remove(&mac);
        effects.push(Effect::SendFailed { mac });
        effects.push(Effect::Connected { mac, name: None, outcome: ConnectOutcome::Failed });
    }

    for mac in rekey_timeout {
        warn!("retransmit: giving up on a rekey with {mac} after {budget} ticks, falling back to Reset");
        if let Some(peer) = state.known.get_mut(&mac) {
            peer.state = ConnectState::Reset;
            peer.handshake = None;
            peer.pending_write = None;
            peer.reset_connecting_ticks = 0;
        }
        effects.push(Effect::SendFailed { mac });
    }

    for (mac, msg_type, packet) in write_resend {
        debug!("retransmit: resending {msg_type:?} to {mac}");
        if let Some(tx) = frame_effect(state.mac, mac, msg_type, &packet) {
            effects.push(tx);
        }
    }

    for mac in write_timeout {
        warn!("retransmit: abandoning pending write to {mac} after {} ticks", budget * 2);
        if let Some(peer) = state.known.get_mut(&mac) {
            peer.pending_write = None;
        }
        effects.push(Effect::SendFailed { mac });
        effects.push(Effect::DeliverMessage { from: mac, data: Vec::new() });
    }

    effects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshConfig;
    use crate::handshake::DhChallenge;
    use crate::peer::{HandshakeState, KnownPeer, PendingWrite};
    use rfmesh_crypto::lfsr::{LfsrPair, TapMask};

    fn test_config() -> MeshConfig {
        MeshConfig {
            broadcast_lfsr: [0xdead_beef, 0x1234_5678],
            broadcast_mask1: [1, 3, 5],
            broadcast_mask2: [7, 11, 13],
            dh_p: 0xFFFF_FFFB,
            dh_g: 5,
            broadcast_relay_enabled: true,
            retransmit_tick_interval_ms: 500,
            retransmit_budget_ticks: 2,
            unknown_peer_capacity: 64,
            max_rebroadcast_copies: 2,
        }
    }

    fn fresh_state() -> CoreState {
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        CoreState::new(Mac([1, 0, 0, 0, 0, 0]), test_config(), LfsrPair::new(0xdead_beef, 0x1234_5678, mask, mask), 0)
    }

    #[test]
    fn handshake_is_resent_until_the_budget_is_exhausted() {
        // A fresh Connecting peer only gets a deadline once it has a write
        // of its own riding on the handshake completing.
        let mut state = fresh_state();
        let target = Mac([2, 0, 0, 0, 0, 0]);
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        let mut peer = KnownPeer::new(target, ConnectState::Connecting, LfsrPair::new(1, 1, mask, mask));
        let request = DhChallenge { challenge: 42, mask: mask.0, rot_mask: mask.0 }.to_bytes().to_vec();
        peer.handshake = Some(HandshakeState { dh_private: Some(1), mask: Some(mask), rot_mask: Some(mask), master: None, pending_request: Some(request) });
        let snapshot = peer.lfsr_out;
        peer.pending_write = Some(PendingWrite {
            plaintext: vec![1, 2, 3],
            msg_type: crate::packet::MessageType::Message,
            sequence_id: 0,
            lfsr_out_snapshot: snapshot,
            check_count: 0,
            awaiting_session: true,
        });
        state.known.insert(peer).unwrap();

        let first = tick(&mut state);
        assert!(first.iter().any(|e| matches!(e, Effect::Transmit(_))));
        assert!(state.known.contains(&target));

        let second = tick(&mut state);
        assert!(second.iter().any(|e| matches!(e, Effect::Transmit(_))));
        assert!(state.known.contains(&target));

        let third = tick(&mut state);
        assert!(!state.known.contains(&target));
        assert!(third.iter().any(|e| matches!(e, Effect::SendFailed { .. })));
        assert!(third.iter().any(|e| matches!(e, Effect::Connected { outcome: ConnectOutcome::Failed, .. })));
    }

    #[test]
    fn resetconnecting_without_a_pending_write_never_times_out() {
        // A rekey responder that merely answered ConnHandshake has nothing
        // outstanding of its own; it must not be torn down just because the
        // initiator is slow to confirm.
        let mut state = fresh_state();
        let target = Mac([2, 0, 0, 0, 0, 0]);
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        let reset = LfsrPair::new(0xaaaa, 0xbbbb, mask, mask);
        let peer = KnownPeer::new(target, ConnectState::ResetConnecting, reset);
        state.known.insert(peer).unwrap();

        for _ in 0..(test_config().retransmit_budget_ticks + 5) {
            tick(&mut state);
        }

        let peer = state.known.get(&target).expect("peer must survive");
        assert_eq!(peer.state, ConnectState::ResetConnecting);
        assert_eq!(peer.lfsr_reset, reset);
    }

    #[test]
    fn resetconnecting_with_a_pending_write_falls_back_to_reset_without_forgetting_the_peer() {
        let mut state = fresh_state();
        let target = Mac([2, 0, 0, 0, 0, 0]);
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        let reset = LfsrPair::new(0xaaaa, 0xbbbb, mask, mask);
        let mut peer = KnownPeer::new(target, ConnectState::ResetConnecting, reset);
        let request = DhChallenge { challenge: 42, mask: mask.0, rot_mask: mask.0 }.to_bytes().to_vec();
        peer.handshake = Some(HandshakeState { dh_private: None, mask: None, rot_mask: None, master: Some(reset), pending_request: Some(request) });
        let snapshot = peer.lfsr_out;
        peer.pending_write = Some(PendingWrite {
            plaintext: vec![b'x'],
            msg_type: crate::packet::MessageType::Message,
            sequence_id: 0,
            lfsr_out_snapshot: snapshot,
            check_count: 0,
            awaiting_session: true,
        });
        state.known.insert(peer).unwrap();

        let budget = test_config().retransmit_budget_ticks;
        let mut last = Vec::new();
        for _ in 0..=budget {
            last = tick(&mut state);
        }

        assert!(last.iter().any(|e| matches!(e, Effect::SendFailed { mac } if *mac == target)));
        assert!(!last.iter().any(|e| matches!(e, Effect::ForgetPeer(_))));
        assert!(!last.iter().any(|e| matches!(e, Effect::Connected { .. })));

        let peer = state.known.get(&target).expect("peer must be retained, not forgotten");
        assert_eq!(peer.state, ConnectState::Reset);
        assert_eq!(peer.lfsr_reset, reset);
        assert!(peer.pending_write.is_none());
        assert!(peer.handshake.is_none());
    }

    #[test]
    fn pending_write_resends_on_odd_ticks_only() {
        let mut state = fresh_state();
        let target = Mac([2, 0, 0, 0, 0, 0]);
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        let mut peer = KnownPeer::new(target, ConnectState::Connected, LfsrPair::new(7, 9, mask, mask));
        let snapshot = peer.lfsr_out;
        peer.pending_write = Some(PendingWrite {
            plaintext: vec![1, 2, 3],
            msg_type: crate::packet::MessageType::Message,
            sequence_id: 0,
            lfsr_out_snapshot: snapshot,
            check_count: 0,
            awaiting_session: false,
        });
        state.known.insert(peer).unwrap();

        let tick1 = tick(&mut state); // check_count -> 1 (odd): resend
        assert!(tick1.iter().any(|e| matches!(e, Effect::Transmit(_))));
        let tick2 = tick(&mut state); // check_count -> 2 (even): no resend
        assert!(!tick2.iter().any(|e| matches!(e, Effect::Transmit(_))));
    }

    #[test]
    fn pending_write_is_abandoned_after_its_budget() {
        let mut state = fresh_state();
        let target = Mac([2, 0, 0, 0, 0, 0]);
        let mask = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        let mut peer = KnownPeer::new(target, ConnectState::Connected, LfsrPair::new(7, 9, mask, mask));
        let snapshot = peer.lfsr_out;
        peer.pending_write = Some(PendingWrite {
            plaintext: vec![1, 2, 3],
            msg_type: crate::packet::MessageType::Message,
            sequence_id: 0,
            lfsr_out_snapshot: snapshot,
            check_count: 0,
            awaiting_session: false,
        });
        state.known.insert(peer).unwrap();

        for _ in 0..(test_config().retransmit_budget_ticks * 2) {
            tick(&mut state);
        }
        let last = tick(&mut state);
        assert!(last.iter().any(|e| matches!(e, Effect::SendFailed { .. })));
        assert!(state.known.get(&target).unwrap().pending_write.is_none());
    }
}
