//! Per-sender permutation of the broadcast LFSR.
//!
//! Broadcast packets aren't encrypted under a pairwise session key -- every
//! peer that knows the network's shared broadcast seed can decrypt them.
//! To keep two different senders' broadcast streams from colliding on the
//! same keystream, the seed is folded through the sender's MAC and the
//! packet's sequence ID via four rounds of chained CRC-8 before each use.

use crate::crc8::crc8_seeded;
use crate::lfsr::{LfsrPair, TapMask};

/// Derives the per-(sender, sequence ID) LFSR pair used to en/decrypt one
/// broadcast packet from the network's shared `seed`.
///
/// Only the rotation register is actually permuted per sender: the primary
/// register is reused unmodified from the shared seed. That asymmetry
/// mirrors the derivation this was ported from -- every receiver derives
/// the same pair from the same inputs, so the two sides of the mesh still
/// agree on the keystream even though only half of it changes per sender.
pub fn permute_broadcast_lfsr(seed: &LfsrPair, sender_mac: &[u8; 6], sequence_id: u32) -> LfsrPair {
    let rot = permute_register(seed.rot, sender_mac, sequence_id);

    LfsrPair {
        main: seed.main,
        rot,
        main_mask: seed.main_mask,
        rot_mask: seed.rot_mask,
    }
}

fn permute_register(register: u32, sender_mac: &[u8; 6], sequence_id: u32) -> u32 {
    let id_bytes = sequence_id.to_le_bytes();
    let mut out = [0u8; 4];
    let mut prev = 0u8;
    for (i, byte) in out.iter_mut().enumerate() {
        let register_byte = ((register >> (i * 8)) & 0xff) as u8;
        let seed = crc8_seeded(sender_mac, register_byte ^ prev);
        let seed = crc8_seeded(&id_bytes, seed);
        *byte = seed;
        prev = seed;
    }
    u32::from_le_bytes(out)
}

/// Builds the shared broadcast seed from its two LFSR words and two
/// validated tap-triples, as supplied at mesh initialization time.
pub fn broadcast_seed(lfsr_main: u32, lfsr_rot: u32, mask_main: TapMask, mask_rot: TapMask) -> LfsrPair {
    LfsrPair::new(lfsr_main, lfsr_rot, mask_main, mask_rot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::pack_broadcast_mask;

    fn seed() -> LfsrPair {
        broadcast_seed(
            0xcafe_babe,
            0x1357_9bdf,
            pack_broadcast_mask([3, 7, 11]),
            pack_broadcast_mask([5, 13, 17]),
        )
    }

    #[test]
    fn different_senders_get_different_permutations() {
        let a = permute_broadcast_lfsr(&seed(), &[1, 2, 3, 4, 5, 6], 0);
        let b = permute_broadcast_lfsr(&seed(), &[9, 8, 7, 6, 5, 4], 0);
        assert_ne!(a.rot, b.rot);
    }

    #[test]
    fn different_sequence_ids_get_different_permutations() {
        let mac = [1, 2, 3, 4, 5, 6];
        let a = permute_broadcast_lfsr(&seed(), &mac, 0);
        let b = permute_broadcast_lfsr(&seed(), &mac, 1);
        assert_ne!(a.rot, b.rot);
    }

    #[test]
    fn is_deterministic_for_the_same_inputs() {
        let mac = [1, 2, 3, 4, 5, 6];
        let a = permute_broadcast_lfsr(&seed(), &mac, 42);
        let b = permute_broadcast_lfsr(&seed(), &mac, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn main_register_and_masks_are_carried_from_the_seed_unpermuted() {
        let mac = [1, 2, 3, 4, 5, 6];
        let s = seed();
        let permuted = permute_broadcast_lfsr(&s, &mac, 7);
        assert_eq!(permuted.main, s.main);
        assert_eq!(permuted.main_mask, s.main_mask);
        assert_eq!(permuted.rot_mask, s.rot_mask);
    }
}
