//! Wire payloads exchanged during connect/reset handshakes.

use rfmesh_crypto::lfsr::{LfsrPair, TapMask};

const NAME_SIZE: usize = 20;

/// Sent in `ConnectRequest`: either the Diffie-Hellman public challenge for
/// a brand new connection, or (for a reset) the literal
/// [`crate::packet::RESET_CMD`] sentinel twice over, encrypted under the
/// persisted reset register. `mask`/`rot_mask` are always sent in the
/// clear alongside the challenge: the shared secret only ever supplies the
/// master register's numeric value, never its tap layout, so the tap masks
/// have to travel out of band.
pub struct DhChallenge {
    pub challenge: u64,
    pub mask: u32,
    pub rot_mask: u32,
}

impl DhChallenge {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.challenge.to_le_bytes());
        out[8..12].copy_from_slice(&self.mask.to_le_bytes());
        out[12..16].copy_from_slice(&self.rot_mask.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            challenge: u64::from_le_bytes(bytes[0..8].try_into().ok()?),
            mask: u32::from_le_bytes(bytes[8..12].try_into().ok()?),
            rot_mask: u32::from_le_bytes(bytes[12..16].try_into().ok()?),
        })
    }
}

/// Derives the one-shot "master" register pair used to encrypt a
/// handshake's finalize payload from a 64-bit Diffie-Hellman shared
/// secret: the low 32 bits seed the primary register, the high 32 bits
/// seed the rotation register, each clamped away from the degenerate
/// all-zero/all-ones state the same way a normal LFSR step is.
pub fn derive_master_lfsr(shared_secret: u64, mask: TapMask, rot_mask: TapMask) -> LfsrPair {
    let clamp = |v: u32| if v == 0 || v == u32::MAX { 1 } else { v };
    LfsrPair::new(clamp(shared_secret as u32), clamp((shared_secret >> 32) as u32), mask, rot_mask)
}

/// Sent in `ConnHandshake`: the responder's half of the Diffie-Hellman
/// exchange (or, during a reset, a CRC challenge) plus three fresh LFSR
/// registers (reset, in, out, from the responder's perspective) and the
/// responder's advertised name.
pub struct DhFinalize {
    /// A chained CRC-8 over `lfsr`/`lfsr_mask`, widened into a 64-bit slot
    /// purely so the on-wire layout matches [`DhChallenge`]'s; the
    /// responder's Diffie-Hellman public value travels in the clear
    /// ahead of this struct's encrypted bytes instead (see
    /// [`crate::session::handle_connect_request`]), since the initiator
    /// needs it before it can derive the master register this struct is
    /// encrypted under.
    pub chal: u64,
    /// The `main` seed of the responder's (reset, in, out) registers, in
    /// that order.
    pub lfsr: [u32; 3],
    /// The matching `rot` seed of each register. The tap-mask pair
    /// itself is never retransmitted here -- both sides already agree on
    /// it, either from the `ConnectRequest` that started a fresh connect
    /// or from the persisted reset register on a rekey -- and is reused
    /// for all three registers.
    pub lfsr_mask: [u32; 3],
    pub name: [u8; NAME_SIZE],
}

impl DhFinalize {
    pub const LFSR_BLOCK_SIZE: usize = 8 + 12 + 12;
    pub const SIZE: usize = Self::LFSR_BLOCK_SIZE + NAME_SIZE;

    pub fn lfsr_block_bytes(&self) -> [u8; Self::LFSR_BLOCK_SIZE] {
        let mut out = [0u8; Self::LFSR_BLOCK_SIZE];
        out[0..8].copy_from_slice(&self.chal.to_le_bytes());
        for i in 0..3 {
            out[8 + i * 4..12 + i * 4].copy_from_slice(&self.lfsr[i].to_le_bytes());
        }
        for i in 0..3 {
            out[20 + i * 4..24 + i * 4].copy_from_slice(&self.lfsr_mask[i].to_le_bytes());
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.lfsr_block_bytes());
        out.extend_from_slice(&self.name);
        out
    }

    pub fn from_lfsr_block_and_name(block: &[u8], name: &[u8]) -> Option<Self> {
        if block.len() < Self::LFSR_BLOCK_SIZE || name.len() < NAME_SIZE {
            return None;
        }
        let chal = u64::from_le_bytes(block[0..8].try_into().ok()?);
        let mut lfsr = [0u32; 3];
        for i in 0..3 {
            lfsr[i] = u32::from_le_bytes(block[8 + i * 4..12 + i * 4].try_into().ok()?);
        }
        let mut lfsr_mask = [0u32; 3];
        for i in 0..3 {
            lfsr_mask[i] = u32::from_le_bytes(block[20 + i * 4..24 + i * 4].try_into().ok()?);
        }
        let mut name_buf = [0u8; NAME_SIZE];
        name_buf.copy_from_slice(&name[..NAME_SIZE]);
        Some(Self { chal, lfsr, lfsr_mask, name: name_buf })
    }
}

/// Sent in `Connected`: confirms both sides landed on the same state and
/// carries the reset register to persist for future reconnects. `cmd`
/// carries [`crate::packet::CONNECTED_CMD`] so a receiver can tell this
/// payload apart from noise that happened to pass the packet CRC and
/// `VALID_PACKET_ID` checks under a desynced LFSR.
pub struct ConnectedPayload {
    pub cmd: u32,
    pub id: u32,
    pub lfsr: u32,
    pub lfsr_mask: u32,
    pub name: [u8; NAME_SIZE],
}

impl ConnectedPayload {
    pub const SIZE: usize = 4 + 4 + 4 + 4 + NAME_SIZE;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.cmd.to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&self.lfsr.to_le_bytes());
        out.extend_from_slice(&self.lfsr_mask.to_le_bytes());
        out.extend_from_slice(&self.name);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let cmd = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let id = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        let lfsr = u32::from_le_bytes(bytes[8..12].try_into().ok()?);
        let lfsr_mask = u32::from_le_bytes(bytes[12..16].try_into().ok()?);
        let mut name = [0u8; NAME_SIZE];
        name.copy_from_slice(&bytes[16..16 + NAME_SIZE]);
        Some(Self { cmd, id, lfsr, lfsr_mask, name })
    }
}

/// Copies up to [`NAME_SIZE`] bytes of `data` into a zero-padded name
/// field, matching the original's truncate-and-zero-pad semantics.
pub fn pack_name(data: &[u8]) -> [u8; NAME_SIZE] {
    let mut out = [0u8; NAME_SIZE];
    let n = data.len().min(NAME_SIZE);
    out[..n].copy_from_slice(&data[..n]);
    out
}
