//! Wire framing: packet header, CRC trailer, and the encrypt/decrypt
//! glue that ties the stream cipher to a sequence ID and an
//! authenticity marker.
//!
//! Wire structs are serialized explicitly with `to_bytes`/`from_bytes`
//! rather than cast through `#[repr(packed)]`, since reading through a
//! packed struct pointer over attacker-controlled bytes is exactly the
//! kind of unsafe aliasing Rust's type system exists to rule out.

use rfmesh_crypto::lfsr::LfsrPair;

/// Sentinel the original hard-codes as a random-looking constant; kept
/// as a literal, not derived, so every peer on a given mesh network
/// agrees on it out of band (compiled in, same as the original).
pub const VALID_PACKET_ID: u32 = 0x9056_acd2;
pub const RESET_CMD: u32 = 0xa19f_0c21;
pub const CONNECTED_CMD: u32 = 0x229c_0985;
pub const DISCONNECT_CMD: u32 = 0x8f22_3a7b;

pub const MAX_PACKET_SIZE: usize = 1000;
const HEADER_SIZE: usize = 5; // 1 byte CRC + 4 byte sequence ID
const TRAILER_SIZE: usize = 4; // encrypted VALID_PACKET_ID

/// The unencrypted packet header: an 8-bit CRC (computed with the sequence
/// ID and the decrypted payload folded in) followed by the little-endian
/// sequence ID.
pub struct PacketHeader {
    pub internal_crc: u8,
    pub sequence_id: u32,
}

impl PacketHeader {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.internal_crc;
        out[1..5].copy_from_slice(&self.sequence_id.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut seq = [0u8; 4];
        seq.copy_from_slice(&bytes[1..5]);
        Self { internal_crc: bytes[0], sequence_id: u32::from_le_bytes(seq) }
    }
}

/// Builds an encrypted packet from `payload` under `lfsr`, which is
/// advanced as a side effect. Returns `None` if `payload` is empty-but-
/// required or would overflow [`MAX_PACKET_SIZE`].
///
/// Layout: `[header: 5 bytes][encrypted payload][encrypted VALID_PACKET_ID: 4 bytes]`.
/// The header's CRC covers the sequence ID bytes (all but the CRC byte
/// itself) plus the plaintext payload, so a receiver can validate the
/// packet's integrity before trusting a decrypt that merely "looked"
/// successful.
pub fn build_packet(sequence_id: u32, payload: &[u8], lfsr: &mut LfsrPair) -> Option<Vec<u8>> {
    if payload.len() + HEADER_SIZE + TRAILER_SIZE > MAX_PACKET_SIZE {
        return None;
    }

    let mut header = PacketHeader { internal_crc: 0, sequence_id };
    let header_bytes = header.to_bytes();
    let mut crc = rfmesh_crypto::crc8(&header_bytes[1..]);
    crc = rfmesh_crypto::crc8::crc8_seeded(payload, crc);
    header.internal_crc = crc;

    let mut out = vec![0u8; HEADER_SIZE + payload.len() + TRAILER_SIZE];
    out[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

    rfmesh_crypto::cipher::encrypt(payload, &mut out[HEADER_SIZE..HEADER_SIZE + payload.len()], lfsr);

    let valid_id = VALID_PACKET_ID.to_le_bytes();
    let trailer_start = HEADER_SIZE + payload.len();
    rfmesh_crypto::cipher::encrypt(&valid_id, &mut out[trailer_start..], lfsr);

    Some(out)
}

/// Reads the cleartext sequence ID out of a packet's header without
/// touching any LFSR state. Used for broadcast packets, where the
/// decrypt register itself depends on the sender's MAC and this ID
/// (see [`rfmesh_crypto::broadcast::permute_broadcast_lfsr`]), so it has
/// to be known before decryption can even start.
pub fn peek_sequence_id(packet: &[u8]) -> Option<u32> {
    if packet.len() < HEADER_SIZE + TRAILER_SIZE {
        return None;
    }
    Some(PacketHeader::from_bytes(&packet[..HEADER_SIZE]).sequence_id)
}

/// Attempts to decrypt `packet` under `lfsr` (advanced as a side effect
/// regardless of outcome) for an expected `sequence_id`. Returns the
/// recovered payload only if the sequence ID, the decrypted
/// [`VALID_PACKET_ID`] trailer, and the CRC all check out.
pub fn open_packet(sequence_id: u32, packet: &[u8], lfsr: &mut LfsrPair) -> Option<Vec<u8>> {
    if packet.len() < HEADER_SIZE + TRAILER_SIZE {
        return None;
    }

    let header = PacketHeader::from_bytes(&packet[..HEADER_SIZE]);
    if header.sequence_id != sequence_id {
        return None;
    }

    let payload_len = packet.len() - HEADER_SIZE - TRAILER_SIZE;
    if payload_len == 0 {
        return None;
    }

    let mut payload = vec![0u8; payload_len];
    rfmesh_crypto::cipher::decrypt(&packet[HEADER_SIZE..HEADER_SIZE + payload_len], &mut payload, lfsr);

    let mut valid_id = [0u8; TRAILER_SIZE];
    rfmesh_crypto::cipher::decrypt(&packet[HEADER_SIZE + payload_len..], &mut valid_id, lfsr);
    let valid_id = u32::from_le_bytes(valid_id);

    let mut crc = rfmesh_crypto::crc8(&packet[1..HEADER_SIZE]);
    crc = rfmesh_crypto::crc8::crc8_seeded(&payload, crc);

    if valid_id != VALID_PACKET_ID || crc != header.internal_crc {
        return None;
    }

    Some(payload)
}

/// Header of the raw 802.11 action frame this protocol rides on top of:
/// a stripped-down management frame with the BSSID dropped and the
/// sequence-control field replaced by a 4-byte application sequence ID
/// living inside the mesh payload rather than the 802.11 header itself.
pub struct FrameHeader {
    pub frame_control: u16,
    pub receiver: crate::mac::Mac,
    pub sender: crate::mac::Mac,
    pub message_type: u8,
}

pub const ACTION_FRAME_CONTROL: u16 = 0x00d0;

impl FrameHeader {
    pub const SIZE: usize = 2 + 2 + 6 + 6 + 1;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&self.frame_control.to_le_bytes());
        out[2..4].copy_from_slice(&0u16.to_le_bytes()); // duration, unused
        out[4..10].copy_from_slice(self.receiver.as_bytes());
        out[10..16].copy_from_slice(self.sender.as_bytes());
        out[16] = self.message_type;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let frame_control = u16::from_le_bytes([bytes[0], bytes[1]]);
        let receiver = crate::mac::Mac::try_from(&bytes[4..10]).ok()?;
        let sender = crate::mac::Mac::try_from(&bytes[10..16]).ok()?;
        let message_type = bytes[16];
        Some(Self { frame_control, receiver, sender, message_type })
    }
}

/// One of the nine message types carried over the action frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    ConnectRequest = 0x60,
    ConnHandshake = 0x61,
    Connected = 0x62,
    Message = 0x63,
    MessageAck = 0x64,
    Ping = 0x65,
    PingAck = 0x66,
    Disconnect = 0x67,
    DisconnectAck = 0x68,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x60 => Self::ConnectRequest,
            0x61 => Self::ConnHandshake,
            0x62 => Self::Connected,
            0x63 => Self::Message,
            0x64 => Self::MessageAck,
            0x65 => Self::Ping,
            0x66 => Self::PingAck,
            0x67 => Self::Disconnect,
            0x68 => Self::DisconnectAck,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfmesh_crypto::lfsr::TapMask;

    fn fresh_pair() -> LfsrPair {
        let m1 = TapMask(0x3e000000 | (4 << 20) | (8 << 15) | (16 << 10));
        let m2 = TapMask(0x3e000000 | (2 << 20) | (9 << 15) | (20 << 10));
        LfsrPair::new(0xdead_beef, 0x1234_5678, m1, m2)
    }

    #[test]
    fn round_trips_with_matching_lfsr_state() {
        let payload = b"ping near you";
        let mut enc_lfsr = fresh_pair();
        let packet = build_packet(7, payload, &mut enc_lfsr).unwrap();

        let mut dec_lfsr = fresh_pair();
        let recovered = open_packet(7, &packet, &mut dec_lfsr).unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn rejects_wrong_sequence_id() {
        let payload = b"data";
        let mut enc_lfsr = fresh_pair();
        let packet = build_packet(3, payload, &mut enc_lfsr).unwrap();

        let mut dec_lfsr = fresh_pair();
        assert!(open_packet(4, &packet, &mut dec_lfsr).is_none());
    }

    #[test]
    fn rejects_tampered_payload() {
        let payload = b"data";
        let mut enc_lfsr = fresh_pair();
        let mut packet = build_packet(3, payload, &mut enc_lfsr).unwrap();
        let last = packet.len() - 1;
        packet[last] ^= 0xff;

        let mut dec_lfsr = fresh_pair();
        assert!(open_packet(3, &packet, &mut dec_lfsr).is_none());
    }

    #[test]
    fn rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PACKET_SIZE];
        let mut lfsr = fresh_pair();
        assert!(build_packet(0, &payload, &mut lfsr).is_none());
    }

    #[test]
    fn frame_header_round_trips() {
        let header = FrameHeader {
            frame_control: ACTION_FRAME_CONTROL,
            receiver: crate::mac::Mac([1, 2, 3, 4, 5, 6]),
            sender: crate::mac::Mac([6, 5, 4, 3, 2, 1]),
            message_type: MessageType::Ping as u8,
        };
        let bytes = header.to_bytes();
        let parsed = FrameHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.frame_control, header.frame_control);
        assert_eq!(parsed.receiver, header.receiver);
        assert_eq!(parsed.sender, header.sender);
        assert_eq!(parsed.message_type, header.message_type);
    }
}
