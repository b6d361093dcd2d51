//! Six-byte hardware address used as peer identity throughout the mesh.

use std::fmt;

pub const MAC_SIZE: usize = 6;

/// A raw 802.11 MAC address. The all-`0xff` value is reserved to mean
/// "broadcast" wherever a [`Mac`] is used as a `Write`/`Connect` destination.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Mac(pub [u8; MAC_SIZE]);

impl Mac {
    pub const BROADCAST: Mac = Mac([0xff; MAC_SIZE]);

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; MAC_SIZE] {
        &self.0
    }
}

impl From<[u8; MAC_SIZE]> for Mac {
    fn from(bytes: [u8; MAC_SIZE]) -> Self {
        Mac(bytes)
    }
}

impl TryFrom<&[u8]> for Mac {
    type Error = ();

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != MAC_SIZE {
            return Err(());
        }
        let mut out = [0u8; MAC_SIZE];
        out.copy_from_slice(bytes);
        Ok(Mac(out))
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Computes the 3-bit hash-chain bucket index (`CRC8(mac) & 7`) shared by
/// the known-peer and unknown-peer tables.
pub fn bucket_of(mac: &Mac) -> usize {
    (rfmesh_crypto::crc8(mac.as_bytes()) & 0x07) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_is_all_ff() {
        assert!(Mac::BROADCAST.is_broadcast());
        assert!(!Mac([1, 2, 3, 4, 5, 6]).is_broadcast());
    }

    #[test]
    fn display_formats_as_colon_hex() {
        let mac = Mac([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "de:ad:be:ef:00:01");
    }

    #[test]
    fn bucket_is_stable_and_bounded() {
        let mac = Mac([1, 2, 3, 4, 5, 6]);
        let b1 = bucket_of(&mac);
        let b2 = bucket_of(&mac);
        assert_eq!(b1, b2);
        assert!(b1 < 8);
    }
}
