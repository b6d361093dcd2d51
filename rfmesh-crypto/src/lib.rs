pub mod broadcast;
pub mod cipher;
pub mod crc8;
pub mod dh;
pub mod error;
pub mod lfsr;
pub mod mask;

pub use broadcast::permute_broadcast_lfsr;
pub use cipher::{decrypt, encrypt};
pub use crc8::crc8;
pub use dh::{create_challenge, finish_challenge, pow_mod};
pub use error::CryptoError;
pub use lfsr::{LfsrPair, TapMask};
pub use mask::generate_tap_mask;
