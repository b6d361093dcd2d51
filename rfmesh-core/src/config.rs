use serde::{Deserialize, Serialize};

/// Settings a host application supplies to bring up a [`crate::node::MeshNode`].
///
/// Mirrors the original `MeshNetworkData` initializer struct, expanded with
/// the tuning knobs the original treated as fixed constants.
#[derive(Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// The two words of the shared broadcast LFSR seed.
    pub broadcast_lfsr: [u32; 2],
    /// Tap positions (1..=31, pairwise distinct, coprime with 32) for the
    /// broadcast LFSR's primary register.
    pub broadcast_mask1: [u8; 3],
    /// Tap positions for the broadcast LFSR's rotation register.
    pub broadcast_mask2: [u8; 3],
    /// Diffie-Hellman modulus. Should be prime.
    pub dh_p: u64,
    /// Diffie-Hellman generator. Must be non-zero and smaller than `dh_p`.
    pub dh_g: u64,
    /// Whether this node participates in rebroadcast relay of other peers'
    /// broadcast traffic. A node with this disabled still receives and can
    /// send broadcasts, it just never forwards someone else's.
    #[serde(default = "default_true")]
    pub broadcast_relay_enabled: bool,
    /// Retransmit tick cadence, in milliseconds. Defaults to the protocol's
    /// historical 500ms.
    #[serde(default = "default_tick_interval_ms")]
    pub retransmit_tick_interval_ms: u64,
    /// Number of ticks a pending write is retried before it's abandoned.
    /// Defaults to 5 (~2.5s at the default cadence).
    #[serde(default = "default_retransmit_budget")]
    pub retransmit_budget_ticks: u32,
    /// Maximum number of unacknowledged senders tracked in the unknown-peer
    /// (broadcast-sender) table before the oldest is evicted.
    #[serde(default = "default_unknown_peer_capacity")]
    pub unknown_peer_capacity: usize,
    /// Maximum number of extra opportunistic rebroadcasts of a single
    /// observed broadcast frame before relay stops.
    #[serde(default = "default_max_rebroadcast_copies")]
    pub max_rebroadcast_copies: u32,
}

fn default_true() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_retransmit_budget() -> u32 {
    5
}

fn default_unknown_peer_capacity() -> usize {
    64
}

fn default_max_rebroadcast_copies() -> u32 {
    2
}

impl MeshConfig {
    pub fn validate(&self) -> Result<(), crate::error::InitError> {
        rfmesh_crypto::dh::validate_params(self.dh_p, self.dh_g)
            .map_err(|_| crate::error::InitError::InvalidDiffieHellmanParams)?;
        rfmesh_crypto::mask::validate_broadcast_triple(self.broadcast_mask1)
            .map_err(crate::error::InitError::InvalidBroadcastMask)?;
        rfmesh_crypto::mask::validate_broadcast_triple(self.broadcast_mask2)
            .map_err(crate::error::InitError::InvalidBroadcastMask)?;
        Ok(())
    }
}
