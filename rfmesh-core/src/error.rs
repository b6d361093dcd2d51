use crate::mac::Mac;

/// Failure reasons for [`crate::node::MeshNode::new`].
pub enum InitError {
    /// A [`crate::node::MeshConfig`] already produced a running node from
    /// this process (mirrors the original's single global-instance limit,
    /// enforced here per-process rather than via a global).
    AlreadyInitialized,

    /// The Diffie-Hellman generator was not smaller than the modulus.
    InvalidDiffieHellmanParams,

    /// One of the two broadcast tap triples was malformed (zero, out of
    /// range, repeated, or not coprime with 32).
    InvalidBroadcastMask(rfmesh_crypto::CryptoError),

    /// The host-supplied persistent store failed to load.
    PersistenceLoadFailed,
}

impl std::fmt::Display for InitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyInitialized => f.write_str("AlreadyInitialized"),
            Self::InvalidDiffieHellmanParams => f.write_str("InvalidDiffieHellmanParams"),
            Self::InvalidBroadcastMask(e) => write!(f, "InvalidBroadcastMask({e})"),
            Self::PersistenceLoadFailed => f.write_str("PersistenceLoadFailed"),
        }
    }
}

impl std::fmt::Debug for InitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for InitError {}

/// Failure reasons for [`crate::node::MeshNode::write`] and related calls.
pub enum WriteError {
    /// The payload plus packet overhead exceeds the wire size limit.
    DataTooLarge,

    /// `MAC` does not name a known (connected or connecting) peer.
    DeviceDoesNotExist(Mac),

    /// The peer's single outstanding-write slot is occupied; the caller
    /// must wait for the prior write to ack or time out.
    PreviousWriteNotComplete(Mac),

    /// The peer's session had lapsed into `Reset`; a reconnect handshake
    /// was kicked off automatically and the caller should retry once
    /// [`crate::host::MeshHost::on_connected`] fires again.
    ResettingConnection(Mac),

    /// The host's raw radio transmit failed.
    TransmitFailed,

    /// Allocation-equivalent failure building the packet (kept for parity
    /// with the original's out-of-memory return; practically unreachable
    /// under Rust's allocator, but still a distinct outcome worth naming).
    OutOfMemory,
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataTooLarge => f.write_str("DataTooLarge"),
            Self::DeviceDoesNotExist(mac) => write!(f, "DeviceDoesNotExist({mac})"),
            Self::PreviousWriteNotComplete(mac) => write!(f, "PreviousWriteNotComplete({mac})"),
            Self::ResettingConnection(mac) => write!(f, "ResettingConnection({mac})"),
            Self::TransmitFailed => f.write_str("TransmitFailed"),
            Self::OutOfMemory => f.write_str("OutOfMemory"),
        }
    }
}

impl std::fmt::Debug for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for WriteError {}

/// Failure reasons for [`crate::node::MeshNode::connect`] and
/// [`crate::node::MeshNode::disconnect`].
pub enum SessionError {
    /// A session with this peer is already established or underway.
    AlreadyConnected(Mac),

    /// `MAC` does not name a known peer.
    UnknownPeer(Mac),

    /// The peer has an outgoing message in flight; disconnecting while a
    /// write is pending would leave it undeliverable.
    PendingWriteInProgress(Mac),

    /// The peer had lapsed into `Reset`; a reconnect handshake was kicked
    /// off automatically rather than a graceful disconnect being sent.
    ResettingConnection(Mac),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyConnected(mac) => write!(f, "AlreadyConnected({mac})"),
            Self::UnknownPeer(mac) => write!(f, "UnknownPeer({mac})"),
            Self::PendingWriteInProgress(mac) => write!(f, "PendingWriteInProgress({mac})"),
            Self::ResettingConnection(mac) => write!(f, "ResettingConnection({mac})"),
        }
    }
}

impl std::fmt::Debug for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for SessionError {}
