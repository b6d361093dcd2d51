//! Collaborator traits the core depends on but does not implement:
//! callback delivery, raw frame transmission, and a cryptographic random
//! source. Shaped after the original's function-pointer callback struct
//! and its ESP-IDF wifi/RNG calls, but expressed as traits so a host
//! application can supply whatever backing implementation fits its
//! platform -- an in-memory harness, a real 802.11 monitor-mode socket,
//! or something else entirely.

use async_trait::async_trait;

use crate::mac::Mac;

/// Outcome reported to [`MeshHost::on_connected`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    Succeeded,
    Failed,
    Disconnected,
}

/// Callback sink the core reports protocol events to.
///
/// Mirrors the five function pointers in the original's initializer
/// struct (`ReceiveMessageCallback`, `BroadcastMessageCallback`,
/// `PingCallback`, `ConnectedCallback`, `SendFailedCallback`).
pub trait MeshHost: Send + Sync {
    /// A unicast message (or a bare acknowledgement, signaled by an empty
    /// `data`) arrived from a connected peer.
    fn on_message(&self, from: Mac, data: &[u8]);

    /// A broadcast message arrived from any peer, known or not.
    fn on_broadcast(&self, from: Mac, data: &[u8]);

    /// A ping response arrived from a peer we pinged.
    fn on_ping(&self, from: Mac, data: &[u8]);

    /// A session with `mac` changed state. `name` carries the peer's
    /// advertised ping data on a successful (re)connection.
    fn on_connected(&self, mac: Mac, name: Option<&[u8]>, outcome: ConnectOutcome);

    /// A pending unicast write to `mac` was abandoned after exhausting its
    /// retransmit budget.
    fn on_send_failed(&self, mac: Mac);
}

/// Raw 802.11 action-frame transmit, supplied by the host's radio stack.
#[async_trait]
pub trait RawRadio: Send + Sync {
    /// Transmits a complete action frame (header + payload) as-is.
    async fn transmit(&self, frame: &[u8]) -> Result<(), crate::error::WriteError>;
}

/// Cryptographically secure random source, standing in for the
/// original's `esp_random()` calls.
pub trait RandomSource: Send + Sync {
    fn next_u32(&self) -> u32;

    fn next_u64(&self) -> u64 {
        (self.next_u32() as u64) | ((self.next_u32() as u64) << 32)
    }
}
