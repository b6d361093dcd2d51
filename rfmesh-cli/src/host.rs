//! Demo [`MeshHost`] and [`RandomSource`] implementations: everything
//! just logs through `log`, and randomness rides on the `rand` crate
//! rather than `rfmesh-core` depending on one directly.

use log::info;

use rfmesh_core::host::{ConnectOutcome, RandomSource};
use rfmesh_core::{Mac, MeshHost};

pub struct LoggingHost {
    label: &'static str,
}

impl LoggingHost {
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }
}

impl MeshHost for LoggingHost {
    fn on_message(&self, from: Mac, data: &[u8]) {
        info!("[{}] message from {from}: {:?}", self.label, String::from_utf8_lossy(data));
    }

    fn on_broadcast(&self, from: Mac, data: &[u8]) {
        info!("[{}] broadcast from {from}: {:?}", self.label, String::from_utf8_lossy(data));
    }

    fn on_ping(&self, from: Mac, data: &[u8]) {
        info!("[{}] ping response from {from}: {} bytes", self.label, data.len());
    }

    fn on_connected(&self, mac: Mac, name: Option<&[u8]>, outcome: ConnectOutcome) {
        info!("[{}] connection state with {mac}: {outcome:?} (name={:?})", self.label, name.map(String::from_utf8_lossy));
    }

    fn on_send_failed(&self, mac: Mac) {
        info!("[{}] send to {mac} failed", self.label);
    }
}

/// Thin [`RandomSource`] wrapper over the `rand` crate's thread-local RNG.
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn next_u32(&self) -> u32 {
        rand::random()
    }

    fn next_u64(&self) -> u64 {
        rand::random()
    }
}
