//! Side effects produced by the otherwise-pure state machine in
//! [`crate::session`], [`crate::ingress`], and [`crate::retransmit`].
//!
//! Keeping the peer-table mutation logic free of actual I/O lets it run
//! entirely under one `parking_lot::Mutex` without holding that lock
//! across an `.await` -- the caller drains the returned effects and
//! performs them (radio transmits, host callbacks) after releasing it.

use crate::host::ConnectOutcome;
use crate::mac::Mac;

pub enum Effect {
    /// Transmit a complete, already-framed action frame.
    Transmit(Vec<u8>),

    /// Deliver a unicast message (or bare ack, if `data` is empty) to the host.
    DeliverMessage { from: Mac, data: Vec<u8> },

    /// Deliver a broadcast message to the host.
    DeliverBroadcast { from: Mac, data: Vec<u8> },

    /// Deliver a ping response to the host.
    DeliverPing { from: Mac, data: Vec<u8> },

    /// Report a connection state change to the host.
    Connected { mac: Mac, name: Option<Vec<u8>>, outcome: ConnectOutcome },

    /// Report a send failure to the host.
    SendFailed { mac: Mac },

    /// Persist (or refresh) a peer's reset record.
    PersistPeer(crate::persistence::PersistentRecord),

    /// Remove a peer's persisted record.
    ForgetPeer(Mac),

    /// Persist the current broadcast sequence counter.
    PersistBroadcastId(u32),
}
