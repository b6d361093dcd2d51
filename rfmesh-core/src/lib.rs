//! Session state machine, packet pipeline, and ingress dispatch for the
//! rfmesh protocol. Built on [`rfmesh_crypto`]'s primitives; depends on
//! nothing beyond the collaborator traits in [`host`] and [`persistence`]
//! for anything that touches the outside world.

pub mod config;
pub mod effect;
pub mod error;
pub mod handshake;
pub mod host;
pub mod ingress;
pub mod mac;
pub mod node;
pub mod packet;
pub mod peer;
pub mod persistence;
pub mod retransmit;
pub mod session;
pub mod state;

pub use config::MeshConfig;
pub use error::{InitError, WriteError};
pub use host::{ConnectOutcome, MeshHost, RandomSource, RawRadio};
pub use mac::Mac;
pub use node::MeshNode;
pub use persistence::PersistentStore;
