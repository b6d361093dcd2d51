//! Non-volatile storage of known-peer reset state and the broadcast
//! sequence counter, abstracted behind a trait rather than tied to any
//! concrete key/value store -- the host application supplies the
//! implementation (flash-backed preferences, a file, a database row,
//! whatever fits its platform).

use async_trait::async_trait;

use rfmesh_crypto::lfsr::LfsrPair;

use crate::mac::Mac;

/// What gets persisted per known peer: just enough to resume a session
/// across a restart without re-running the full Diffie-Hellman handshake.
/// The reset LFSR's tap masks travel with it since a mask-less register
/// value alone isn't enough to resume keystream generation.
#[derive(Copy, Clone)]
pub struct PersistentRecord {
    pub mac: Mac,
    pub lfsr_reset: LfsrPair,
}

/// Host-supplied non-volatile storage.
///
/// Corresponds to the original's `Preferences`-backed `"mesh"` namespace:
/// an indexed list of peer records under a `count` key, plus a standalone
/// broadcast sequence counter.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Loads every previously persisted peer record, in no particular
    /// order.
    async fn load_peers(&self) -> Vec<PersistentRecord>;

    /// Persists (inserting or overwriting) one peer's record.
    async fn save_peer(&self, record: PersistentRecord);

    /// Removes a peer's record, if present.
    async fn delete_peer(&self, mac: &Mac);

    /// Loads the last persisted broadcast sequence ID, or 0 if none was
    /// ever saved.
    async fn load_broadcast_id(&self) -> u32;

    /// Persists the current broadcast sequence ID.
    async fn save_broadcast_id(&self, id: u32);

    /// Wipes all persisted state (peers and the broadcast counter).
    async fn clear(&self);
}
