//! In-memory [`PersistentStore`]: a demo stand-in for flash/file-backed
//! peer persistence, scoped to one process's lifetime.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use rfmesh_core::persistence::PersistentRecord;
use rfmesh_core::{Mac, PersistentStore};

#[derive(Default)]
pub struct MemoryStore {
    peers: Mutex<HashMap<Mac, PersistentRecord>>,
    broadcast_id: Mutex<u32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load_peers(&self) -> Vec<PersistentRecord> {
        self.peers.lock().values().copied().collect()
    }

    async fn save_peer(&self, record: PersistentRecord) {
        self.peers.lock().insert(record.mac, record);
    }

    async fn delete_peer(&self, mac: &Mac) {
        self.peers.lock().remove(mac);
    }

    async fn load_broadcast_id(&self) -> u32 {
        *self.broadcast_id.lock()
    }

    async fn save_broadcast_id(&self, id: u32) {
        *self.broadcast_id.lock() = id;
    }

    async fn clear(&self) {
        self.peers.lock().clear();
        *self.broadcast_id.lock() = 0;
    }
}
