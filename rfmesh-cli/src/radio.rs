//! In-memory loopback "radio": stands in for a real 802.11 monitor-mode
//! socket by calling straight into the peer node's ingress queue.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use rfmesh_core::host::RawRadio;
use rfmesh_core::WriteError;

type FrameSink = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[derive(Clone)]
pub struct LoopbackRadio(Arc<Mutex<Option<FrameSink>>>);

impl LoopbackRadio {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    /// Points this radio's transmits at the peer's frame intake. Set once,
    /// after both nodes in a pair exist, to break the construction cycle.
    pub fn set_peer(&self, sink: FrameSink) {
        *self.0.lock() = Some(sink);
    }
}

#[async_trait]
impl RawRadio for LoopbackRadio {
    async fn transmit(&self, frame: &[u8]) -> Result<(), WriteError> {
        if let Some(sink) = self.0.lock().clone() {
            sink(frame.to_vec());
        }
        Ok(())
    }
}
