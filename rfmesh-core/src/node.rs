//! Public API: [`MeshNode`] ties the pure state machine in [`crate::session`],
//! [`crate::ingress`], and [`crate::retransmit`] to a host's radio,
//! storage, callback, and randomness implementations, and drives the two
//! background workers that keep the mesh alive without the caller
//! pumping anything by hand.
//!
//! Modeled on the original's `vl1service.rs`: one `Arc<Self>`, a
//! `parking_lot::Mutex` guarding everything mutable, and
//! `tokio::spawn`-based daemons whose `JoinHandle`s are stored so
//! `Drop` can abort them.

use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MeshConfig;
use crate::effect::Effect;
use crate::error::{InitError, WriteError};
use crate::host::{ConnectOutcome, MeshHost, RandomSource, RawRadio};
use crate::ingress::IngressQueue;
use crate::mac::Mac;
use crate::packet::{self, MessageType, MAX_PACKET_SIZE};
use crate::peer::{ConnectState, PendingWrite};
use crate::persistence::PersistentStore;
use crate::session;
use crate::state::CoreState;

/// A running mesh node: one local identity, its peer tables, and the two
/// background tasks that drain ingress and fire retransmits.
///
/// Generic over the four collaborator traits so a host can supply
/// whichever radio, storage, callback, and RNG implementations fit its
/// platform without this crate depending on any of them concretely.
pub struct MeshNode<H, R, P, Rng>
where
    H: MeshHost + 'static,
    R: RawRadio + 'static,
    P: PersistentStore + 'static,
    Rng: RandomSource + 'static,
{
    state: Arc<Mutex<CoreState>>,
    host: Arc<H>,
    radio: Arc<R>,
    store: Arc<P>,
    rng: Arc<Rng>,
    ingress: Arc<Mutex<IngressQueue>>,
    ingress_notify: mpsc::UnboundedSender<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<H, R, P, Rng> MeshNode<H, R, P, Rng>
where
    H: MeshHost + 'static,
    R: RawRadio + 'static,
    P: PersistentStore + 'static,
    Rng: RandomSource + 'static,
{
    /// Brings up a node: validates `config`, restores any persisted peer
    /// records, and spawns the ingress and retransmit background workers.
    /// The returned node must be kept alive (or its `Arc` clones must be)
    /// for those workers to keep running.
    pub async fn new(mac: Mac, config: MeshConfig, host: H, radio: R, store: P, rng: Rng) -> Result<Arc<Self>, InitError> {
        config.validate()?;

        let broadcast_seed = rfmesh_crypto::broadcast::broadcast_seed(
            config.broadcast_lfsr[0],
            config.broadcast_lfsr[1],
            rfmesh_crypto::mask::pack_broadcast_mask(config.broadcast_mask1),
            rfmesh_crypto::mask::pack_broadcast_mask(config.broadcast_mask2),
        );
        let broadcast_msg_id = store.load_broadcast_id().await;

        let mut state = CoreState::new(mac, config, broadcast_seed, broadcast_msg_id);
        for record in store.load_peers().await {
            state.restore_peer(record);
        }

        let (ingress_notify, mut ingress_wake) = mpsc::unbounded_channel();

        let node = Arc::new(Self {
            state: Arc::new(Mutex::new(state)),
            host: Arc::new(host),
            radio: Arc::new(radio),
            store: Arc::new(store),
            rng: Arc::new(rng),
            ingress: Arc::new(Mutex::new(IngressQueue::new())),
            ingress_notify,
            workers: Mutex::new(Vec::new()),
        });

        let ingress_task = {
            let node = node.clone();
            tokio::spawn(async move {
                loop {
                    if ingress_wake.recv().await.is_none() {
                        return;
                    }
                    node.drain_ingress().await;
                }
            })
        };

        let retransmit_task = {
            let node = node.clone();
            tokio::spawn(async move {
                loop {
                    let interval = node.state.lock().config.retransmit_tick_interval_ms;
                    tokio::time::sleep(std::time::Duration::from_millis(interval)).await;
                    node.run_retransmit_tick().await;
                }
            })
        };

        node.workers.lock().extend([ingress_task, retransmit_task]);
        info!("rfmesh node {mac} started");
        Ok(node)
    }

    /// Feeds one raw 802.11 action frame in from the radio. Queues it for
    /// the ingress worker and wakes it; never blocks on processing.
    pub fn on_frame_received(&self, frame: Vec<u8>) {
        self.ingress.lock().push(frame);
        let _ = self.ingress_notify.send(());
    }

    async fn drain_ingress(&self) {
        loop {
            let Some(queued) = self.ingress.lock().pop() else {
                return;
            };
            let effects = {
                let mut state = self.state.lock();
                crate::ingress::handle_frame(&mut state, self.rng.as_ref(), &queued.frame, queued.duplicate_count)
            };
            self.perform(effects).await;
        }
    }

    async fn run_retransmit_tick(&self) {
        let effects = {
            let mut state = self.state.lock();
            crate::retransmit::tick(&mut state)
        };
        self.perform(effects).await;
    }

    async fn perform(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Transmit(frame) => {
                    if let Err(e) = self.radio.transmit(&frame).await {
                        warn!("transmit failed: {e}");
                    }
                }
                Effect::DeliverMessage { from, data } => self.host.on_message(from, &data),
                Effect::DeliverBroadcast { from, data } => self.host.on_broadcast(from, &data),
                Effect::DeliverPing { from, data } => self.host.on_ping(from, &data),
                Effect::Connected { mac, name, outcome } => self.host.on_connected(mac, name.as_deref(), outcome),
                Effect::SendFailed { mac } => self.host.on_send_failed(mac),
                Effect::PersistPeer(record) => self.store.save_peer(record).await,
                Effect::ForgetPeer(mac) => self.store.delete_peer(&mac).await,
                Effect::PersistBroadcastId(id) => self.store.save_broadcast_id(id).await,
            }
        }
    }

    /// Queues `data` for delivery to `target`, which must already be a
    /// known peer with no other write in flight. Actual transmission
    /// happens (and retries, if needed) via the retransmit worker.
    ///
    /// A peer in `Reset` has no live session to encrypt under, so the
    /// write is stashed and a rekey is kicked off instead; the caller
    /// still sees `ResettingConnection` and the write goes out for real
    /// once the rekey handshake completes.
    pub async fn write(&self, target: Mac, data: &[u8]) -> Result<(), WriteError> {
        if data.len() + crate::packet::FrameHeader::SIZE + 9 > MAX_PACKET_SIZE {
            return Err(WriteError::DataTooLarge);
        }

        enum Outcome {
            Sent(Vec<Effect>),
            Resetting(Vec<Effect>),
        }

        let outcome = {
            let mut state = self.state.lock();
            let Some(peer) = state.known.get_mut(&target) else {
                return Err(WriteError::DeviceDoesNotExist(target));
            };
            match peer.state {
                ConnectState::Connecting | ConnectState::ResetConnecting => return Err(WriteError::DeviceDoesNotExist(target)),
                ConnectState::Reset => {
                    if peer.pending_write.is_some() {
                        return Err(WriteError::PreviousWriteNotComplete(target));
                    }
                    let snapshot = peer.lfsr_out;
                    peer.pending_write = Some(PendingWrite {
                        plaintext: data.to_vec(),
                        msg_type: MessageType::Message,
                        sequence_id: 0,
                        lfsr_out_snapshot: snapshot,
                        check_count: 0,
                        awaiting_session: true,
                    });
                    let rekey_effects = match session::connect(&mut state, self.rng.as_ref(), target) {
                        Ok(effects) => effects,
                        Err(_) => Vec::new(),
                    };
                    Outcome::Resetting(rekey_effects)
                }
                ConnectState::Connected => {
                    if peer.pending_write.is_some() {
                        return Err(WriteError::PreviousWriteNotComplete(target));
                    }
                    let sequence_id = peer.id_out;
                    let snapshot = peer.lfsr_out;
                    let mut lfsr_out = snapshot;
                    let Some(packet) = packet::build_packet(sequence_id, data, &mut lfsr_out) else {
                        return Err(WriteError::OutOfMemory);
                    };
                    peer.lfsr_out_prev = peer.lfsr_out;
                    peer.lfsr_out = lfsr_out;
                    peer.id_out += 1;
                    peer.pending_write = Some(PendingWrite {
                        plaintext: data.to_vec(),
                        msg_type: MessageType::Message,
                        sequence_id,
                        lfsr_out_snapshot: snapshot,
                        check_count: 0,
                        awaiting_session: false,
                    });
                    let effect = crate::state::frame_effect(state.mac, target, MessageType::Message, &packet);
                    Outcome::Sent(effect.into_iter().collect())
                }
            }
        };

        match outcome {
            Outcome::Sent(effects) => {
                self.perform(effects).await;
                Ok(())
            }
            Outcome::Resetting(effects) => {
                self.perform(effects).await;
                Err(WriteError::ResettingConnection(target))
            }
        }
    }

    /// Sends `data` to every peer on the mesh, known or not.
    pub async fn write_broadcast(&self, data: &[u8]) -> Result<(), WriteError> {
        if data.len() + crate::packet::FrameHeader::SIZE + 9 > MAX_PACKET_SIZE {
            return Err(WriteError::DataTooLarge);
        }

        let (frame, persist_id) = {
            let mut state = self.state.lock();
            let sequence_id = state.broadcast_msg_id;
            let mut lfsr = rfmesh_crypto::broadcast::permute_broadcast_lfsr(&state.broadcast_seed, state.mac.as_bytes(), sequence_id);
            let Some(packet) = packet::build_packet(sequence_id, data, &mut lfsr) else {
                return Err(WriteError::OutOfMemory);
            };
            state.broadcast_msg_id = sequence_id.wrapping_add(1);
            let header = crate::packet::FrameHeader {
                frame_control: crate::packet::ACTION_FRAME_CONTROL,
                receiver: Mac::BROADCAST,
                sender: state.mac,
                message_type: MessageType::Message as u8,
            };
            let mut frame = Vec::with_capacity(crate::packet::FrameHeader::SIZE + packet.len());
            frame.extend_from_slice(&header.to_bytes());
            frame.extend_from_slice(&packet);
            (frame, state.broadcast_msg_id)
        };

        if let Err(e) = self.radio.transmit(&frame).await {
            warn!("broadcast transmit failed: {e}");
            return Err(WriteError::TransmitFailed);
        }
        self.store.save_broadcast_id(persist_id).await;
        Ok(())
    }

    /// Pings `target`, delivering any response through
    /// [`MeshHost::on_ping`] rather than blocking for it here.
    pub async fn ping(&self, target: Mac, data: &[u8]) -> Result<(), WriteError> {
        self.write_as(target, data, MessageType::Ping).await
    }

    async fn write_as(&self, target: Mac, data: &[u8], msg_type: MessageType) -> Result<(), WriteError> {
        let effect = {
            let mut state = self.state.lock();
            let Some(peer) = state.known.get_mut(&target) else {
                return Err(WriteError::DeviceDoesNotExist(target));
            };
            if peer.state != ConnectState::Connected {
                return Err(WriteError::DeviceDoesNotExist(target));
            }
            let sequence_id = peer.id_out;
            let mut lfsr_out = peer.lfsr_out;
            let Some(packet) = packet::build_packet(sequence_id, data, &mut lfsr_out) else {
                return Err(WriteError::OutOfMemory);
            };
            peer.lfsr_out_prev = peer.lfsr_out;
            peer.lfsr_out = lfsr_out;
            peer.id_out += 1;
            crate::state::frame_effect(state.mac, target, msg_type, &packet)
        };
        if let Some(effect) = effect {
            self.perform(vec![effect]).await;
        }
        Ok(())
    }

    /// Initiates (or rekeys) a session with `target`.
    pub async fn connect(&self, target: Mac) -> Result<(), crate::error::SessionError> {
        let effects = {
            let mut state = self.state.lock();
            session::connect(&mut state, self.rng.as_ref(), target)?
        };
        self.perform(effects).await;
        Ok(())
    }

    /// Starts a graceful disconnect from `target`.
    pub async fn disconnect(&self, target: Mac) -> Result<(), crate::error::SessionError> {
        let effects = {
            let mut state = self.state.lock();
            session::disconnect(&mut state, target)?
        };
        self.perform(effects).await;
        Ok(())
    }

    /// Tears a session down immediately, without notifying the peer.
    pub async fn force_disconnect(&self, target: Mac) -> Result<(), crate::error::SessionError> {
        let effects = {
            let mut state = self.state.lock();
            session::force_disconnect(&mut state, target)?
        };
        self.perform(effects).await;
        Ok(())
    }

    pub fn is_device_known(&self, target: Mac) -> bool {
        self.state.lock().known.contains(&target)
    }

    pub fn connected_devices(&self) -> Vec<Mac> {
        self.state.lock().known.iter().filter(|p| p.state == ConnectState::Connected).map(|p| p.mac).collect()
    }

    pub fn mac(&self) -> Mac {
        self.state.lock().mac
    }

    /// Sets the name/ping data this node advertises in future handshakes
    /// and `Connected` confirmations.
    pub fn set_ping_data(&self, data: Vec<u8>) {
        self.state.lock().ping_data = data;
    }

    /// Forgets every known peer without notifying any of them, and wipes
    /// the persisted reset state -- equivalent to a factory reset of the
    /// mesh identity's peer relationships, though the identity (MAC) and
    /// Diffie-Hellman parameters are unaffected.
    pub async fn reset_connection_data(&self) {
        let targets: Vec<Mac> = {
            let mut state = self.state.lock();
            let targets = state.known.iter().map(|p| p.mac).collect::<Vec<_>>();
            for mac in &targets {
                state.known.remove(mac);
            }
            targets
        };
        self.store.clear().await;
        for mac in targets {
            self.host.on_connected(mac, None, ConnectOutcome::Disconnected);
        }
    }
}

impl<H, R, P, Rng> Drop for MeshNode<H, R, P, Rng>
where
    H: MeshHost + 'static,
    R: RawRadio + 'static,
    P: PersistentStore + 'static,
    Rng: RandomSource + 'static,
{
    fn drop(&mut self) {
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
    }
}
