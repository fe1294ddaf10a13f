//! Peer entities: the BTS, MSC, media gateway and handover decision as seen from the
//! BSC core. Each peer is a message router entity that hands primitives to a worker
//! thread and feeds the worker's replies back into the router on every tick.

pub mod loopback;

use std::{marker::PhantomData, thread};

use crossbeam_channel::{Receiver, Sender, unbounded};
use thiserror::Error;

use bsc_config::SharedConfig;
use bsc_core::{BscTime, Sap, bsc_entities::BscEntity};
use bsc_saps::SapMsg;

use crate::{BscEntityTrait, MessageQueue};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker for {0:?} is gone")]
    WorkerGone(BscEntity),
}

/// Trait that all peer workers implement.
/// Workers run in a separate thread and may block on their transport.
pub trait PeerWorker: Send + 'static {
    /// Whatever the worker needs to reach its peer
    type Transport: Send + 'static;

    fn new(
        entity_self: BscEntity,
        entity_dest: BscEntity,
        sap: Sap,
        w2e_sender: Sender<SapMsg>,
        e2w_receiver: Receiver<SapMsg>,
        transport: Self::Transport,
    ) -> Self;

    /// Worker main loop, returns when the entity side hangs up
    fn run(&mut self);
}

/// Router entity standing in for a peer, generic over the worker that talks to it
pub struct PeerEntity<W: PeerWorker> {
    /// Entity this peer represents
    entity_self: BscEntity,
    sap: Sap,
    config: SharedConfig,
    e2w_sender: Sender<SapMsg>,
    w2e_receiver: Receiver<SapMsg>,
    _worker: PhantomData<W>,
}

impl<W: PeerWorker> PeerEntity<W> {
    /// Spawns the worker thread for a peer.
    ///
    /// # Arguments
    /// * `config` - Shared BSC configuration
    /// * `entity_self` - The entity this peer represents
    /// * `entity_dest` - The entity on the other end of our SAP, normally the BSC core
    /// * `sap` - The SAP we serve
    /// * `transport` - Transport handed to the worker
    pub fn new(
        config: SharedConfig,
        entity_self: BscEntity,
        entity_dest: BscEntity,
        sap: Sap,
        transport: W::Transport,
    ) -> Result<Self, PeerError> {
        let (e2w_sender, e2w_receiver) = unbounded::<SapMsg>();
        let (w2e_sender, w2e_receiver) = unbounded::<SapMsg>();

        thread::Builder::new().name(format!("peer-{:?}", entity_self).to_lowercase()).spawn(move || {
            let mut worker = W::new(entity_self, entity_dest, sap, w2e_sender, e2w_receiver, transport);
            worker.run();
        })?;

        Ok(Self { entity_self, sap, config, e2w_sender, w2e_receiver, _worker: PhantomData })
    }

    fn forward(&self, message: SapMsg) -> Result<(), PeerError> {
        self.e2w_sender.send(message).map_err(|_| PeerError::WorkerGone(self.entity_self))
    }
}

impl<W: PeerWorker> BscEntityTrait for PeerEntity<W> {
    fn entity(&self) -> BscEntity {
        self.entity_self
    }

    fn set_config(&mut self, config: SharedConfig) {
        self.config = config;
    }

    fn rx_prim(&mut self, _queue: &mut MessageQueue, message: SapMsg) {
        tracing::trace!("Peer{:?} {:?} rx {}", self.entity_self, self.sap, message.msg);
        if let Err(e) = self.forward(message) {
            tracing::error!("{}", e);
        }
    }

    fn tick_start(&mut self, queue: &mut MessageQueue, _now: BscTime) {
        while let Ok(response) = self.w2e_receiver.try_recv() {
            queue.push_back(response);
        }
    }
}
