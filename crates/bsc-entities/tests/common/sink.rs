use bsc_core::bsc_entities::BscEntity;
use bsc_entities::{BscEntityTrait, MessageQueue};
use bsc_saps::SapMsg;

/// A BSC peer sink for testing purposes
/// Collects all received SapMsg messages for later inspection
pub struct Sink {
    component: BscEntity,
    msgqueue: Vec<SapMsg>,
}

impl Sink {
    pub fn new(component: BscEntity) -> Self {
        Self { component, msgqueue: vec![] }
    }

    pub fn take_msgqueue(&mut self) -> Vec<SapMsg> {
        std::mem::take(&mut self.msgqueue)
    }
}

impl BscEntityTrait for Sink {
    fn entity(&self) -> BscEntity {
        self.component
    }

    fn rx_prim(&mut self, _queue: &mut MessageQueue, message: SapMsg) {
        tracing::debug!("rx_prim: {:?} {}", message.src, message.msg);
        self.msgqueue.push(message);
    }
}
