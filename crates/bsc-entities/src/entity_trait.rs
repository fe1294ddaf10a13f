use crate::MessageQueue;
use as_any::AsAny;
use bsc_config::SharedConfig;
use bsc_core::{BscTime, bsc_entities::BscEntity};
use bsc_saps::SapMsg;

/// Trait for BSC entities
/// Used by MessageRouter for passing messages between entities
pub trait BscEntityTrait: Send + AsAny {
    /// Returns the entity type identifier
    fn entity(&self) -> BscEntity;

    /// Handle incoming SAP primitive
    fn rx_prim(&mut self, queue: &mut MessageQueue, message: SapMsg);

    /// Update configuration (optional)
    fn set_config(&mut self, _config: SharedConfig) {}

    /// Called at the start of each tick
    fn tick_start(&mut self, _queue: &mut MessageQueue, _now: BscTime) {}

    /// Called at the end of each tick
    fn tick_end(&mut self, _queue: &mut MessageQueue, _now: BscTime) -> bool {
        false
    }
}
