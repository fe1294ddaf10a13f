pub mod bsc;
pub mod entity_trait;
pub mod messagerouter;
pub mod peer;

// Re-export commonly used items from router
pub use entity_trait::BscEntityTrait;
pub use messagerouter::{MessageQueue, MessageRouter};
