use bsc_core::{BscTime, Sap, bsc_entities::BscEntity};
use bsc_saps::{SapMsg, SapMsgInner};

use crate::MessageQueue;

pub mod lchan_fsm;
pub mod lchan_select;
pub mod msc_pool;
pub mod network;
pub mod paging;
pub mod policy;
pub mod ts_fsm;

/// Queue a primitive from the BSC core towards one of its peers
pub fn send_prim(queue: &mut MessageQueue, now: BscTime, sap: Sap, dest: BscEntity, msg: SapMsgInner) {
    tracing::debug!(now = ?now, "-> {:?} {:?}", dest, msg);
    queue.push_back(SapMsg::new(sap, BscEntity::Bsc, dest, now, msg));
}
