use std::sync::Arc;

use bsc_config::{BscConfig, CfgBts, SharedConfig};
use bsc_core::{BscCounter, BscTime, Sap, bsc_entities::BscEntity};
use bsc_saps::SapMsgInner;

use crate::MessageQueue;
use crate::bsc::components::msc_pool::MscPool;
use crate::bsc::components::network::Network;
use crate::bsc::components::paging::PagingMgr;
use crate::bsc::components::policy::{CodecPolicy, HandoverDecision};
use crate::bsc::components::send_prim;

/// Everything a connection and its procedures may touch, besides other connections
pub struct BscContext {
    pub config: SharedConfig,
    pub cfg: Arc<BscConfig>,
    pub now: BscTime,
    pub net: Network,
    pub msc_pool: MscPool,
    pub paging: PagingMgr,
    pub codec_policy: Box<dyn CodecPolicy>,
    pub hodec: Box<dyn HandoverDecision>,
}

impl BscContext {
    pub fn new(config: SharedConfig, codec_policy: Box<dyn CodecPolicy>, hodec: Box<dyn HandoverDecision>) -> Self {
        Self {
            cfg: config.config(),
            now: BscTime::default(),
            net: Network::new(config.clone()),
            msc_pool: MscPool::new(&config),
            paging: PagingMgr::new(config.clone()),
            codec_policy,
            hodec,
            config,
        }
    }

    pub fn set_time(&mut self, now: BscTime) {
        self.now = now;
        self.net.set_time(now);
    }

    pub fn count(&self, ctr: BscCounter) {
        self.config.state_write().counters.inc(ctr);
    }

    /// Deadline `ms` from now
    pub fn deadline(&self, ms: u64) -> BscTime {
        self.now.add_ms(ms)
    }

    pub fn bts_cfg(&self, nr: u8) -> Option<&CfgBts> {
        self.cfg.bts.iter().find(|b| b.nr == nr)
    }

    pub fn send_bts(&self, queue: &mut MessageQueue, msg: SapMsgInner) {
        send_prim(queue, self.now, Sap::AbisSap, BscEntity::Bts, msg);
    }

    pub fn send_msc(&self, queue: &mut MessageQueue, msg: SapMsgInner) {
        send_prim(queue, self.now, Sap::ASap, BscEntity::Msc, msg);
    }

    pub fn send_mgw(&self, queue: &mut MessageQueue, msg: SapMsgInner) {
        send_prim(queue, self.now, Sap::MgcpSap, BscEntity::Mgw, msg);
    }

    pub fn send_hodec(&self, queue: &mut MessageQueue, msg: SapMsgInner) {
        send_prim(queue, self.now, Sap::Control, BscEntity::Hodec, msg);
    }
}
