use bsc_config::SharedConfig;
use bsc_core::bsc_entities::BscEntity;
use bsc_core::{BscTime, Sap};
use bsc_saps::bssap::{BssapPaging, BssapReset, BssapResetAck};
use bsc_saps::{SapMsg, SapMsgInner};

use crate::bsc::components::paging::PagedSubscriber;
use crate::bsc::components::policy::{CodecPolicy, DefaultCodecPolicy, DefaultHandoverDecision, HandoverDecision};
use crate::bsc::context::BscContext;
use crate::bsc::subentities::conn::ConnMgr;
use crate::{BscEntityTrait, MessageQueue};

/// The BSC signaling core. Owns the radio resources, the connections and their
/// procedures, the MSC pool and the paging coordinator.
pub struct BscCore {
    config: SharedConfig,
    pub ctx: BscContext,
    pub conns: ConnMgr,
    /// BSSMAP Reset sent to the MSCs after startup
    reset_sent: bool,
}

impl BscCore {
    pub fn new(config: SharedConfig) -> Self {
        Self::with_policies(config, Box::new(DefaultCodecPolicy), Box::new(DefaultHandoverDecision))
    }

    pub fn with_policies(
        config: SharedConfig,
        codec_policy: Box<dyn CodecPolicy>,
        hodec: Box<dyn HandoverDecision>,
    ) -> Self {
        Self {
            ctx: BscContext::new(config.clone(), codec_policy, hodec),
            conns: ConnMgr::new(),
            config,
            reset_sent: false,
        }
    }

    /// Hands lchan events to the connections owning the lchans
    fn drain_notify(&mut self, queue: &mut MessageQueue) {
        while let Some(n) = self.ctx.net.pop_notify() {
            self.conns.rx_lchan_notify(&mut self.ctx, queue, n);
        }
        self.conns.reap(&self.ctx);
    }

    fn rx_abis(&mut self, queue: &mut MessageQueue, message: SapMsg) {
        let net = &mut self.ctx.net;
        match message.msg {
            SapMsgInner::AbisTrxReady(prim) => {
                tracing::info!("trx {}-{} ready", prim.bts, prim.trx);
                net.ts_trx_ready(queue, prim.bts, prim.trx);
            }
            SapMsgInner::AbisTrxDown(prim) => {
                tracing::warn!("trx {}-{} down", prim.bts, prim.trx);
                net.ts_trx_down(prim.bts, prim.trx);
                if net.bts(prim.bts).is_some_and(|b| b.trx.iter().all(|t| t.ts.iter().all(|ts| !ts.is_rsl_ready))) {
                    self.ctx.paging.flush_bts(prim.bts);
                }
            }
            SapMsgInner::AbisChanActivAck(prim) => net.rx_chan_activ_ack(queue, prim.lchan),
            SapMsgInner::AbisChanActivNack(prim) => net.rx_chan_activ_nack(queue, prim.lchan, prim.cause),
            SapMsgInner::AbisRfChanRelAck(prim) => net.rx_rf_chan_rel_ack(queue, prim.lchan),
            SapMsgInner::AbisModeModifyAck(prim) => net.rx_mode_modify_ack(queue, prim.lchan),
            SapMsgInner::AbisModeModifyNack(prim) => net.rx_mode_modify_nack(queue, prim.lchan, prim.cause),
            SapMsgInner::AbisPchanSwitchAck(prim) => net.rx_pchan_switch_ack(queue, prim.ts),
            SapMsgInner::AbisPchanSwitchNack(prim) => {
                tracing::warn!("{}: pchan switch rejected ({:?})", prim.ts, prim.cause);
                net.rx_pchan_switch_nack(queue, prim.ts);
            }
            SapMsgInner::AbisEstablishInd(prim) => net.rx_establish_ind(prim.lchan, prim.l3),
            SapMsgInner::AbisConnFailInd(prim) => net.rx_conn_fail(queue, prim.lchan, prim.cause),
            SapMsgInner::AbisChanRqd(prim) => self.conns.rx_chan_rqd(&mut self.ctx, queue, &prim),
            SapMsgInner::AbisDataInd(prim) => self.conns.rx_data_ind(&mut self.ctx, queue, prim.lchan, prim.l3),
            SapMsgInner::AbisHandoverDetect(prim) => self.conns.rx_handover_detect(&mut self.ctx, queue, prim.lchan),
            SapMsgInner::AbisMeasRes(prim) => {
                if let Some(conn) = net.rx_meas_res(prim.lchan, prim.rep) {
                    self.conns.rx_meas(&mut self.ctx, queue, conn, prim.lchan);
                }
            }
            other => tracing::warn!("rx_abis: unexpected {}", other),
        }
    }

    fn rx_bssap(&mut self, queue: &mut MessageQueue, message: SapMsg) {
        match message.msg {
            SapMsgInner::BssapReset(prim) => {
                tracing::info!("MSC {} reset", prim.msc);
                self.msc_gone(queue, prim.msc);
                self.ctx.send_msc(queue, SapMsgInner::BssapResetAck(BssapResetAck { msc: prim.msc }));
                self.ctx.msc_pool.set_reset_done(prim.msc, true);
            }
            SapMsgInner::BssapResetAck(prim) => self.ctx.msc_pool.set_reset_done(prim.msc, true),
            SapMsgInner::BssapLinkDown(prim) => {
                tracing::warn!("MSC {} link down", prim.msc);
                self.ctx.msc_pool.set_reset_done(prim.msc, false);
                self.msc_gone(queue, prim.msc);
            }
            SapMsgInner::BssapPaging(prim) => self.rx_paging(queue, prim),
            msg => self.conns.rx_bssap(&mut self.ctx, queue, msg),
        }
    }

    /// Drops everything belonging to an MSC
    fn msc_gone(&mut self, queue: &mut MessageQueue, msc: u8) {
        let n = self.conns.msc_lost(&mut self.ctx, queue, msc);
        if n > 0 {
            tracing::info!("released {} connection(s) of MSC {}", n, msc);
        }
        self.ctx.paging.flush_msc(msc);
    }

    fn rx_paging(&mut self, queue: &mut MessageQueue, prim: BssapPaging) {
        let bts_list: Vec<u8> = if prim.cells.is_empty() {
            self.ctx.net.bts.iter().map(|b| b.nr).collect()
        } else {
            prim.cells.iter().filter_map(|c| self.ctx.net.bts_by_cell(*c).map(|b| b.nr)).collect()
        };
        if bts_list.is_empty() {
            tracing::warn!("paging IMSI-{}: no BTS serves {:?}", prim.imsi, prim.cells);
            return;
        }
        let subscriber = PagedSubscriber { imsi: prim.imsi, tmsi: prim.tmsi };
        for bts in bts_list {
            self.ctx.paging.start(queue, self.ctx.now, bts, subscriber.clone(), prim.msc, prim.chan_needed);
        }
    }

    fn rx_control(&mut self, queue: &mut MessageQueue, message: SapMsg) {
        match message.msg {
            SapMsgInner::ControlHandoverStart(prim) => {
                self.conns.start_handover(&mut self.ctx, queue, prim.conn, prim.target);
            }
            SapMsgInner::ControlLchanReset(prim) => {
                if let Err(e) = self.ctx.net.lchan_reset(queue, prim.lchan) {
                    tracing::warn!("lchan reset: {}", e);
                }
            }
            other => bsc_core::unimplemented_log!("rx_control: {}", other),
        }
    }
}

impl BscEntityTrait for BscCore {
    fn entity(&self) -> BscEntity {
        BscEntity::Bsc
    }

    fn set_config(&mut self, config: SharedConfig) {
        self.config = config;
    }

    fn rx_prim(&mut self, queue: &mut MessageQueue, message: SapMsg) {
        tracing::debug!("rx_prim: {:?} {} from {:?}", message.sap, message.msg, message.src);

        match message.sap {
            Sap::AbisSap => self.rx_abis(queue, message),
            Sap::MgcpSap => self.conns.rx_mgcp(&mut self.ctx, queue, message.msg),
            Sap::ASap => self.rx_bssap(queue, message),
            Sap::Control => self.rx_control(queue, message),
        }
        self.drain_notify(queue);
    }

    fn tick_start(&mut self, queue: &mut MessageQueue, now: BscTime) {
        if !self.reset_sent {
            self.reset_sent = true;
            for nr in self.ctx.msc_pool.links().iter().map(|l| l.nr).collect::<Vec<_>>() {
                tracing::info!("sending Reset to MSC {}", nr);
                self.ctx.send_msc(queue, SapMsgInner::BssapReset(BssapReset { msc: nr }));
            }
        }

        self.ctx.set_time(now);
        self.ctx.net.lchan_tick();
        self.ctx.net.ts_tick();
        self.drain_notify(queue);

        self.conns.tick(&mut self.ctx, queue);
        self.ctx.paging.tick(queue, now);
        self.drain_notify(queue);

        if let Err(e) = self.conns.check_ownership(&self.ctx.net) {
            tracing::error!("lchan ownership violated: {}", e);
        }
    }
}
