//! Subscriber connections.
//!
//! A connection starts with a channel request from the MS, is routed to an MSC by its
//! initial L3 message and lives until the MSC clears it. It owns its lchans (current and,
//! while a procedure runs, a candidate), its media gateway endpoint and at most one
//! Assignment or Handover procedure at a time.

use std::collections::{HashMap, VecDeque};

use bsc_core::{
    BscCounter, BscTime, CellId, ChanMode, ChannelModeAndRate, ChannelRate, ConnId, EncryptionInfo, EndpointId, CONN_NONE,
    LchanId, LchanType, MobileIdentity, MscNr,
};
use bsc_saps::SapMsgInner;
use bsc_saps::abis::{AbisChanRqd, AbisDataReq, AbisImmAssignCmd, ActivType, ChreqReason};
use bsc_saps::bssap::*;
use bsc_saps::control::HandoverScope;
use bsc_saps::l3::{Classmark, L3Msg};
use bsc_saps::mgcp::MgcpEndpointRelease;

use crate::MessageQueue;
use crate::bsc::components::lchan_fsm::{LchanFailCause, LchanNotify};
use crate::bsc::components::network::{LchanActivateInfo, Network};
use crate::bsc::context::BscContext;
use crate::bsc::subentities::assignment_fsm::AssignmentFsm;
use crate::bsc::subentities::handover_fsm::{HandoverFsm, HoState};
use crate::bsc::subentities::procedure::{ConnProcedure, ProcEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Signalling lchan being activated
    Init,
    /// Immediate Assignment sent, waiting for the initial L3 message
    WaitInitialUserData,
    Active,
    /// Clear Request sent to the MSC
    WaitClearCommand,
    Released,
}

impl ConnState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnState::Init => "init",
            ConnState::WaitInitialUserData => "wait_initial_user_data",
            ConnState::Active => "active",
            ConnState::WaitClearCommand => "wait_clear_command",
            ConnState::Released => "released",
        }
    }
}

/// Downlink messages held back while a procedure runs
#[derive(Debug)]
pub enum DownlinkMsg {
    Dtap(L3Msg),
    CipherModeCommand(EncryptionInfo),
}

pub struct Conn {
    pub id: ConnId,
    pub state: ConnState,
    /// BTS serving the current lchan
    pub bts: u8,
    /// Random access reference of the channel request
    pub chreq_ra: u8,
    pub lchan: Option<LchanId>,
    pub msc: Option<MscNr>,
    pub ch_mode_rate: Option<ChannelModeAndRate>,
    pub endpoint: Option<EndpointId>,
    pub encr: EncryptionInfo,
    pub ciphering_pending: bool,
    pub classmark: Option<Classmark>,
    pub ms_power_class: Option<u8>,
    pub subscriber: Option<MobileIdentity>,
    pub emergency: bool,
    pub dl_queue: VecDeque<DownlinkMsg>,
    pub procedure: ConnProcedure,
    /// T3101 in the initial states, clear supervision in WAIT_CLEAR_COMMAND
    pub deadline: Option<BscTime>,
}

impl Conn {
    pub fn new(id: ConnId, bts: u8) -> Self {
        Self {
            id,
            state: ConnState::Init,
            bts,
            chreq_ra: 0,
            lchan: None,
            msc: None,
            ch_mode_rate: None,
            endpoint: None,
            encr: EncryptionInfo::none(),
            ciphering_pending: false,
            classmark: None,
            ms_power_class: None,
            subscriber: None,
            emergency: false,
            dl_queue: VecDeque::new(),
            procedure: ConnProcedure::None,
            deadline: None,
        }
    }

    pub fn cell(&self, ctx: &BscContext) -> Option<CellId> {
        ctx.bts_cfg(self.bts).map(|b| b.cell)
    }

    pub(crate) fn set_state(&mut self, state: ConnState) {
        if self.state != state {
            tracing::debug!("conn {}: {} -> {}", self.id, self.state.name(), state.name());
            self.state = state;
        }
    }

    /// Sends a BSSAP message for this connection, if it has an MSC
    pub(crate) fn tx_msc(
        &self,
        ctx: &BscContext,
        queue: &mut MessageQueue,
        f: impl FnOnce(ConnId, MscNr) -> SapMsgInner,
    ) {
        match self.msc {
            Some(msc) => ctx.send_msc(queue, f(self.id, msc)),
            None => tracing::warn!("conn {}: no MSC, message dropped", self.id),
        }
    }

    pub(crate) fn tx_rr(&self, ctx: &BscContext, queue: &mut MessageQueue, lchan: LchanId, l3: L3Msg) {
        ctx.send_bts(queue, SapMsgInner::AbisDataReq(AbisDataReq { lchan, l3 }));
    }

    pub(crate) fn release_lchan(&self, ctx: &mut BscContext, queue: &mut MessageQueue, lchan: LchanId) {
        if let Err(e) = ctx.net.lchan_release(queue, lchan, self.id) {
            tracing::warn!("conn {}: {}", self.id, e);
        }
    }

    pub(crate) fn release_endpoint(&self, ctx: &BscContext, queue: &mut MessageQueue, endpoint: EndpointId) {
        ctx.send_mgw(queue, SapMsgInner::MgcpEndpointRelease(MgcpEndpointRelease { endpoint }));
    }

    /// Drops the lchan and the media gateway endpoint of this connection
    fn release_resources(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue) {
        if let Some(lchan) = self.lchan.take() {
            self.release_lchan(ctx, queue, lchan);
        }
        if let Some(endpoint) = self.endpoint.take() {
            self.release_endpoint(ctx, queue, endpoint);
        }
    }

    /// Feeds an event to the running procedure
    pub fn dispatch(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, ev: ProcEvent) {
        let procedure = std::mem::take(&mut self.procedure);
        self.procedure = match procedure {
            ConnProcedure::None => {
                tracing::debug!("conn {}: no procedure for {:?}", self.id, ev);
                return;
            }
            ConnProcedure::Assignment(a) => a.handle(ctx, queue, self, ev),
            ConnProcedure::Handover(h) => h.handle(ctx, queue, self, ev),
        };
        if self.procedure.is_none() {
            self.procedure_ended(ctx, queue);
        }
    }

    /// Starts a procedure, its immediate outcome may already end it
    pub(crate) fn set_procedure(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, p: ConnProcedure) {
        bsc_core::assert_warn!(self.procedure.is_none(), "conn {}: {} still running", self.id, self.procedure.name());
        self.procedure = p;
        if self.procedure.is_none() {
            self.procedure_ended(ctx, queue);
        }
    }

    fn procedure_ended(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue) {
        if self.state != ConnState::Active || self.lchan.is_none() {
            self.dl_queue.clear();
            return;
        }
        if !self.dl_queue.is_empty() {
            tracing::debug!("conn {}: sending {} queued downlink message(s)", self.id, self.dl_queue.len());
        }
        while let Some(msg) = self.dl_queue.pop_front() {
            match msg {
                DownlinkMsg::Dtap(l3) => self.rx_dtap_dl(ctx, queue, l3),
                DownlinkMsg::CipherModeCommand(encr) => self.rx_cipher_mode_command(ctx, queue, encr),
            }
        }
    }

    fn queue_dl(&mut self, ctx: &BscContext, msg: DownlinkMsg) {
        if self.dl_queue.len() >= ctx.cfg.dtap_queue_max {
            tracing::warn!("conn {}: downlink queue full, dropping {:?}", self.id, msg);
            return;
        }
        tracing::debug!("conn {}: {} in progress, queueing {:?}", self.id, self.procedure.name(), msg);
        self.dl_queue.push_back(msg);
    }

    // ---------------- Lchan events ----------------

    pub fn rx_lchan_notify(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, n: LchanNotify) {
        match n {
            LchanNotify::Active { lchan, .. } => {
                if self.state == ConnState::Init && self.lchan == Some(lchan) {
                    tracing::info!("conn {}: {} active, sending Immediate Assignment", self.id, lchan);
                    ctx.send_bts(
                        queue,
                        SapMsgInner::AbisImmAssignCmd(AbisImmAssignCmd {
                            bts: self.bts,
                            ra: self.chreq_ra,
                            lchan: Some(lchan),
                        }),
                    );
                    self.set_state(ConnState::WaitInitialUserData);
                    self.deadline = Some(ctx.deadline(ctx.cfg.timers.t3101_ms));
                } else {
                    self.dispatch(ctx, queue, ProcEvent::LchanActive(lchan));
                }
            }
            LchanNotify::ActivationFailed { lchan, cause, .. } => {
                if self.state == ConnState::Init && self.lchan == Some(lchan) {
                    tracing::warn!("conn {}: signalling {} failed ({:?})", self.id, lchan, cause);
                    ctx.send_bts(
                        queue,
                        SapMsgInner::AbisImmAssignCmd(AbisImmAssignCmd { bts: self.bts, ra: self.chreq_ra, lchan: None }),
                    );
                    self.lchan = None;
                    self.set_state(ConnState::Released);
                } else {
                    self.dispatch(ctx, queue, ProcEvent::LchanError(lchan, cause));
                }
            }
            LchanNotify::Established { lchan, l3, .. } => {
                if self.state == ConnState::WaitInitialUserData && self.lchan == Some(lchan) {
                    match l3 {
                        Some(l3) => self.complete_l3(ctx, queue, l3),
                        None => tracing::debug!("conn {}: link established without L3 info", self.id),
                    }
                    return;
                }
                if self.procedure.candidate() == Some(lchan) {
                    self.dispatch(ctx, queue, ProcEvent::LchanEstablished(lchan));
                }
                if let Some(l3) = l3 {
                    self.rx_l3(ctx, queue, lchan, l3);
                }
            }
            LchanNotify::Failure { lchan, cause, .. } => {
                if self.lchan == Some(lchan) {
                    self.current_lchan_lost(ctx, queue, lchan, cause);
                } else {
                    self.dispatch(ctx, queue, ProcEvent::LchanError(lchan, cause));
                }
            }
            LchanNotify::Modified { lchan, .. } => {
                if self.procedure.is_none() && self.lchan == Some(lchan) {
                    // Late ACK after the procedure gave up, the lchan runs the new mode anyway
                    self.ch_mode_rate = ctx.net.lchan(lchan).and_then(|l| l.ch_mode_rate);
                    tracing::info!("conn {}: {} now in {:?}", self.id, lchan, self.ch_mode_rate);
                    return;
                }
                self.dispatch(ctx, queue, ProcEvent::LchanModified(lchan));
            }
            LchanNotify::ModifyFailed { lchan, cause, .. } => {
                self.dispatch(ctx, queue, ProcEvent::LchanModifyFailed(lchan, cause));
            }
        }
    }

    fn current_lchan_lost(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, lchan: LchanId, cause: LchanFailCause) {
        tracing::warn!("conn {}: lost {} ({:?})", self.id, lchan, cause);
        self.release_lchan(ctx, queue, lchan);
        self.lchan = None;

        if self.procedure.handover_detected() {
            // MS is on the new lchan already, let the handover finish
            self.dispatch(ctx, queue, ProcEvent::OldLchanLost);
            return;
        }

        self.dl_queue.clear();
        if !self.procedure.is_none() {
            self.dispatch(ctx, queue, ProcEvent::ConnReleasing);
        }
        self.request_clear(ctx, queue, BssapCause::RadioInterfaceFailure);
    }

    /// Asks the MSC to clear the connection, or drops it right away when there is no MSC yet
    pub(crate) fn request_clear(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, cause: BssapCause) {
        match (self.state, self.msc) {
            (ConnState::WaitClearCommand, _) | (ConnState::Released, _) => {}
            (ConnState::Active, Some(_)) => {
                self.tx_msc(ctx, queue, |conn, msc| SapMsgInner::BssapClearRequest(BssapClearRequest { conn, msc, cause }));
                self.set_state(ConnState::WaitClearCommand);
                self.deadline = Some(ctx.deadline(ctx.cfg.timers.clear_wait_ms));
            }
            _ => {
                self.release_resources(ctx, queue);
                self.set_state(ConnState::Released);
            }
        }
    }

    // ---------------- Initial L3 and uplink ----------------

    fn complete_l3(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, l3: L3Msg) {
        let mi = l3.mobile_identity().cloned().unwrap_or(MobileIdentity::None);
        let paging_msc = if l3.is_paging_response() { ctx.paging.get_msc(self.bts, &mi) } else { None };

        let selection = match ctx.msc_pool.select(&l3, paging_msc) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("conn {}: cannot route {}: {}", self.id, mi, e);
                ctx.count(BscCounter::MscNoneAvailable);
                self.release_resources(ctx, queue);
                self.set_state(ConnState::Released);
                return;
            }
        };
        tracing::info!("conn {}: {} routed to MSC {} ({:?})", self.id, mi, selection.msc(), selection);

        self.msc = Some(selection.msc());
        self.emergency = l3.is_emergency();
        self.subscriber = Some(mi.clone());
        match &l3 {
            L3Msg::LocationUpdatingRequest { power_class, .. } | L3Msg::CmServiceRequest { power_class, .. } => {
                self.ms_power_class = Some(*power_class);
            }
            L3Msg::PagingResponse { .. } => {
                ctx.paging.stop(self.bts, &mi);
            }
            _ => {}
        }

        self.deadline = None;
        self.set_state(ConnState::Active);
        let Some(cell) = self.cell(ctx) else {
            tracing::warn!("conn {}: unknown bts {}", self.id, self.bts);
            return;
        };
        self.tx_msc(ctx, queue, |conn, msc| SapMsgInner::BssapCompleteL3(BssapCompleteL3 { conn, msc, cell, l3 }));
    }

    /// Uplink L3 message on one of our lchans
    pub fn rx_l3(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, lchan: LchanId, l3: L3Msg) {
        if !matches!(self.state, ConnState::Active | ConnState::WaitClearCommand) {
            tracing::warn!("conn {}: {:?} in state {}, ignored", self.id, l3, self.state.name());
            return;
        }
        match l3 {
            L3Msg::AssignmentComplete => self.dispatch(ctx, queue, ProcEvent::RrAssignmentComplete(lchan)),
            L3Msg::AssignmentFailure { rr_cause } => self.dispatch(ctx, queue, ProcEvent::RrAssignmentFailure(rr_cause)),
            L3Msg::HandoverComplete => self.dispatch(ctx, queue, ProcEvent::RrHandoverComplete(lchan)),
            L3Msg::HandoverFailure { rr_cause } => self.dispatch(ctx, queue, ProcEvent::RrHandoverFailure(rr_cause)),
            L3Msg::ChannelModeModifyAck { ch_mode_rate } => {
                self.dispatch(ctx, queue, ProcEvent::RrModeModifyAck { lchan, ch_mode_rate })
            }
            L3Msg::ClassmarkChange { classmark } => {
                self.classmark = Some(classmark);
                self.ms_power_class = Some(classmark.power_class);
                self.tx_msc(ctx, queue, |conn, msc| {
                    SapMsgInner::BssapClassmarkUpdate(BssapClassmarkUpdate { conn, msc, classmark })
                });
            }
            L3Msg::CipheringModeComplete => {
                if !self.ciphering_pending {
                    tracing::warn!("conn {}: Ciphering Mode Complete without command", self.id);
                    return;
                }
                self.ciphering_pending = false;
                let alg_id = self.encr.alg_id;
                self.tx_msc(ctx, queue, |conn, msc| {
                    SapMsgInner::BssapCipherModeComplete(BssapCipherModeComplete { conn, msc, alg_id })
                });
            }
            L3Msg::LocationUpdatingRequest { power_class, .. } | L3Msg::CmServiceRequest { power_class, .. } => {
                self.ms_power_class = Some(power_class);
                self.tx_msc(ctx, queue, |conn, msc| SapMsgInner::BssapDtapUl(BssapDtapUl { conn, msc, l3 }));
            }
            L3Msg::PagingResponse { .. } | L3Msg::Dtap { .. } => {
                self.tx_msc(ctx, queue, |conn, msc| SapMsgInner::BssapDtapUl(BssapDtapUl { conn, msc, l3 }));
            }
            l3 => tracing::warn!("conn {}: unexpected uplink {:?}", self.id, l3),
        }
    }

    // ---------------- MSC side ----------------

    pub fn rx_dtap_dl(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, l3: L3Msg) {
        if self.state != ConnState::Active {
            tracing::warn!("conn {}: DTAP in state {}, dropped", self.id, self.state.name());
            return;
        }
        if !self.procedure.is_none() {
            self.queue_dl(ctx, DownlinkMsg::Dtap(l3));
            return;
        }
        match self.lchan {
            Some(lchan) => self.tx_rr(ctx, queue, lchan, l3),
            None => tracing::warn!("conn {}: DTAP without lchan, dropped", self.id),
        }
    }

    pub fn rx_cipher_mode_command(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, encr: EncryptionInfo) {
        if self.state != ConnState::Active || self.lchan.is_none() {
            tracing::warn!("conn {}: Cipher Mode Command in state {}", self.id, self.state.name());
            return;
        }
        if !self.procedure.is_none() {
            self.queue_dl(ctx, DownlinkMsg::CipherModeCommand(encr));
            return;
        }
        if self.ciphering_pending {
            self.tx_msc(ctx, queue, |conn, msc| {
                SapMsgInner::BssapCipherModeReject(BssapCipherModeReject { conn, msc, cause: BssapCause::ProtocolError })
            });
            return;
        }
        let Some(lchan) = self.lchan else {
            return;
        };
        tracing::info!("conn {}: ciphering with alg {}", self.id, encr.alg_id);
        self.ciphering_pending = true;
        let alg_id = encr.alg_id;
        self.encr = encr.clone();
        if let Some(l) = ctx.net.lchan_mut(lchan) {
            l.encr = encr;
        }
        self.tx_rr(ctx, queue, lchan, L3Msg::CipheringModeCommand { alg_id });
    }

    pub fn rx_assignment_request(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, req: AssignmentRequest) {
        if !self.procedure.is_none() {
            tracing::warn!("conn {}: Assignment Request while {} runs", self.id, self.procedure.name());
            self.tx_msc(ctx, queue, |conn, msc| {
                SapMsgInner::BssapAssignmentFailure(BssapAssignmentFailure {
                    conn,
                    msc,
                    cause: BssapCause::EquipmentFailure,
                    rr_cause: None,
                })
            });
            return;
        }
        let p = AssignmentFsm::start(ctx, queue, self, req);
        self.set_procedure(ctx, queue, p);
    }

    pub fn rx_clear_command(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, cause: BssapCause) {
        tracing::info!("conn {}: Clear Command ({:?}) in state {}", self.id, cause, self.state.name());
        self.dl_queue.clear();
        let mo_ho_done = matches!(&self.procedure, ConnProcedure::Handover(h) if h.state == HoState::MoWaitClear);
        if mo_ho_done {
            self.dispatch(ctx, queue, ProcEvent::BssmapClearCommand);
        } else if !self.procedure.is_none() {
            self.dispatch(ctx, queue, ProcEvent::ConnReleasing);
        }
        self.release_resources(ctx, queue);
        self.tx_msc(ctx, queue, |conn, msc| SapMsgInner::BssapClearComplete(BssapClearComplete { conn, msc }));
        self.deadline = None;
        self.set_state(ConnState::Released);
    }

    /// MSC reset or link loss: drop everything without talking to the MSC
    pub fn msc_lost(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue) {
        tracing::info!("conn {}: MSC gone, releasing", self.id);
        self.dl_queue.clear();
        if !self.procedure.is_none() {
            self.dispatch(ctx, queue, ProcEvent::ConnReleasing);
        }
        self.release_resources(ctx, queue);
        self.set_state(ConnState::Released);
    }

    // ---------------- Handover ----------------

    /// Starts a handover of this connection to `target`
    pub fn start_handover(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, target: CellId) -> bool {
        if self.state != ConnState::Active || self.lchan.is_none() || !self.procedure.is_none() {
            tracing::warn!(
                "conn {}: cannot start handover to {} (state {}, procedure {})",
                self.id,
                target,
                self.state.name(),
                self.procedure.name()
            );
            return false;
        }
        let p = HandoverFsm::start(ctx, queue, self, target);
        self.set_procedure(ctx, queue, p);
        true
    }

    /// Measurement report stored on our current lchan, maybe time for a handover
    pub fn rx_meas(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, lchan: LchanId) {
        if !ctx.cfg.handover.enabled
            || self.state != ConnState::Active
            || self.lchan != Some(lchan)
            || !self.procedure.is_none()
        {
            return;
        }
        let target = {
            let (Some(bts), Some(l)) = (ctx.bts_cfg(self.bts), ctx.net.lchan(lchan)) else {
                return;
            };
            ctx.hodec.evaluate(bts, &l.meas_rep, &ctx.cfg.handover)
        };
        if let Some(target) = target {
            tracing::info!("conn {}: handover decision towards {}", self.id, target);
            self.start_handover(ctx, queue, target);
        }
    }

    // ---------------- Timers ----------------

    pub fn tick(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue) {
        if self.procedure.deadline().is_some_and(|d| ctx.now.reached(d)) {
            self.dispatch(ctx, queue, ProcEvent::Timeout);
        }
        if !self.deadline.is_some_and(|d| ctx.now.reached(d)) {
            return;
        }
        self.deadline = None;
        match self.state {
            ConnState::Init | ConnState::WaitInitialUserData => {
                tracing::warn!("conn {}: T3101 expired in state {}", self.id, self.state.name());
                self.release_resources(ctx, queue);
                self.set_state(ConnState::Released);
            }
            ConnState::WaitClearCommand => {
                tracing::warn!("conn {}: no Clear Command from MSC, releasing", self.id);
                self.dl_queue.clear();
                if !self.procedure.is_none() {
                    self.dispatch(ctx, queue, ProcEvent::ConnReleasing);
                }
                self.release_resources(ctx, queue);
                self.set_state(ConnState::Released);
            }
            _ => {}
        }
    }
}

/// All connections of the BSC
pub struct ConnMgr {
    conns: HashMap<ConnId, Conn>,
    next_id: ConnId,
}

impl Default for ConnMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnMgr {
    pub fn new() -> Self {
        Self { conns: HashMap::new(), next_id: 1 }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn get(&self, id: ConnId) -> Option<&Conn> {
        self.conns.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Conn> {
        self.conns.get_mut(&id)
    }

    /// Connection ids in ascending order
    pub fn ids(&self) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self.conns.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn alloc(&mut self, ctx: &BscContext, bts: u8) -> ConnId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(CONN_NONE + 1);
        self.conns.insert(id, Conn::new(id, bts));
        ctx.config.state_write().num_conns = self.conns.len();
        id
    }

    /// Forgets released connections
    pub fn reap(&mut self, ctx: &BscContext) {
        let before = self.conns.len();
        self.conns.retain(|id, c| {
            if c.state == ConnState::Released {
                tracing::debug!("conn {}: freed", id);
                return false;
            }
            true
        });
        if before != self.conns.len() {
            ctx.config.state_write().num_conns = self.conns.len();
        }
    }

    /// Verifies that each lchan referenced by a connection is owned by that connection
    /// and that no lchan is referenced twice
    pub fn check_ownership(&self, net: &Network) -> Result<(), String> {
        let mut seen: HashMap<LchanId, ConnId> = HashMap::new();
        for conn in self.conns.values() {
            for lchan in conn.lchan.iter().chain(conn.procedure.candidate().iter()) {
                if let Some(other) = seen.insert(*lchan, conn.id) {
                    return Err(format!("{} referenced by conn {} and conn {}", lchan, other, conn.id));
                }
                let owner = net.lchan_owner(*lchan);
                if owner != Some(conn.id) {
                    return Err(format!("{} referenced by conn {} but owned by {:?}", lchan, conn.id, owner));
                }
            }
        }
        Ok(())
    }

    fn conn_by_lchan(&self, ctx: &BscContext, lchan: LchanId) -> Option<ConnId> {
        ctx.net.lchan_owner(lchan).filter(|id| self.conns.contains_key(id))
    }

    // ---------------- Entry points ----------------

    pub fn rx_chan_rqd(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, rqd: &AbisChanRqd) {
        ctx.count(BscCounter::ChreqTotal);

        // Emergency calls may fall back to a TCH when no SDCCH is left
        let candidates: &[LchanType] = if rqd.reason == ChreqReason::Emergency {
            &[LchanType::Sdcch, LchanType::TchH, LchanType::TchF]
        } else {
            &[LchanType::Sdcch]
        };
        let found = candidates.iter().find_map(|t| ctx.net.select_lchan(rqd.bts, *t).map(|l| (l, *t)));
        let Some((lchan, lchan_type)) = found else {
            tracing::warn!("chan_rqd bts {} ra {}: no channel available ({:?})", rqd.bts, rqd.ra, rqd.reason);
            ctx.count(BscCounter::ChreqNoChannel);
            ctx.send_bts(queue, SapMsgInner::AbisImmAssignCmd(AbisImmAssignCmd { bts: rqd.bts, ra: rqd.ra, lchan: None }));
            return;
        };
        let rate = ChannelRate::from_lchan_type(lchan_type).unwrap_or(ChannelRate::Sdcch);

        let id = self.alloc(ctx, rqd.bts);
        let Some(conn) = self.conns.get_mut(&id) else {
            return;
        };
        conn.chreq_ra = rqd.ra;
        conn.lchan = Some(lchan);
        conn.ch_mode_rate = Some(ChannelModeAndRate::new(ChanMode::Signalling, rate));
        conn.deadline = Some(ctx.deadline(ctx.cfg.timers.t3101_ms));
        tracing::info!("conn {}: chan_rqd bts {} ra {} ({:?}) on {}", id, rqd.bts, rqd.ra, rqd.reason, lchan);

        let info = LchanActivateInfo {
            activ_for: ActivType::Initial,
            for_conn: id,
            ch_mode_rate: ChannelModeAndRate::new(ChanMode::Signalling, rate),
            encr: EncryptionInfo::none(),
            requires_voice_stream: false,
            ho_ref: None,
        };
        if let Err(e) = ctx.net.lchan_activate(queue, lchan, info) {
            tracing::warn!("conn {}: {}", id, e);
            ctx.count(BscCounter::ChreqNoChannel);
            ctx.send_bts(queue, SapMsgInner::AbisImmAssignCmd(AbisImmAssignCmd { bts: rqd.bts, ra: rqd.ra, lchan: None }));
            conn.lchan = None;
            conn.set_state(ConnState::Released);
        }
        self.reap(ctx);
    }

    pub fn rx_lchan_notify(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, n: LchanNotify) {
        let id = n.conn();
        let Some(conn) = self.conns.get_mut(&id) else {
            tracing::warn!("lchan event for unknown conn {}: {:?}", id, n);
            if let LchanNotify::Active { lchan, conn } | LchanNotify::Established { lchan, conn, .. } = n {
                if let Err(e) = ctx.net.lchan_release(queue, lchan, conn) {
                    tracing::warn!("{}", e);
                }
            }
            return;
        };
        conn.rx_lchan_notify(ctx, queue, n);
    }

    pub fn rx_data_ind(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, lchan: LchanId, l3: L3Msg) {
        let Some(conn) = self.conn_by_lchan(ctx, lchan).and_then(|id| self.conns.get_mut(&id)) else {
            tracing::warn!("data indication on {} without conn: {:?}", lchan, l3);
            return;
        };
        conn.rx_l3(ctx, queue, lchan, l3);
    }

    pub fn rx_handover_detect(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, lchan: LchanId) {
        let Some(conn) = ctx.net.active_owner(lchan).and_then(|id| self.conns.get_mut(&id)) else {
            tracing::warn!("handover detect on {} without conn", lchan);
            return;
        };
        conn.dispatch(ctx, queue, ProcEvent::RrHandoverDetect(lchan));
    }

    pub fn rx_meas(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, id: ConnId, lchan: LchanId) {
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.rx_meas(ctx, queue, lchan);
        }
    }

    pub fn start_handover(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, id: ConnId, target: CellId) -> bool {
        match self.conns.get_mut(&id) {
            Some(conn) => conn.start_handover(ctx, queue, target),
            None => {
                tracing::warn!("handover start for unknown conn {}", id);
                false
            }
        }
    }

    fn with_conn(
        &mut self,
        id: ConnId,
        what: &str,
        f: impl FnOnce(&mut Conn),
    ) {
        match self.conns.get_mut(&id) {
            Some(conn) => f(conn),
            None => tracing::warn!("{} for unknown conn {}", what, id),
        }
    }

    pub fn rx_bssap(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, msg: SapMsgInner) {
        match msg {
            SapMsgInner::BssapAssignmentRequest(m) => {
                self.with_conn(m.conn, "Assignment Request", |c| c.rx_assignment_request(ctx, queue, m.req))
            }
            SapMsgInner::BssapHandoverCommand(m) => self.with_conn(m.conn, "Handover Command", |c| {
                c.dispatch(ctx, queue, ProcEvent::BssmapHandoverCommand(m.l3))
            }),
            SapMsgInner::BssapHandoverRequiredReject(m) => self.with_conn(m.conn, "Handover Required Reject", |c| {
                c.dispatch(ctx, queue, ProcEvent::BssmapHandoverRequiredReject(m.cause))
            }),
            SapMsgInner::BssapHandoverRequest(m) => self.rx_handover_request(ctx, queue, m),
            SapMsgInner::BssapClearCommand(m) => {
                self.with_conn(m.conn, "Clear Command", |c| c.rx_clear_command(ctx, queue, m.cause))
            }
            SapMsgInner::BssapDtapDl(m) => self.with_conn(m.conn, "DTAP", |c| c.rx_dtap_dl(ctx, queue, m.l3)),
            SapMsgInner::BssapCipherModeCommand(m) => {
                self.with_conn(m.conn, "Cipher Mode Command", |c| c.rx_cipher_mode_command(ctx, queue, m.encr))
            }
            other => tracing::warn!("rx_bssap: unexpected {}", other),
        }
        self.reap(ctx);
    }

    /// Incoming inter-BSC handover: a new connection is created for it, on the BTS serving
    /// the target cell. A request for a cell we do not serve is refused without one.
    fn rx_handover_request(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, req: BssapHandoverRequest) {
        let Some(bts) = ctx.net.bts_by_cell(req.target).map(|b| b.nr) else {
            tracing::warn!("handover request from MSC {} for unknown cell {}", req.msc, req.target);
            let group = HandoverScope::InterBscIn.counter_group();
            ctx.count(BscCounter::Handover(group, "attempted"));
            ctx.count(BscCounter::Handover(group, "error"));
            ctx.send_msc(
                queue,
                SapMsgInner::BssapHandoverFailure(BssapHandoverFailure {
                    conn: CONN_NONE,
                    msc: req.msc,
                    msc_ref: Some(req.msc_ref),
                    cause: BssapCause::InvalidCell,
                }),
            );
            return;
        };
        let id = self.alloc(ctx, bts);
        let Some(conn) = self.conns.get_mut(&id) else {
            return;
        };
        conn.msc = Some(req.msc);
        conn.encr = req.encr.clone();
        conn.classmark = req.classmark;
        conn.set_state(ConnState::Active);
        tracing::info!("conn {}: incoming handover from MSC {} to {}", id, req.msc, req.target);
        let p = HandoverFsm::start_incoming(ctx, queue, conn, req);
        conn.set_procedure(ctx, queue, p);
    }

    pub fn rx_mgcp(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, msg: SapMsgInner) {
        match msg {
            SapMsgInner::MgcpConnectAck(m) => {
                let waiting = self.conns.get(&m.conn).is_some_and(|c| match &c.procedure {
                    ConnProcedure::Assignment(a) => a.waits_for_mgw(),
                    ConnProcedure::Handover(h) => h.state == HoState::WaitMgwEndpoint,
                    ConnProcedure::None => false,
                });
                match self.conns.get_mut(&m.conn) {
                    Some(conn) if waiting => {
                        conn.dispatch(ctx, queue, ProcEvent::MgwOk { lchan: m.lchan, endpoint: m.endpoint })
                    }
                    Some(conn) if conn.endpoint == Some(m.endpoint) => {
                        tracing::debug!("conn {}: endpoint {} confirmed again", m.conn, m.endpoint);
                    }
                    _ => {
                        tracing::warn!("conn {}: stray endpoint {}, releasing", m.conn, m.endpoint);
                        ctx.send_mgw(queue, SapMsgInner::MgcpEndpointRelease(MgcpEndpointRelease { endpoint: m.endpoint }));
                    }
                }
            }
            SapMsgInner::MgcpConnectNack(m) => {
                self.with_conn(m.conn, "MGCP NACK", |c| c.dispatch(ctx, queue, ProcEvent::MgwFail(m.lchan)))
            }
            other => tracing::warn!("rx_mgcp: unexpected {}", other),
        }
        self.reap(ctx);
    }

    /// Drops all connections of an MSC that reset or went away
    pub fn msc_lost(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue, msc: MscNr) -> usize {
        let ids: Vec<ConnId> = self.ids().into_iter().filter(|id| self.conns[id].msc == Some(msc)).collect();
        for id in &ids {
            if let Some(conn) = self.conns.get_mut(id) {
                conn.msc_lost(ctx, queue);
            }
        }
        self.reap(ctx);
        ids.len()
    }

    pub fn tick(&mut self, ctx: &mut BscContext, queue: &mut MessageQueue) {
        for id in self.ids() {
            if let Some(conn) = self.conns.get_mut(&id) {
                conn.tick(ctx, queue);
            }
        }
        self.reap(ctx);
    }
}
