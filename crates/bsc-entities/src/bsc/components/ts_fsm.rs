//! Timeslot state machine.
//!
//! A timeslot becomes usable once its TRX is ready. Dynamic timeslots idle as PDCH when the
//! BTS has GPRS, and are switched away from PDCH when an lchan wants to use them. Lchans
//! waiting for such a switch sit in WAIT_TS_READY and are activated (or failed) once the
//! switch is over.

use bsc_core::{BscCounter, LchanId, LchanType, PchanKind, TsId};
use bsc_saps::SapMsgInner;
use bsc_saps::abis::AbisPchanSwitchReq;

use crate::MessageQueue;
use crate::bsc::components::lchan_fsm::{LchanErr, LchanState};
use crate::bsc::components::network::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsState {
    NotInitialized,
    Unused,
    WaitPdchAct,
    Pdch,
    WaitPdchDeact,
    InUse,
    Borken,
}

impl TsState {
    pub fn name(&self) -> &'static str {
        match self {
            TsState::NotInitialized => "not_initialized",
            TsState::Unused => "unused",
            TsState::WaitPdchAct => "wait_pdch_act",
            TsState::Pdch => "pdch",
            TsState::WaitPdchDeact => "wait_pdch_deact",
            TsState::InUse => "in_use",
            TsState::Borken => "borken",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsEv {
    PdchActAck,
    PdchActNack,
    PdchDeactAck,
    PdchDeactNack,
    Timeout,
}

impl TsEv {
    pub fn name(&self) -> &'static str {
        match self {
            TsEv::PdchActAck => "pdch_act_ack",
            TsEv::PdchActNack => "pdch_act_nack",
            TsEv::PdchDeactAck => "pdch_deact_ack",
            TsEv::PdchDeactNack => "pdch_deact_nack",
            TsEv::Timeout => "timeout",
        }
    }
}

/// Whether a timeslot can take an lchan activation right away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsReadiness {
    Ready,
    /// Dynamic timeslot must first be switched to this kind
    NeedsSwitch(PchanKind),
}

impl Network {
    /// Checks whether lchan `id` can be activated as `want` on its timeslot
    pub fn ts_readiness(&self, id: LchanId, want: LchanType) -> Result<TsReadiness, LchanErr> {
        let ts = self.ts(id.ts_id()).ok_or(LchanErr::NotFound(id))?;
        let ss = id.ss as usize;

        let state = ts.state;
        match state {
            TsState::NotInitialized | TsState::Borken => return Err(LchanErr::TsNotReady(id)),
            _ => {}
        }

        if ts.pchan_is.lchan_type() == want && matches!(ts.state, TsState::Unused | TsState::InUse) {
            return if ss < ts.num_lchans() { Ok(TsReadiness::Ready) } else { Err(LchanErr::TsNotReady(id)) };
        }

        let target = want.pchan();
        if ts.pchan_from_config.is_dynamic()
            && ts.pchan_from_config.can_become(target)
            && ss < target.num_lchans()
            && ts.all_lchans_unused()
            && matches!(ts.state, TsState::Unused | TsState::WaitPdchAct | TsState::Pdch)
        {
            return Ok(TsReadiness::NeedsSwitch(target));
        }
        Err(LchanErr::TsNotReady(id))
    }

    /// TRX came up: its timeslots become usable
    pub fn ts_trx_ready(&mut self, queue: &mut MessageQueue, bts: u8, trx: u8) {
        let Some(t) = self.trx_mut(bts, trx) else {
            tracing::warn!("ts_trx_ready: unknown trx {}-{}", bts, trx);
            return;
        };
        let mut dynamic = vec![];
        for ts in t.ts.iter_mut().filter(|ts| ts.state == TsState::NotInitialized) {
            ts.is_oml_ready = true;
            ts.is_rsl_ready = true;
            ts.state = TsState::Unused;
            if ts.pchan_from_config.is_dynamic() {
                ts.pchan_is = PchanKind::None;
                dynamic.push(ts.id);
            } else {
                ts.pchan_is = ts.pchan_from_config;
            }
            tracing::debug!("{}: ready as {:?}", ts.id, ts.pchan_from_config);
        }
        for id in dynamic {
            self.ts_maybe_pdch_act(queue, id);
        }
    }

    /// TRX lost: every timeslot and lchan on it is dropped
    pub fn ts_trx_down(&mut self, bts: u8, trx: u8) {
        let Some(t) = self.trx_mut(bts, trx) else {
            tracing::warn!("ts_trx_down: unknown trx {}-{}", bts, trx);
            return;
        };
        let lchans: Vec<LchanId> = t.ts.iter().flat_map(|ts| ts.lchans.iter().map(|l| l.id)).collect();
        for ts in t.ts.iter_mut() {
            ts.state = TsState::NotInitialized;
            ts.pchan_is = PchanKind::None;
            ts.pchan_want = None;
            ts.switch_to = None;
            ts.pdch_act_allowed = true;
            ts.is_oml_ready = false;
            ts.is_rsl_ready = false;
            ts.deadline = None;
        }
        tracing::warn!("trx {}-{} down", bts, trx);
        for id in lchans {
            self.lchan_teardown(id);
        }
    }

    /// Idle dynamic timeslots are handed to the PCU
    fn ts_maybe_pdch_act(&mut self, queue: &mut MessageQueue, id: TsId) {
        let gprs = self.bts(id.bts).is_some_and(|b| b.cfg.gprs);
        let deadline = self.now.add_ms(self.config.config().timers.pdch_switch_ms);
        let Some(ts) = self.ts_mut(id) else {
            return;
        };
        if !gprs
            || !ts.pchan_from_config.is_dynamic()
            || !ts.pdch_act_allowed
            || ts.state != TsState::Unused
            || !ts.all_lchans_unused()
        {
            return;
        }
        ts.state = TsState::WaitPdchAct;
        ts.switch_to = Some(PchanKind::Pdch);
        ts.deadline = Some(deadline);
        tracing::debug!("{}: activating PDCH", id);
        self.send_abis(queue, SapMsgInner::AbisPchanSwitchReq(AbisPchanSwitchReq { ts: id, to: PchanKind::Pdch }));
    }

    /// An lchan waits for this dynamic timeslot to become `want`
    pub(crate) fn ts_request_pchan(&mut self, queue: &mut MessageQueue, id: TsId, want: PchanKind) {
        let deadline = self.now.add_ms(self.config.config().timers.pdch_switch_ms);
        let Some(ts) = self.ts_mut(id) else {
            return;
        };
        ts.pchan_want = Some(want);
        let state = ts.state;
        match state {
            TsState::Unused => {
                // Not in PDCH mode, switch without asking the BTS
                ts.pchan_is = want;
                self.ts_serve_waiting(queue, id);
            }
            TsState::Pdch => {
                ts.state = TsState::WaitPdchDeact;
                ts.switch_to = Some(want);
                ts.deadline = Some(deadline);
                tracing::debug!("{}: deactivating PDCH for {:?}", id, want);
                self.send_abis(queue, SapMsgInner::AbisPchanSwitchReq(AbisPchanSwitchReq { ts: id, to: want }));
            }
            // The pending switch finishes first, see rx_pchan_switch_ack()
            TsState::WaitPdchAct | TsState::WaitPdchDeact => {}
            state => tracing::warn!("{}: cannot switch to {:?} in state {}", id, want, state.name()),
        }
    }

    /// Activates all lchans that waited for the timeslot
    fn ts_serve_waiting(&mut self, queue: &mut MessageQueue, id: TsId) {
        let Some(ts) = self.ts(id) else {
            return;
        };
        let waiting: Vec<LchanId> =
            ts.lchans.iter().filter(|l| l.state == LchanState::WaitTsReady).map(|l| l.id).collect();
        for lchan in waiting {
            self.lchan_ts_ready(queue, lchan);
        }
    }

    fn ts_fail_waiting(&mut self, id: TsId) {
        let Some(ts) = self.ts(id) else {
            return;
        };
        let waiting: Vec<LchanId> =
            ts.lchans.iter().filter(|l| l.state == LchanState::WaitTsReady).map(|l| l.id).collect();
        for lchan in waiting {
            self.lchan_ts_error(lchan);
        }
    }

    pub fn rx_pchan_switch_ack(&mut self, queue: &mut MessageQueue, id: TsId) {
        let Some(ts) = self.ts_mut(id) else {
            tracing::warn!("rx_pchan_switch_ack: unknown {}", id);
            return;
        };
        let state = ts.state;
        let ev = if ts.switching_to_pdch() { TsEv::PdchActAck } else { TsEv::PdchDeactAck };
        if state != TsState::Borken {
            ts.switch_to = None;
        }
        match state {
            TsState::WaitPdchAct => {
                ts.state = TsState::Pdch;
                ts.pchan_is = PchanKind::Pdch;
                ts.deadline = None;
                tracing::info!("{}: PDCH active", id);
                if let (true, Some(want)) = (ts.has_waiting_lchans(), ts.pchan_want) {
                    self.ts_request_pchan(queue, id, want);
                }
            }
            TsState::WaitPdchDeact => {
                ts.state = TsState::Unused;
                ts.pchan_is = PchanKind::None;
                ts.deadline = None;
                match (ts.has_waiting_lchans(), ts.pchan_want) {
                    (true, Some(want)) => {
                        ts.pchan_is = want;
                        tracing::debug!("{}: switched to {:?}", id, want);
                        self.ts_serve_waiting(queue, id);
                    }
                    _ => {
                        ts.pchan_want = None;
                        self.ts_maybe_pdch_act(queue, id);
                    }
                }
            }
            TsState::Borken => self.ts_borken_event(id, ev),
            _ => self.ts_to_borken(id, ev),
        }
    }

    pub fn rx_pchan_switch_nack(&mut self, queue: &mut MessageQueue, id: TsId) {
        let Some(ts) = self.ts_mut(id) else {
            tracing::warn!("rx_pchan_switch_nack: unknown {}", id);
            return;
        };
        let state = ts.state;
        let ev = if ts.switching_to_pdch() { TsEv::PdchActNack } else { TsEv::PdchDeactNack };
        if state != TsState::Borken {
            ts.switch_to = None;
        }
        match state {
            TsState::WaitPdchAct => {
                // Stays off PDCH until traffic use sets the flag again
                ts.state = TsState::Unused;
                ts.pchan_is = PchanKind::None;
                ts.pdch_act_allowed = false;
                ts.deadline = None;
                tracing::warn!("{}: PDCH activation NACKed", id);
                if let (true, Some(want)) = (ts.has_waiting_lchans(), ts.pchan_want) {
                    self.ts_request_pchan(queue, id, want);
                }
            }
            TsState::WaitPdchDeact => self.ts_to_borken(id, TsEv::PdchDeactNack),
            TsState::Borken => self.ts_borken_event(id, ev),
            _ => self.ts_to_borken(id, ev),
        }
    }

    /// An lchan of this timeslot is being activated
    pub(crate) fn ts_lchan_in_use(&mut self, id: TsId) {
        let Some(ts) = self.ts_mut(id) else {
            return;
        };
        ts.pdch_act_allowed = true;
        if ts.state == TsState::Unused {
            ts.state = TsState::InUse;
        }
    }

    /// An lchan of this timeslot went back to UNUSED
    pub(crate) fn ts_lchan_unused(&mut self, queue: &mut MessageQueue, id: TsId) {
        let Some(ts) = self.ts_mut(id) else {
            return;
        };
        if !matches!(ts.state, TsState::InUse | TsState::Unused) || !ts.all_lchans_unused() {
            return;
        }
        ts.state = TsState::Unused;
        if ts.pchan_from_config.is_dynamic() {
            ts.pchan_is = PchanKind::None;
            ts.pchan_want = None;
            self.ts_maybe_pdch_act(queue, id);
        }
    }

    fn ts_to_borken(&mut self, id: TsId, ev: TsEv) {
        let Some(ts) = self.ts_mut(id) else {
            return;
        };
        let from = ts.state;
        ts.state = TsState::Borken;
        ts.deadline = None;
        tracing::error!("{}: {} in state {}, timeslot is BORKEN", id, ev.name(), from.name());
        self.count(BscCounter::TsBorkenFromState(from.name()));
        self.ts_fail_waiting(id);
    }

    fn ts_borken_event(&mut self, id: TsId, ev: TsEv) {
        tracing::debug!("{}: {} while BORKEN", id, ev.name());
        self.count(BscCounter::TsBorkenEvent(ev.name()));
    }

    /// Runs timeslot supervision timers
    pub fn ts_tick(&mut self) {
        let now = self.now;
        let expired: Vec<TsId> =
            self.all_ts().filter(|ts| ts.deadline.is_some_and(|d| now.reached(d))).map(|ts| ts.id).collect();
        for id in expired {
            tracing::warn!("{}: PDCH switch timeout", id);
            self.ts_to_borken(id, TsEv::Timeout);
        }
    }
}
