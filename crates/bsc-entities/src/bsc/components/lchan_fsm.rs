//! Logical channel state machine.
//!
//! Every lchan cycles UNUSED -> (WAIT_TS_READY) -> WAIT_ACTIV_ACK -> ACTIVE -> WAIT_RF_RELEASE_ACK
//! -> UNUSED. An ACTIVE lchan changes its channel mode through WAIT_MODE_MODIFY_ACK. Any BTS reply that does not fit the current state, and any supervision timeout,
//! leaves the lchan BORKEN: its hardware state is unknown, so it is never handed out again
//! until an operator resets it.

use bsc_core::{BscCounter, ChannelModeAndRate, ConnId, LchanId, MeasRep, RslCause};
use bsc_saps::SapMsgInner;
use bsc_saps::abis::{AbisChanActivReq, AbisModeModifyReq, AbisRfChanRelReq};
use bsc_saps::l3::L3Msg;
use thiserror::Error;

use crate::MessageQueue;
use crate::bsc::components::network::{LchanActivateInfo, Network};
use crate::bsc::components::ts_fsm::TsReadiness;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LchanState {
    Unused,
    WaitTsReady,
    WaitActivAck,
    Active,
    /// Active, mode change pending at the BTS
    WaitModeModifyAck,
    WaitRfReleaseAck,
    Borken,
}

impl LchanState {
    pub fn name(&self) -> &'static str {
        match self {
            LchanState::Unused => "unused",
            LchanState::WaitTsReady => "wait_ts_ready",
            LchanState::WaitActivAck => "wait_activ_ack",
            LchanState::Active => "active",
            LchanState::WaitModeModifyAck => "wait_mode_modify_ack",
            LchanState::WaitRfReleaseAck => "wait_rf_release_ack",
            LchanState::Borken => "borken",
        }
    }

    /// Carries a radio link, with or without a mode change in flight
    pub fn is_active(&self) -> bool {
        matches!(self, LchanState::Active | LchanState::WaitModeModifyAck)
    }
}

/// Inputs that may move an lchan into or keep it in BORKEN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LchanEv {
    ChanActivAck,
    ChanActivNack,
    RfChanRelAck,
    ModeModifyAck,
    ModeModifyNack,
    Timeout,
}

impl LchanEv {
    pub fn name(&self) -> &'static str {
        match self {
            LchanEv::ChanActivAck => "chan_activ_ack",
            LchanEv::ChanActivNack => "chan_activ_nack",
            LchanEv::RfChanRelAck => "rf_chan_rel_ack",
            LchanEv::ModeModifyAck => "mode_modify_ack",
            LchanEv::ModeModifyNack => "mode_modify_nack",
            LchanEv::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LchanErr {
    #[error("no such lchan {0}")]
    NotFound(LchanId),
    #[error("{lchan} is busy ({state:?})")]
    Busy { lchan: LchanId, state: LchanState },
    #[error("{0} is BORKEN")]
    Borken(LchanId),
    #[error("timeslot of {0} cannot serve the request")]
    TsNotReady(LchanId),
    #[error("{lchan} is not owned by conn {conn}")]
    NotOwner { lchan: LchanId, conn: ConnId },
    #[error("{0} is not BORKEN")]
    NotBorken(LchanId),
    #[error("{lchan} is not active ({state:?})")]
    NotActive { lchan: LchanId, state: LchanState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LchanFailCause {
    /// BTS rejected the activation
    Nack(RslCause),
    /// No answer from the BTS in time
    Timeout,
    /// Timeslot could not be switched to the needed kind
    TsError,
    /// TRX went away
    Teardown,
    /// BTS reply that does not match the lchan state
    ProtocolError,
    /// Radio link lost while active
    RadioLink(RslCause),
}

/// Events for the connection owning an lchan
#[derive(Debug)]
pub enum LchanNotify {
    Active { conn: ConnId, lchan: LchanId },
    ActivationFailed { conn: ConnId, lchan: LchanId, cause: LchanFailCause },
    Established { conn: ConnId, lchan: LchanId, l3: Option<L3Msg> },
    Failure { conn: ConnId, lchan: LchanId, cause: LchanFailCause },
    /// BTS runs the lchan in the requested mode now
    Modified { conn: ConnId, lchan: LchanId },
    /// BTS refused the mode change, the old mode stays in effect
    ModifyFailed { conn: ConnId, lchan: LchanId, cause: LchanFailCause },
}

impl LchanNotify {
    pub fn conn(&self) -> ConnId {
        match self {
            LchanNotify::Active { conn, .. }
            | LchanNotify::ActivationFailed { conn, .. }
            | LchanNotify::Established { conn, .. }
            | LchanNotify::Failure { conn, .. }
            | LchanNotify::Modified { conn, .. }
            | LchanNotify::ModifyFailed { conn, .. } => *conn,
        }
    }
}

impl Network {
    /// Starts activating an UNUSED lchan for a connection. On success the caller is told
    /// about the outcome later through LchanNotify::Active or ActivationFailed.
    pub fn lchan_activate(
        &mut self,
        queue: &mut MessageQueue,
        id: LchanId,
        info: LchanActivateInfo,
    ) -> Result<(), LchanErr> {
        let want = info.ch_mode_rate.chan_rate.lchan_type();
        let state = self.lchan_state(id).ok_or(LchanErr::NotFound(id))?;
        match state {
            LchanState::Unused => {}
            LchanState::Borken => return Err(LchanErr::Borken(id)),
            state => return Err(LchanErr::Busy { lchan: id, state }),
        }
        let readiness = self.ts_readiness(id, want)?;

        tracing::debug!("{}: activate for conn {} as {:?} ({:?})", id, info.for_conn, want, info.activ_for);
        let Some(lchan) = self.lchan_mut(id) else {
            return Err(LchanErr::NotFound(id));
        };
        lchan.clear();
        lchan.lchan_type = want;
        lchan.owner = Some(info.for_conn);
        lchan.activate = Some(info);

        match readiness {
            TsReadiness::Ready => self.lchan_send_activ(queue, id),
            TsReadiness::NeedsSwitch(pchan) => {
                if let Some(lchan) = self.lchan_mut(id) {
                    lchan.state = LchanState::WaitTsReady;
                }
                self.ts_request_pchan(queue, id.ts_id(), pchan);
            }
        }
        Ok(())
    }

    /// Sends the activation to the BTS and arms the ACK supervision
    fn lchan_send_activ(&mut self, queue: &mut MessageQueue, id: LchanId) {
        let deadline = self.now.add_ms(self.config.config().timers.chan_activ_ack_ms);
        let Some(lchan) = self.lchan_mut(id) else {
            return;
        };
        let Some(info) = lchan.activate.clone() else {
            tracing::warn!("{}: no activation info", id);
            return;
        };
        lchan.state = LchanState::WaitActivAck;
        lchan.deadline = Some(deadline);

        self.count(BscCounter::ChanActTotal);
        self.ts_lchan_in_use(id.ts_id());
        self.send_abis(
            queue,
            SapMsgInner::AbisChanActivReq(AbisChanActivReq {
                lchan: id,
                act_type: info.activ_for,
                ch_mode_rate: info.ch_mode_rate,
                encr: info.encr,
                ho_ref: info.ho_ref,
            }),
        );
    }

    /// Timeslot finished switching to the kind this lchan waits for
    pub(crate) fn lchan_ts_ready(&mut self, queue: &mut MessageQueue, id: LchanId) {
        if self.lchan_state(id) == Some(LchanState::WaitTsReady) {
            self.lchan_send_activ(queue, id);
        }
    }

    /// Timeslot could not be switched; the waiting lchan gives up
    pub(crate) fn lchan_ts_error(&mut self, id: LchanId) {
        let Some(lchan) = self.lchan_mut(id) else {
            return;
        };
        if lchan.state != LchanState::WaitTsReady {
            return;
        }
        let owner = lchan.owner;
        lchan.clear();
        tracing::warn!("{}: timeslot not available", id);
        if let Some(conn) = owner {
            self.push_notify(LchanNotify::ActivationFailed { conn, lchan: id, cause: LchanFailCause::TsError });
        }
    }

    pub fn rx_chan_activ_ack(&mut self, queue: &mut MessageQueue, id: LchanId) {
        let Some(lchan) = self.lchan_mut(id) else {
            tracing::warn!("rx_chan_activ_ack: unknown {}", id);
            return;
        };
        let state = lchan.state;
        match state {
            LchanState::WaitActivAck => {
                lchan.deadline = None;
                if lchan.release.requested {
                    // Owner no longer wants it, release right away
                    tracing::debug!("{}: activated, but release was requested meanwhile", id);
                    self.lchan_send_rf_release(queue, id);
                    return;
                }
                let Some(info) = lchan.activate.clone() else {
                    self.lchan_to_borken(id, LchanEv::ChanActivAck, LchanFailCause::ProtocolError);
                    return;
                };
                lchan.ch_mode_rate = Some(info.ch_mode_rate);
                lchan.encr = info.encr;
                lchan.state = LchanState::Active;
                tracing::info!("{}: active for conn {}", id, info.for_conn);
                self.push_notify(LchanNotify::Active { conn: info.for_conn, lchan: id });
            }
            LchanState::Borken => self.lchan_borken_event(id, LchanEv::ChanActivAck),
            _ => self.lchan_to_borken(id, LchanEv::ChanActivAck, LchanFailCause::ProtocolError),
        }
    }

    pub fn rx_chan_activ_nack(&mut self, queue: &mut MessageQueue, id: LchanId, cause: RslCause) {
        let Some(lchan) = self.lchan_mut(id) else {
            tracing::warn!("rx_chan_activ_nack: unknown {}", id);
            return;
        };
        let state = lchan.state;
        match state {
            LchanState::WaitActivAck => {
                let owner = lchan.owner;
                let latched = lchan.release.requested;
                tracing::warn!("{}: activation NACKed ({:?})", id, cause);
                self.count(BscCounter::ChanActNack);
                self.lchan_set_unused(queue, id);
                if let (Some(conn), false) = (owner, latched) {
                    self.push_notify(LchanNotify::ActivationFailed { conn, lchan: id, cause: LchanFailCause::Nack(cause) });
                }
            }
            LchanState::Borken => self.lchan_borken_event(id, LchanEv::ChanActivNack),
            _ => self.lchan_to_borken(id, LchanEv::ChanActivNack, LchanFailCause::ProtocolError),
        }
    }

    pub fn rx_rf_chan_rel_ack(&mut self, queue: &mut MessageQueue, id: LchanId) {
        match self.lchan_state(id) {
            None => tracing::warn!("rx_rf_chan_rel_ack: unknown {}", id),
            Some(LchanState::WaitRfReleaseAck) => {
                tracing::debug!("{}: released", id);
                self.lchan_set_unused(queue, id);
            }
            Some(LchanState::Borken) => self.lchan_borken_event(id, LchanEv::RfChanRelAck),
            Some(_) => self.lchan_to_borken(id, LchanEv::RfChanRelAck, LchanFailCause::ProtocolError),
        }
    }

    /// Changes the mode of an ACTIVE lchan on behalf of its owner. The outcome comes back
    /// as LchanNotify::Modified or ModifyFailed.
    pub fn lchan_mode_modify(
        &mut self,
        queue: &mut MessageQueue,
        id: LchanId,
        by: ConnId,
        ch_mode_rate: ChannelModeAndRate,
    ) -> Result<(), LchanErr> {
        let deadline = self.now.add_ms(self.config.config().timers.chan_activ_ack_ms);
        let lchan = self.lchan_mut(id).ok_or(LchanErr::NotFound(id))?;
        match lchan.state {
            LchanState::Active => {}
            LchanState::Borken => return Err(LchanErr::Borken(id)),
            state => return Err(LchanErr::NotActive { lchan: id, state }),
        }
        if lchan.owner != Some(by) {
            return Err(LchanErr::NotOwner { lchan: id, conn: by });
        }

        tracing::debug!("{}: mode modify {:?} -> {:?}", id, lchan.ch_mode_rate, ch_mode_rate);
        lchan.state = LchanState::WaitModeModifyAck;
        lchan.modify = Some(ch_mode_rate);
        lchan.deadline = Some(deadline);
        self.send_abis(queue, SapMsgInner::AbisModeModifyReq(AbisModeModifyReq { lchan: id, ch_mode_rate }));
        Ok(())
    }

    pub fn rx_mode_modify_ack(&mut self, queue: &mut MessageQueue, id: LchanId) {
        let Some(lchan) = self.lchan_mut(id) else {
            tracing::warn!("rx_mode_modify_ack: unknown {}", id);
            return;
        };
        let state = lchan.state;
        match state {
            LchanState::WaitModeModifyAck => {
                lchan.state = LchanState::Active;
                lchan.deadline = None;
                if let Some(cmr) = lchan.modify.take() {
                    lchan.ch_mode_rate = Some(cmr);
                }
                tracing::info!("{}: mode now {:?}", id, lchan.ch_mode_rate);
                if lchan.release.requested {
                    self.lchan_send_rf_release(queue, id);
                    return;
                }
                if let Some(conn) = lchan.owner {
                    self.push_notify(LchanNotify::Modified { conn, lchan: id });
                }
            }
            LchanState::Borken => self.lchan_borken_event(id, LchanEv::ModeModifyAck),
            _ => self.lchan_to_borken(id, LchanEv::ModeModifyAck, LchanFailCause::ProtocolError),
        }
    }

    pub fn rx_mode_modify_nack(&mut self, queue: &mut MessageQueue, id: LchanId, cause: RslCause) {
        let Some(lchan) = self.lchan_mut(id) else {
            tracing::warn!("rx_mode_modify_nack: unknown {}", id);
            return;
        };
        let state = lchan.state;
        match state {
            LchanState::WaitModeModifyAck => {
                lchan.state = LchanState::Active;
                lchan.deadline = None;
                lchan.modify = None;
                tracing::warn!("{}: mode modify NACKed ({:?}), keeping {:?}", id, cause, lchan.ch_mode_rate);
                if lchan.release.requested {
                    self.lchan_send_rf_release(queue, id);
                    return;
                }
                if let Some(conn) = lchan.owner {
                    self.push_notify(LchanNotify::ModifyFailed { conn, lchan: id, cause: LchanFailCause::Nack(cause) });
                }
            }
            LchanState::Borken => self.lchan_borken_event(id, LchanEv::ModeModifyNack),
            _ => self.lchan_to_borken(id, LchanEv::ModeModifyNack, LchanFailCause::ProtocolError),
        }
    }

    /// Radio link layer came up on an ACTIVE lchan
    pub fn rx_establish_ind(&mut self, id: LchanId, l3: Option<L3Msg>) {
        let Some(lchan) = self.lchan_mut(id) else {
            tracing::warn!("rx_establish_ind: unknown {}", id);
            return;
        };
        if !lchan.state.is_active() {
            tracing::warn!("{}: establish indication in state {}", id, lchan.state.name());
            return;
        }
        lchan.established = true;
        match lchan.owner {
            Some(conn) => self.push_notify(LchanNotify::Established { conn, lchan: id, l3 }),
            None => tracing::warn!("{}: establish indication without owner", id),
        }
    }

    /// Radio link failure reported by the BTS. The owner decides what to do with the lchan;
    /// an lchan nobody owns is released right away.
    pub fn rx_conn_fail(&mut self, queue: &mut MessageQueue, id: LchanId, cause: RslCause) {
        let Some(lchan) = self.lchan(id) else {
            tracing::warn!("rx_conn_fail: unknown {}", id);
            return;
        };
        if !lchan.state.is_active() {
            tracing::debug!("{}: connection failure in state {}, ignored", id, lchan.state.name());
            return;
        }
        let owner = lchan.owner;
        tracing::warn!("{}: radio link failure ({:?})", id, cause);
        self.count(BscCounter::ChanRfFail);
        match owner {
            Some(conn) => self.push_notify(LchanNotify::Failure { conn, lchan: id, cause: LchanFailCause::RadioLink(cause) }),
            None => self.lchan_send_rf_release(queue, id),
        }
    }

    /// Stores a measurement report, returns the owning connection
    pub fn rx_meas_res(&mut self, id: LchanId, rep: MeasRep) -> Option<ConnId> {
        let lchan = self.lchan_mut(id)?;
        if !lchan.state.is_active() {
            return None;
        }
        lchan.meas_rep.push(rep);
        lchan.owner
    }

    /// Owner of an ACTIVE lchan, for indications that only make sense there
    pub fn active_owner(&self, id: LchanId) -> Option<ConnId> {
        self.lchan(id).filter(|l| l.state.is_active()).and_then(|l| l.owner)
    }

    /// Releases an lchan on behalf of its owner. Releasing an UNUSED or BORKEN lchan is a no-op.
    pub fn lchan_release(&mut self, queue: &mut MessageQueue, id: LchanId, by: ConnId) -> Result<(), LchanErr> {
        let lchan = self.lchan_mut(id).ok_or(LchanErr::NotFound(id))?;
        match lchan.state {
            LchanState::Unused | LchanState::Borken | LchanState::WaitRfReleaseAck => return Ok(()),
            _ => {}
        }
        if lchan.owner != Some(by) {
            return Err(LchanErr::NotOwner { lchan: id, conn: by });
        }

        tracing::debug!("{}: release requested by conn {} in state {}", id, by, lchan.state.name());
        match lchan.state {
            LchanState::WaitTsReady => {
                lchan.clear();
                self.ts_lchan_unused(queue, id.ts_id());
            }
            LchanState::WaitActivAck | LchanState::WaitModeModifyAck => {
                // Finish the pending BTS transaction first, release on its answer
                lchan.release.requested = true;
                lchan.owner = None;
            }
            LchanState::Active => self.lchan_send_rf_release(queue, id),
            _ => {}
        }
        Ok(())
    }

    fn lchan_send_rf_release(&mut self, queue: &mut MessageQueue, id: LchanId) {
        let deadline = self.now.add_ms(self.config.config().timers.rf_release_ack_ms);
        let Some(lchan) = self.lchan_mut(id) else {
            return;
        };
        lchan.state = LchanState::WaitRfReleaseAck;
        lchan.owner = None;
        lchan.deadline = Some(deadline);
        self.send_abis(queue, SapMsgInner::AbisRfChanRelReq(AbisRfChanRelReq { lchan: id }));
    }

    fn lchan_set_unused(&mut self, queue: &mut MessageQueue, id: LchanId) {
        if let Some(lchan) = self.lchan_mut(id) {
            lchan.clear();
        }
        self.ts_lchan_unused(queue, id.ts_id());
    }

    fn lchan_to_borken(&mut self, id: LchanId, ev: LchanEv, cause: LchanFailCause) {
        let Some(lchan) = self.lchan_mut(id) else {
            return;
        };
        let from = lchan.state;
        let owner = if lchan.release.requested { None } else { lchan.owner };
        lchan.clear();
        lchan.state = LchanState::Borken;

        tracing::error!("{}: {} in state {}, lchan is BORKEN", id, ev.name(), from.name());
        self.count(BscCounter::LchanBorkenFromState(from.name()));

        if let Some(conn) = owner {
            let n = match from {
                LchanState::WaitTsReady | LchanState::WaitActivAck => {
                    LchanNotify::ActivationFailed { conn, lchan: id, cause }
                }
                _ => LchanNotify::Failure { conn, lchan: id, cause },
            };
            self.push_notify(n);
        }
    }

    fn lchan_borken_event(&mut self, id: LchanId, ev: LchanEv) {
        tracing::debug!("{}: {} while BORKEN", id, ev.name());
        self.count(BscCounter::LchanBorkenEvent(ev.name()));
    }

    /// Operator reset of a BORKEN lchan
    pub fn lchan_reset(&mut self, queue: &mut MessageQueue, id: LchanId) -> Result<(), LchanErr> {
        match self.lchan_state(id) {
            None => Err(LchanErr::NotFound(id)),
            Some(LchanState::Borken) => {
                tracing::info!("{}: reset from BORKEN", id);
                self.lchan_set_unused(queue, id);
                Ok(())
            }
            Some(_) => Err(LchanErr::NotBorken(id)),
        }
    }

    /// Runs lchan supervision timers
    pub fn lchan_tick(&mut self) {
        let now = self.now;
        let expired: Vec<LchanId> = self
            .all_lchans()
            .filter(|l| l.deadline.is_some_and(|d| now.reached(d)))
            .map(|l| l.id)
            .collect();
        for id in expired {
            tracing::warn!("{}: supervision timeout", id);
            self.lchan_to_borken(id, LchanEv::Timeout, LchanFailCause::Timeout);
        }
    }

    /// TRX lost: all its lchans are dropped without talking to the BTS
    pub(crate) fn lchan_teardown(&mut self, id: LchanId) {
        let Some(lchan) = self.lchan_mut(id) else {
            return;
        };
        if lchan.state == LchanState::Unused {
            return;
        }
        let from = lchan.state;
        let owner = if lchan.release.requested { None } else { lchan.owner };
        lchan.clear();
        if let Some(conn) = owner {
            let cause = LchanFailCause::Teardown;
            let n = match from {
                LchanState::WaitTsReady | LchanState::WaitActivAck => {
                    LchanNotify::ActivationFailed { conn, lchan: id, cause }
                }
                _ => LchanNotify::Failure { conn, lchan: id, cause },
            };
            self.push_notify(n);
        }
    }
}
