//! Handover procedures.
//!
//! Intra-cell and intra-BSC handovers activate a new lchan, send the RR Handover Command
//! on the old one and wait for the MS to show up. Outgoing inter-BSC handovers only ask
//! the MSC and relay its command. Incoming inter-BSC handovers run on a connection
//! created for them and answer the MSC instead of the MS.
//!
//! Every attempt ends with a ControlHandoverEnd towards the handover decision.

use bsc_core::{BscCounter, BscTime, CellId, ChannelModeAndRate, ChannelRate, LchanId};
use bsc_saps::SapMsgInner;
use bsc_saps::abis::ActivType;
use bsc_saps::bssap::*;
use bsc_saps::control::{ControlHandoverEnd, HandoverResult, HandoverScope};
use bsc_saps::l3::L3Msg;
use bsc_saps::mgcp::MgcpConnectReq;

use crate::MessageQueue;
use crate::bsc::components::network::LchanActivateInfo;
use crate::bsc::context::BscContext;
use crate::bsc::subentities::conn::{Conn, ConnState};
use crate::bsc::subentities::procedure::{ConnProcedure, ProcEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoState {
    WaitLchanActive,
    WaitRrHoDetect,
    WaitRrHoComplete,
    WaitLchanEstablished,
    WaitMgwEndpoint,
    /// Handover Required sent, waiting for the MSC's Handover Command
    MoWaitHoCommand,
    /// Command relayed to the MS, the MSC clears us once the MS arrived at the target
    MoWaitClear,
}

impl HoState {
    pub fn name(&self) -> &'static str {
        match self {
            HoState::WaitLchanActive => "wait_lchan_active",
            HoState::WaitRrHoDetect => "wait_rr_ho_detect",
            HoState::WaitRrHoComplete => "wait_rr_ho_complete",
            HoState::WaitLchanEstablished => "wait_lchan_established",
            HoState::WaitMgwEndpoint => "wait_mgw_endpoint",
            HoState::MoWaitHoCommand => "mo_wait_ho_command",
            HoState::MoWaitClear => "mo_wait_clear",
        }
    }
}

#[derive(Debug)]
pub struct HandoverFsm {
    pub scope: HandoverScope,
    pub state: HoState,
    pub target: CellId,
    /// Local BTS serving the target cell
    pub target_bts: Option<u8>,
    pub new_lchan: Option<LchanId>,
    pub ch_mode_rate: ChannelModeAndRate,
    /// Handover reference the MS uses for access on the new lchan
    pub ho_ref: u8,
    /// MSC side reference of an incoming handover
    pub msc_ref: Option<u32>,
    /// MS accessed the new lchan
    pub detected: bool,
    /// Radio link established on the new lchan
    pub established: bool,
    pub deadline: BscTime,
}

fn ho_ref_for(conn: &Conn) -> u8 {
    (conn.id & 0xff) as u8
}

/// Same speech mode at the other TCH rate
fn other_rate(cmr: &ChannelModeAndRate) -> Option<ChannelModeAndRate> {
    let rate = match cmr.chan_rate {
        ChannelRate::Full => ChannelRate::Half,
        ChannelRate::Half => ChannelRate::Full,
        ChannelRate::Sdcch => return None,
    };
    Some(ChannelModeAndRate { chan_rate: rate, ..*cmr })
}

impl HandoverFsm {
    fn new(ctx: &BscContext, scope: HandoverScope, state: HoState, target: CellId, ch_mode_rate: ChannelModeAndRate) -> Self {
        Self {
            scope,
            state,
            target,
            target_bts: None,
            new_lchan: None,
            ch_mode_rate,
            ho_ref: 0,
            msc_ref: None,
            detected: false,
            established: false,
            deadline: ctx.deadline(ctx.cfg.timers.handover_ms),
        }
    }

    /// Starts a handover of an active connection towards `target`
    pub fn start(ctx: &mut BscContext, queue: &mut MessageQueue, conn: &mut Conn, target: CellId) -> ConnProcedure {
        let own_cell = conn.cell(ctx);
        let local_bts = ctx.net.bts_by_cell(target).map(|b| b.nr);
        let is_neighbor = ctx.bts_cfg(conn.bts).is_some_and(|b| b.neighbors.contains(&target));

        let scope = match local_bts {
            Some(_) if own_cell == Some(target) => HandoverScope::IntraCell,
            Some(_) => HandoverScope::IntraBsc,
            None if is_neighbor => HandoverScope::InterBscOut,
            None => {
                tracing::warn!("conn {}: handover target {} is unknown", conn.id, target);
                ctx.count(BscCounter::Handover(HandoverScope::IntraBsc.counter_group(), "error"));
                return ConnProcedure::None;
            }
        };
        ctx.count(BscCounter::Handover(scope.counter_group(), "attempted"));

        let cur_cmr = conn.ch_mode_rate.unwrap_or_else(ChannelModeAndRate::signalling);
        let mut fsm = Self::new(ctx, scope, HoState::WaitLchanActive, target, cur_cmr);
        tracing::info!("conn {}: {:?} handover to {}", conn.id, scope, target);

        if scope == HandoverScope::InterBscOut {
            fsm.state = HoState::MoWaitHoCommand;
            conn.tx_msc(ctx, queue, |conn, msc| {
                SapMsgInner::BssapHandoverRequired(BssapHandoverRequired {
                    conn,
                    msc,
                    target,
                    cause: BssapCause::BetterCell,
                })
            });
            return ConnProcedure::Handover(fsm);
        }

        let Some(bts) = local_bts else {
            return fsm.end(ctx, queue, conn, HandoverResult::Error);
        };
        fsm.target_bts = Some(bts);

        // Keep the mode, fall back to the other TCH rate if the target has no such channel
        let mut prefs = vec![cur_cmr];
        prefs.extend(other_rate(&cur_cmr));
        fsm.activate_first(ctx, queue, conn, bts, &prefs)
    }

    /// Starts an incoming inter-BSC handover on a freshly created connection
    pub fn start_incoming(
        ctx: &mut BscContext,
        queue: &mut MessageQueue,
        conn: &mut Conn,
        req: BssapHandoverRequest,
    ) -> ConnProcedure {
        let scope = HandoverScope::InterBscIn;
        ctx.count(BscCounter::Handover(scope.counter_group(), "attempted"));
        let first = req.req.ch_mode_rates.first().copied().unwrap_or_else(ChannelModeAndRate::signalling);
        let mut fsm = Self::new(ctx, scope, HoState::WaitLchanActive, req.target, first);
        fsm.msc_ref = Some(req.msc_ref);

        let n = req.req.ch_mode_rates.len();
        if n == 0 || n > AssignmentRequest::MAX_CH_MODE_RATES {
            tracing::warn!("conn {}: handover request with {} channel modes", conn.id, n);
            return fsm.fail(ctx, queue, conn, HandoverResult::Error);
        }
        let bts = conn.bts;
        fsm.target_bts = Some(bts);
        fsm.activate_first(ctx, queue, conn, bts, &req.req.ch_mode_rates)
    }

    /// Activates an lchan on `bts` for the mode the codec policy picks out of `prefs`
    fn activate_first(
        mut self,
        ctx: &mut BscContext,
        queue: &mut MessageQueue,
        conn: &mut Conn,
        bts: u8,
        prefs: &[ChannelModeAndRate],
    ) -> ConnProcedure {
        let load = ctx.net.channel_load(bts);
        let found = ctx
            .bts_cfg(bts)
            .and_then(|b| ctx.codec_policy.select(b, prefs, &load))
            .and_then(|cmr| ctx.net.select_lchan(bts, cmr.chan_rate.lchan_type()).map(|l| (l, cmr)));
        let Some((lchan, ch_mode_rate)) = found else {
            tracing::warn!("conn {}: no channel on bts {} for handover out of {:?}", conn.id, bts, prefs);
            return self.fail(ctx, queue, conn, HandoverResult::FailNoChannel);
        };

        self.ch_mode_rate = ch_mode_rate;
        self.ho_ref = ho_ref_for(conn);
        let info = LchanActivateInfo {
            activ_for: ActivType::Handover,
            for_conn: conn.id,
            ch_mode_rate,
            encr: conn.encr.clone(),
            requires_voice_stream: ch_mode_rate.chan_mode.requires_voice_stream(),
            ho_ref: Some(self.ho_ref),
        };
        if let Err(e) = ctx.net.lchan_activate(queue, lchan, info) {
            tracing::warn!("conn {}: {}", conn.id, e);
            return self.fail(ctx, queue, conn, HandoverResult::FailNoChannel);
        }
        tracing::debug!("conn {}: handover candidate {} ({:?})", conn.id, lchan, ch_mode_rate);
        self.new_lchan = Some(lchan);
        ConnProcedure::Handover(self)
    }

    fn set_state(&mut self, ctx: &BscContext, conn: &Conn, state: HoState) {
        tracing::debug!("conn {}: handover {} -> {}", conn.id, self.state.name(), state.name());
        self.state = state;
        let ms = if state == HoState::MoWaitClear { ctx.cfg.timers.moho_clear_ms } else { ctx.cfg.timers.handover_ms };
        self.deadline = ctx.deadline(ms);
    }

    fn is_new(&self, lchan: LchanId) -> bool {
        self.new_lchan == Some(lchan)
    }

    pub fn handle(mut self, ctx: &mut BscContext, queue: &mut MessageQueue, conn: &mut Conn, ev: ProcEvent) -> ConnProcedure {
        let state = self.state;
        match (state, ev) {
            // Outgoing inter-BSC
            (HoState::MoWaitHoCommand, ProcEvent::BssmapHandoverCommand(l3)) => {
                let Some(lchan) = conn.lchan else {
                    return self.fail(ctx, queue, conn, HandoverResult::Error);
                };
                conn.tx_rr(ctx, queue, lchan, l3);
                self.set_state(ctx, conn, HoState::MoWaitClear);
                ConnProcedure::Handover(self)
            }
            (HoState::MoWaitHoCommand, ProcEvent::BssmapHandoverRequiredReject(cause)) => {
                tracing::info!("conn {}: MSC rejected handover ({:?})", conn.id, cause);
                self.fail(ctx, queue, conn, HandoverResult::Error)
            }
            (HoState::MoWaitClear, ProcEvent::BssmapClearCommand) => self.end(ctx, queue, conn, HandoverResult::Ok),
            (HoState::MoWaitClear, ProcEvent::RrHandoverFailure(rr_cause)) => {
                tracing::info!("conn {}: MS stayed, RR handover failure {:?}", conn.id, rr_cause);
                conn.tx_msc(ctx, queue, |conn, msc| {
                    SapMsgInner::BssapHandoverFailure(BssapHandoverFailure {
                        conn,
                        msc,
                        msc_ref: None,
                        cause: BssapCause::RadioInterfaceMessageFailure,
                    })
                });
                self.end(ctx, queue, conn, HandoverResult::FailRrHoFail)
            }

            // New lchan
            (HoState::WaitLchanActive, ProcEvent::LchanActive(lchan)) if self.is_new(lchan) => {
                let command = L3Msg::HandoverCommand { target: self.target, lchan: Some(lchan), ho_ref: self.ho_ref };
                if self.scope == HandoverScope::InterBscIn {
                    let msc_ref = self.msc_ref.unwrap_or_default();
                    conn.tx_msc(ctx, queue, |conn, msc| {
                        SapMsgInner::BssapHandoverRequestAck(BssapHandoverRequestAck { conn, msc, msc_ref, l3: command })
                    });
                } else {
                    let Some(old) = conn.lchan else {
                        return self.fail(ctx, queue, conn, HandoverResult::Error);
                    };
                    conn.tx_rr(ctx, queue, old, command);
                }
                self.set_state(ctx, conn, HoState::WaitRrHoDetect);
                ConnProcedure::Handover(self)
            }
            (_, ProcEvent::LchanError(lchan, cause)) if self.is_new(lchan) => {
                tracing::warn!("conn {}: handover lchan {} failed: {:?}", conn.id, lchan, cause);
                let result =
                    if state == HoState::WaitLchanActive { HandoverResult::FailNoChannel } else { HandoverResult::Error };
                self.fail(ctx, queue, conn, result)
            }
            (HoState::WaitRrHoDetect, ProcEvent::RrHandoverDetect(lchan)) if self.is_new(lchan) => {
                self.detected = true;
                if self.scope == HandoverScope::InterBscIn {
                    conn.tx_msc(ctx, queue, |conn, msc| {
                        SapMsgInner::BssapHandoverDetect(BssapHandoverDetect { conn, msc })
                    });
                }
                self.set_state(ctx, conn, HoState::WaitRrHoComplete);
                ConnProcedure::Handover(self)
            }
            (HoState::WaitRrHoDetect | HoState::WaitRrHoComplete, ProcEvent::RrHandoverComplete(lchan))
                if self.is_new(lchan) =>
            {
                self.detected = true;
                if self.established {
                    return self.lchan_established(ctx, queue, conn);
                }
                self.set_state(ctx, conn, HoState::WaitLchanEstablished);
                ConnProcedure::Handover(self)
            }
            (_, ProcEvent::LchanEstablished(lchan)) if self.is_new(lchan) => {
                self.established = true;
                if state == HoState::WaitLchanEstablished {
                    return self.lchan_established(ctx, queue, conn);
                }
                ConnProcedure::Handover(self)
            }
            (HoState::WaitRrHoDetect | HoState::WaitRrHoComplete, ProcEvent::RrHandoverFailure(rr_cause)) => {
                tracing::info!("conn {}: MS returned to old lchan ({:?})", conn.id, rr_cause);
                self.fail(ctx, queue, conn, HandoverResult::FailRrHoFail)
            }
            (HoState::WaitMgwEndpoint, ProcEvent::MgwOk { lchan, endpoint }) if self.is_new(lchan) => {
                if let Some(old) = conn.endpoint.replace(endpoint) {
                    if old != endpoint {
                        conn.release_endpoint(ctx, queue, old);
                    }
                }
                self.complete(ctx, queue, conn)
            }
            (HoState::WaitMgwEndpoint, ProcEvent::MgwFail(_)) => self.fail(ctx, queue, conn, HandoverResult::Error),
            (_, ProcEvent::OldLchanLost) => {
                tracing::info!("conn {}: old lchan gone during handover, continuing on {:?}", conn.id, self.new_lchan);
                ConnProcedure::Handover(self)
            }
            (_, ProcEvent::Timeout) => {
                tracing::warn!("conn {}: handover timeout in {}", conn.id, state.name());
                self.fail(ctx, queue, conn, HandoverResult::FailTimeout)
            }
            (_, ProcEvent::ConnReleasing) => self.fail(ctx, queue, conn, HandoverResult::ConnReleasing),
            (_, ev) => {
                tracing::debug!("conn {}: handover ignores {:?} in {}", conn.id, ev, state.name());
                ConnProcedure::Handover(self)
            }
        }
    }

    /// MS is on the new lchan, move the user plane if there is one
    fn lchan_established(mut self, ctx: &mut BscContext, queue: &mut MessageQueue, conn: &mut Conn) -> ConnProcedure {
        let Some(lchan) = self.new_lchan else {
            return self.fail(ctx, queue, conn, HandoverResult::Error);
        };
        if conn.endpoint.is_none() && !self.ch_mode_rate.chan_mode.requires_voice_stream() {
            return self.complete(ctx, queue, conn);
        }
        self.set_state(ctx, conn, HoState::WaitMgwEndpoint);
        ctx.send_mgw(
            queue,
            SapMsgInner::MgcpConnectReq(MgcpConnectReq {
                conn: conn.id,
                endpoint: conn.endpoint,
                lchan,
                ch_mode_rate: self.ch_mode_rate,
            }),
        );
        ConnProcedure::Handover(self)
    }

    fn complete(self, ctx: &mut BscContext, queue: &mut MessageQueue, conn: &mut Conn) -> ConnProcedure {
        if let Some(new) = self.new_lchan {
            if let Some(old) = conn.lchan.replace(new) {
                conn.release_lchan(ctx, queue, old);
            }
            conn.bts = new.bts;
        }
        conn.ch_mode_rate = Some(self.ch_mode_rate);

        if self.scope == HandoverScope::InterBscIn {
            conn.tx_msc(ctx, queue, |conn, msc| SapMsgInner::BssapHandoverComplete(BssapHandoverComplete { conn, msc }));
        } else {
            let (cell, ch_mode_rate) = (self.target, self.ch_mode_rate);
            conn.tx_msc(ctx, queue, |conn, msc| {
                SapMsgInner::BssapHandoverPerformed(BssapHandoverPerformed { conn, msc, cell, ch_mode_rate })
            });
        }
        self.end(ctx, queue, conn, HandoverResult::Ok)
    }

    fn fail(mut self, ctx: &mut BscContext, queue: &mut MessageQueue, conn: &mut Conn, result: HandoverResult) -> ConnProcedure {
        if let Some(lchan) = self.new_lchan.take() {
            conn.release_lchan(ctx, queue, lchan);
        }
        if result != HandoverResult::ConnReleasing {
            match self.scope {
                HandoverScope::InterBscIn => {
                    let cause = match result {
                        HandoverResult::FailNoChannel => BssapCause::NoRadioResourceAvailable,
                        HandoverResult::FailTimeout => BssapCause::RadioInterfaceMessageFailure,
                        HandoverResult::FailRrHoFail => BssapCause::RadioInterfaceFailure,
                        _ => BssapCause::EquipmentFailure,
                    };
                    let msc_ref = self.msc_ref;
                    conn.tx_msc(ctx, queue, |conn, msc| {
                        SapMsgInner::BssapHandoverFailure(BssapHandoverFailure { conn, msc, msc_ref, cause })
                    });
                    // The connection only existed for this handover
                    conn.set_state(ConnState::WaitClearCommand);
                    conn.deadline = Some(ctx.deadline(ctx.cfg.timers.clear_wait_ms));
                }
                HandoverScope::IntraCell | HandoverScope::IntraBsc if conn.lchan.is_none() => {
                    conn.request_clear(ctx, queue, BssapCause::RadioInterfaceFailure);
                }
                _ => {}
            }
        }
        self.end(ctx, queue, conn, result)
    }

    fn end(self, ctx: &mut BscContext, queue: &mut MessageQueue, conn: &Conn, result: HandoverResult) -> ConnProcedure {
        tracing::info!("conn {}: {:?} handover to {} ended: {}", conn.id, self.scope, self.target, result);
        ctx.count(BscCounter::Handover(self.scope.counter_group(), result.counter_name()));
        ctx.send_hodec(
            queue,
            SapMsgInner::ControlHandoverEnd(ControlHandoverEnd { conn: conn.id, scope: self.scope, result }),
        );
        ConnProcedure::None
    }
}
