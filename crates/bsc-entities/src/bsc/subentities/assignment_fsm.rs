//! Assignment of a traffic channel on MSC request.
//!
//! The codec policy picks the mode from the request. When the current lchan already has
//! the right type it is kept: in place if the mode matches, otherwise after an RR Channel
//! Mode Modify to the MS and a mode modify at the BTS. Any other mode gets a new lchan
//! and an RR Assignment Command. Speech and data then set up the media gateway endpoint.
//! The connection keeps its old lchan and mode until the assignment completes.

use bsc_core::{BscCounter, BscTime, ChannelModeAndRate, LchanId, RrCause};
use bsc_saps::SapMsgInner;
use bsc_saps::abis::ActivType;
use bsc_saps::bssap::{AssignmentRequest, BssapAssignmentComplete, BssapAssignmentFailure, BssapCause};
use bsc_saps::l3::L3Msg;
use bsc_saps::mgcp::MgcpConnectReq;

use crate::MessageQueue;
use crate::bsc::components::network::LchanActivateInfo;
use crate::bsc::context::BscContext;
use crate::bsc::subentities::conn::Conn;
use crate::bsc::subentities::procedure::{ConnProcedure, ProcEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentState {
    WaitLchanActive,
    WaitLchanEstablished,
    WaitRrModeModifyAck,
    WaitLchanModified,
    WaitMgwEndpoint,
}

impl AssignmentState {
    pub fn name(&self) -> &'static str {
        match self {
            AssignmentState::WaitLchanActive => "wait_lchan_active",
            AssignmentState::WaitLchanEstablished => "wait_lchan_established",
            AssignmentState::WaitRrModeModifyAck => "wait_rr_mode_modify_ack",
            AssignmentState::WaitLchanModified => "wait_lchan_modified",
            AssignmentState::WaitMgwEndpoint => "wait_mgw_endpoint",
        }
    }
}

/// How an assignment ended without completing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignmentFail {
    NoChannel,
    /// Activation rejected, or the MS reported an RR failure
    Failed(Option<RrCause>),
    Timeout,
    Error(BssapCause),
    /// Connection being released, the MSC is not told
    Stopped,
}

impl AssignmentFail {
    fn counter(&self) -> &'static str {
        match self {
            AssignmentFail::NoChannel => "no_channel",
            AssignmentFail::Failed(_) => "failed",
            AssignmentFail::Timeout => "timeout",
            AssignmentFail::Error(_) => "error",
            AssignmentFail::Stopped => "stopped",
        }
    }

    fn bssap_cause(&self) -> Option<(BssapCause, Option<RrCause>)> {
        match self {
            AssignmentFail::NoChannel => Some((BssapCause::NoRadioResourceAvailable, None)),
            AssignmentFail::Failed(None) => Some((BssapCause::EquipmentFailure, None)),
            AssignmentFail::Failed(Some(rr)) => Some((BssapCause::RadioInterfaceFailure, Some(*rr))),
            AssignmentFail::Timeout => Some((BssapCause::RadioInterfaceMessageFailure, None)),
            AssignmentFail::Error(cause) => Some((*cause, None)),
            AssignmentFail::Stopped => None,
        }
    }
}

#[derive(Debug)]
pub struct AssignmentFsm {
    pub state: AssignmentState,
    pub req: AssignmentRequest,
    /// Mode chosen from the request
    pub ch_mode_rate: ChannelModeAndRate,
    /// Lchan being activated. None when the current lchan is reused.
    pub new_lchan: Option<LchanId>,
    pub requires_voice_stream: bool,
    pub deadline: BscTime,
}

impl AssignmentFsm {
    /// Starts an assignment. Failures detected right away end the procedure immediately.
    pub fn start(ctx: &mut BscContext, queue: &mut MessageQueue, conn: &mut Conn, req: AssignmentRequest) -> ConnProcedure {
        ctx.count(BscCounter::AssignmentAttempted);
        let n = req.ch_mode_rates.len();
        if n == 0 || n > AssignmentRequest::MAX_CH_MODE_RATES {
            tracing::warn!("conn {}: assignment with {} channel modes", conn.id, n);
            return Self::fail_early(ctx, queue, conn, AssignmentFail::Error(BssapCause::InvalidMessageContents));
        }
        let Some(cur) = conn.lchan else {
            return Self::fail_early(ctx, queue, conn, AssignmentFail::Error(BssapCause::EquipmentFailure));
        };
        let (cur_type, cur_mode) = match ctx.net.lchan(cur) {
            Some(l) => (Some(l.lchan_type), l.ch_mode_rate),
            None => (None, None),
        };

        // The lchan we hold is as good as a free one of its type
        let mut load = ctx.net.channel_load(conn.bts);
        if let Some(t) = cur_type {
            load.add_free(t);
        }
        let selected = ctx.bts_cfg(conn.bts).and_then(|bts| ctx.codec_policy.select(bts, &req.ch_mode_rates, &load));
        let Some(ch_mode_rate) = selected else {
            tracing::warn!("conn {}: no channel for any of {:?}", conn.id, req.ch_mode_rates);
            return Self::fail_early(ctx, queue, conn, AssignmentFail::NoChannel);
        };
        let want = ch_mode_rate.chan_rate.lchan_type();
        let new_lchan = if cur_type == Some(want) {
            None
        } else {
            match ctx.net.select_lchan(conn.bts, want) {
                Some(lchan) => Some(lchan),
                None => {
                    tracing::warn!("conn {}: no {:?} for {:?}", conn.id, want, ch_mode_rate);
                    return Self::fail_early(ctx, queue, conn, AssignmentFail::NoChannel);
                }
            }
        };

        let requires_voice_stream = ch_mode_rate.chan_mode.requires_voice_stream();
        let mut fsm = AssignmentFsm {
            state: AssignmentState::WaitLchanActive,
            req,
            ch_mode_rate,
            new_lchan,
            requires_voice_stream,
            deadline: ctx.deadline(ctx.cfg.timers.assignment_ms),
        };

        let Some(lchan) = new_lchan else {
            if cur_mode == Some(ch_mode_rate) {
                tracing::info!("conn {}: assignment to {:?} on current {}", conn.id, ch_mode_rate, cur);
                return fsm.lchan_established(ctx, queue, conn, cur);
            }
            tracing::info!("conn {}: assignment modifies {} from {:?} to {:?}", conn.id, cur, cur_mode, ch_mode_rate);
            conn.tx_rr(ctx, queue, cur, L3Msg::ChannelModeModify { ch_mode_rate });
            fsm.set_state(ctx, conn, AssignmentState::WaitRrModeModifyAck);
            return ConnProcedure::Assignment(fsm);
        };

        tracing::info!("conn {}: assignment to {:?} on {}", conn.id, ch_mode_rate, lchan);
        let info = LchanActivateInfo {
            activ_for: ActivType::Assignment,
            for_conn: conn.id,
            ch_mode_rate,
            encr: conn.encr.clone(),
            requires_voice_stream,
            ho_ref: None,
        };
        if let Err(e) = ctx.net.lchan_activate(queue, lchan, info) {
            tracing::warn!("conn {}: {}", conn.id, e);
            fsm.new_lchan = None;
            return fsm.fail(ctx, queue, conn, AssignmentFail::NoChannel);
        }
        ConnProcedure::Assignment(fsm)
    }

    pub fn waits_for_mgw(&self) -> bool {
        self.state == AssignmentState::WaitMgwEndpoint
    }

    /// Enters a waiting state, each one supervised on its own
    fn set_state(&mut self, ctx: &BscContext, conn: &Conn, state: AssignmentState) {
        tracing::debug!("conn {}: assignment {} -> {}", conn.id, self.state.name(), state.name());
        self.state = state;
        self.deadline = ctx.deadline(ctx.cfg.timers.assignment_ms);
    }

    pub fn handle(mut self, ctx: &mut BscContext, queue: &mut MessageQueue, conn: &mut Conn, ev: ProcEvent) -> ConnProcedure {
        let state = self.state;
        match (state, ev) {
            (AssignmentState::WaitLchanActive, ProcEvent::LchanActive(lchan)) if self.new_lchan == Some(lchan) => {
                let Some(old) = conn.lchan else {
                    return self.fail(ctx, queue, conn, AssignmentFail::Error(BssapCause::EquipmentFailure));
                };
                conn.tx_rr(ctx, queue, old, L3Msg::AssignmentCommand { lchan, ch_mode_rate: self.ch_mode_rate });
                self.set_state(ctx, conn, AssignmentState::WaitLchanEstablished);
                ConnProcedure::Assignment(self)
            }
            (_, ProcEvent::LchanError(lchan, cause)) if self.new_lchan == Some(lchan) => {
                tracing::warn!("conn {}: assignment {} failed: {:?}", conn.id, lchan, cause);
                self.fail(ctx, queue, conn, AssignmentFail::Failed(None))
            }
            (AssignmentState::WaitLchanEstablished, ProcEvent::LchanEstablished(lchan))
            | (AssignmentState::WaitLchanEstablished, ProcEvent::RrAssignmentComplete(lchan))
                if self.new_lchan == Some(lchan) =>
            {
                self.lchan_established(ctx, queue, conn, lchan)
            }
            (AssignmentState::WaitLchanEstablished, ProcEvent::RrAssignmentFailure(rr_cause)) => {
                tracing::warn!("conn {}: MS reports assignment failure {:?}", conn.id, rr_cause);
                self.fail(ctx, queue, conn, AssignmentFail::Failed(Some(rr_cause)))
            }
            (AssignmentState::WaitRrModeModifyAck, ProcEvent::RrModeModifyAck { lchan, ch_mode_rate })
                if conn.lchan == Some(lchan) =>
            {
                if ch_mode_rate != self.ch_mode_rate {
                    tracing::warn!("conn {}: MS acked mode {:?}, wanted {:?}", conn.id, ch_mode_rate, self.ch_mode_rate);
                    return self.fail(ctx, queue, conn, AssignmentFail::Failed(Some(RrCause::ChannelModeUnacceptable)));
                }
                if let Err(e) = ctx.net.lchan_mode_modify(queue, lchan, conn.id, self.ch_mode_rate) {
                    tracing::warn!("conn {}: {}", conn.id, e);
                    return self.fail(ctx, queue, conn, AssignmentFail::Failed(None));
                }
                self.set_state(ctx, conn, AssignmentState::WaitLchanModified);
                ConnProcedure::Assignment(self)
            }
            (AssignmentState::WaitLchanModified, ProcEvent::LchanModified(lchan)) if conn.lchan == Some(lchan) => {
                self.lchan_established(ctx, queue, conn, lchan)
            }
            (AssignmentState::WaitLchanModified, ProcEvent::LchanModifyFailed(lchan, cause)) if conn.lchan == Some(lchan) => {
                tracing::warn!("conn {}: mode modify on {} failed: {:?}", conn.id, lchan, cause);
                self.fail(ctx, queue, conn, AssignmentFail::Failed(None))
            }
            (AssignmentState::WaitMgwEndpoint, ProcEvent::MgwOk { lchan, endpoint }) => {
                tracing::debug!("conn {}: endpoint {} for {}", conn.id, endpoint, lchan);
                if let Some(old) = conn.endpoint.replace(endpoint) {
                    if old != endpoint {
                        conn.release_endpoint(ctx, queue, old);
                    }
                }
                self.complete(ctx, queue, conn)
            }
            (AssignmentState::WaitMgwEndpoint, ProcEvent::MgwFail(_)) => {
                self.fail(ctx, queue, conn, AssignmentFail::Error(BssapCause::EquipmentFailure))
            }
            (_, ProcEvent::Timeout) => {
                tracing::warn!("conn {}: assignment timeout in {}", conn.id, state.name());
                self.fail(ctx, queue, conn, AssignmentFail::Timeout)
            }
            (_, ProcEvent::ConnReleasing) => self.fail(ctx, queue, conn, AssignmentFail::Stopped),
            (_, ev) => {
                tracing::debug!("conn {}: assignment ignores {:?} in {}", conn.id, ev, state.name());
                ConnProcedure::Assignment(self)
            }
        }
    }

    /// MS is on the lchan carrying the new mode, connect the user plane if needed
    fn lchan_established(
        mut self,
        ctx: &mut BscContext,
        queue: &mut MessageQueue,
        conn: &mut Conn,
        lchan: LchanId,
    ) -> ConnProcedure {
        if !self.requires_voice_stream {
            return self.complete(ctx, queue, conn);
        }
        self.set_state(ctx, conn, AssignmentState::WaitMgwEndpoint);
        ctx.send_mgw(
            queue,
            SapMsgInner::MgcpConnectReq(MgcpConnectReq {
                conn: conn.id,
                endpoint: conn.endpoint,
                lchan,
                ch_mode_rate: self.ch_mode_rate,
            }),
        );
        ConnProcedure::Assignment(self)
    }

    fn complete(self, ctx: &mut BscContext, queue: &mut MessageQueue, conn: &mut Conn) -> ConnProcedure {
        if let Some(new) = self.new_lchan {
            if let Some(old) = conn.lchan.replace(new) {
                conn.release_lchan(ctx, queue, old);
            }
            conn.bts = new.bts;
        }
        let Some(lchan) = conn.lchan else {
            return ConnProcedure::None;
        };
        conn.ch_mode_rate = Some(self.ch_mode_rate);

        tracing::info!("conn {}: assignment completed on {} ({:?})", conn.id, lchan, self.ch_mode_rate);
        let ch_mode_rate = self.ch_mode_rate;
        conn.tx_msc(ctx, queue, |conn, msc| {
            SapMsgInner::BssapAssignmentComplete(BssapAssignmentComplete { conn, msc, ch_mode_rate, lchan })
        });
        ctx.count(BscCounter::Assignment("completed"));
        ConnProcedure::None
    }

    fn fail(mut self, ctx: &mut BscContext, queue: &mut MessageQueue, conn: &mut Conn, why: AssignmentFail) -> ConnProcedure {
        if let Some(lchan) = self.new_lchan.take() {
            conn.release_lchan(ctx, queue, lchan);
        }
        Self::fail_early(ctx, queue, conn, why)
    }

    fn fail_early(ctx: &mut BscContext, queue: &mut MessageQueue, conn: &mut Conn, why: AssignmentFail) -> ConnProcedure {
        tracing::info!("conn {}: assignment {}", conn.id, why.counter());
        ctx.count(BscCounter::Assignment(why.counter()));
        if let Some((cause, rr_cause)) = why.bssap_cause() {
            conn.tx_msc(ctx, queue, |conn, msc| {
                SapMsgInner::BssapAssignmentFailure(BssapAssignmentFailure { conn, msc, cause, rr_cause })
            });
        }
        ConnProcedure::None
    }
}
