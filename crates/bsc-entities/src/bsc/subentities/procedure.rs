use bsc_core::{BscTime, ChannelModeAndRate, EndpointId, LchanId, RrCause};
use bsc_saps::bssap::BssapCause;
use bsc_saps::l3::L3Msg;

use crate::bsc::components::lchan_fsm::LchanFailCause;
use crate::bsc::subentities::assignment_fsm::AssignmentFsm;
use crate::bsc::subentities::handover_fsm::HandoverFsm;

/// Inputs for the procedure running on a connection
#[derive(Debug)]
pub enum ProcEvent {
    LchanActive(LchanId),
    LchanError(LchanId, LchanFailCause),
    LchanEstablished(LchanId),
    LchanModified(LchanId),
    LchanModifyFailed(LchanId, LchanFailCause),
    RrAssignmentComplete(LchanId),
    RrAssignmentFailure(RrCause),
    RrModeModifyAck { lchan: LchanId, ch_mode_rate: ChannelModeAndRate },
    RrHandoverDetect(LchanId),
    RrHandoverComplete(LchanId),
    RrHandoverFailure(RrCause),
    MgwOk { lchan: LchanId, endpoint: EndpointId },
    MgwFail(LchanId),
    Timeout,
    /// Connection is being torn down, roll back without telling the MSC
    ConnReleasing,
    BssmapHandoverCommand(L3Msg),
    BssmapHandoverRequiredReject(BssapCause),
    BssmapClearCommand,
    /// The lchan in use before the handover is gone
    OldLchanLost,
}

/// At most one procedure runs on a connection at any time
#[derive(Default)]
pub enum ConnProcedure {
    #[default]
    None,
    Assignment(AssignmentFsm),
    Handover(HandoverFsm),
}

impl ConnProcedure {
    pub fn is_none(&self) -> bool {
        matches!(self, ConnProcedure::None)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnProcedure::None => "none",
            ConnProcedure::Assignment(_) => "assignment",
            ConnProcedure::Handover(_) => "handover",
        }
    }

    /// Lchan being activated by the procedure, not yet the connection's own
    pub fn candidate(&self) -> Option<LchanId> {
        match self {
            ConnProcedure::None => None,
            ConnProcedure::Assignment(a) => a.new_lchan,
            ConnProcedure::Handover(h) => h.new_lchan,
        }
    }

    pub fn deadline(&self) -> Option<BscTime> {
        match self {
            ConnProcedure::None => None,
            ConnProcedure::Assignment(a) => Some(a.deadline),
            ConnProcedure::Handover(h) => Some(h.deadline),
        }
    }

    /// MS already moved to the new lchan
    pub fn handover_detected(&self) -> bool {
        matches!(self, ConnProcedure::Handover(h) if h.detected)
    }
}
