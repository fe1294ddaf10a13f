use core::fmt;

use bsc_core::{CellId, ConnId, LchanId};

/// Which kind of handover is being performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoverScope {
    IntraCell,
    IntraBsc,
    /// Outgoing to a cell of a remote BSC (MO)
    InterBscOut,
    /// Incoming from a remote BSC (MT)
    InterBscIn,
}

impl HandoverScope {
    /// Counter group the outcomes of this scope are counted in
    pub fn counter_group(&self) -> &'static str {
        match self {
            HandoverScope::IntraCell | HandoverScope::IntraBsc => "handover",
            HandoverScope::InterBscOut => "interbsc_ho_out",
            HandoverScope::InterBscIn => "interbsc_ho_in",
        }
    }
}

/// Outcome of a handover attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoverResult {
    Ok,
    FailNoChannel,
    FailRrHoFail,
    FailTimeout,
    /// The connection was torn down while the handover was in progress
    ConnReleasing,
    Error,
}

impl HandoverResult {
    pub fn counter_name(&self) -> &'static str {
        match self {
            HandoverResult::Ok => "completed",
            HandoverResult::FailNoChannel => "no_channel",
            HandoverResult::FailRrHoFail => "failed",
            HandoverResult::FailTimeout => "timeout",
            HandoverResult::ConnReleasing => "stopped",
            HandoverResult::Error => "error",
        }
    }
}

impl fmt::Display for HandoverResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            HandoverResult::Ok => "OK",
            HandoverResult::FailNoChannel => "FAIL: no channel",
            HandoverResult::FailRrHoFail => "FAIL: RR Handover Failure",
            HandoverResult::FailTimeout => "FAIL: timeout",
            HandoverResult::ConnReleasing => "FAIL: connection releasing",
            HandoverResult::Error => "FAIL: error",
        };
        write!(f, "{}", s)
    }
}

/// Requests a handover of a connection to a target cell.
/// Issued by the handover decision or by the operator.
#[derive(Debug)]
pub struct ControlHandoverStart {
    pub conn: ConnId,
    pub target: CellId,
}

/// Reports the end of a handover
#[derive(Debug)]
pub struct ControlHandoverEnd {
    pub conn: ConnId,
    pub scope: HandoverScope,
    pub result: HandoverResult,
}

/// Operator recovery of an lchan out of BORKEN
#[derive(Debug)]
pub struct ControlLchanReset {
    pub lchan: LchanId,
}
