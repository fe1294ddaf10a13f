use std::net::SocketAddr;

use bsc_core::{CellId, ChannelModeAndRate, ConnId, EncryptionInfo, LchanId, MscNr, RrCause};

use crate::abis::ChanNeeded;
use crate::l3::{Classmark, L3Msg};

/// BSSMAP cause values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BssapCause {
    RadioInterfaceMessageFailure,
    RadioInterfaceFailure,
    UplinkQuality,
    BetterCell,
    CallControl,
    EquipmentFailure,
    NoRadioResourceAvailable,
    RequestedTerrestrialResourceUnavailable,
    RequestedSpeechVersionUnavailable,
    InvalidMessageContents,
    /// Cell identifier not served by this BSC
    InvalidCell,
    ProtocolError,
    HandoverSuccessful,
    OAndMIntervention,
}

/// Snapshot of a BSSMAP Assignment Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRequest {
    /// A interface over IP: RTP towards the MSC instead of a circuit
    pub aoip: bool,
    /// Circuit identity code, for non-AoIP
    pub cic: Option<u16>,
    /// RTP address and port at the MSC side, for AoIP
    pub msc_rtp: Option<SocketAddr>,
    /// 1..=3 acceptable modes, most preferred first
    pub ch_mode_rates: Vec<ChannelModeAndRate>,
}

impl AssignmentRequest {
    pub const MAX_CH_MODE_RATES: usize = 3;

    pub fn requires_voice_stream(&self) -> bool {
        self.ch_mode_rates.iter().any(|c| c.chan_mode.requires_voice_stream())
    }
}

// ---------------- MSC -> BSC ----------------

#[derive(Debug)]
pub struct BssapAssignmentRequest {
    pub conn: ConnId,
    pub req: AssignmentRequest,
}

/// Inter-BSC handover: the target BSC's RR Handover Command, to be relayed to the MS
#[derive(Debug)]
pub struct BssapHandoverCommand {
    pub conn: ConnId,
    pub l3: L3Msg,
}

#[derive(Debug)]
pub struct BssapHandoverRequiredReject {
    pub conn: ConnId,
    pub cause: BssapCause,
}

/// Inter-BSC incoming handover. Creates a new connection on this BSC.
#[derive(Debug)]
pub struct BssapHandoverRequest {
    pub msc: MscNr,
    /// MSC side reference, echoed in the response
    pub msc_ref: u32,
    pub target: CellId,
    pub req: AssignmentRequest,
    pub encr: EncryptionInfo,
    pub classmark: Option<Classmark>,
}

#[derive(Debug)]
pub struct BssapClearCommand {
    pub conn: ConnId,
    pub cause: BssapCause,
}

#[derive(Debug)]
pub struct BssapDtapDl {
    pub conn: ConnId,
    pub l3: L3Msg,
}

#[derive(Debug)]
pub struct BssapCipherModeCommand {
    pub conn: ConnId,
    pub encr: EncryptionInfo,
}

#[derive(Debug)]
pub struct BssapPaging {
    pub msc: MscNr,
    pub imsi: String,
    /// Paged by TMSI when present
    pub tmsi: Option<u32>,
    /// Cells to page in. Empty pages on all BTSs.
    pub cells: Vec<CellId>,
    pub chan_needed: ChanNeeded,
}

/// Reset, either direction
#[derive(Debug)]
pub struct BssapReset {
    pub msc: MscNr,
}

/// Reset Acknowledge, either direction
#[derive(Debug)]
pub struct BssapResetAck {
    pub msc: MscNr,
}

/// The transport towards an MSC was lost
#[derive(Debug)]
pub struct BssapLinkDown {
    pub msc: MscNr,
}

// ---------------- BSC -> MSC ----------------

#[derive(Debug)]
pub struct BssapCompleteL3 {
    pub conn: ConnId,
    pub msc: MscNr,
    pub cell: CellId,
    pub l3: L3Msg,
}

#[derive(Debug)]
pub struct BssapDtapUl {
    pub conn: ConnId,
    pub msc: MscNr,
    pub l3: L3Msg,
}

#[derive(Debug)]
pub struct BssapAssignmentComplete {
    pub conn: ConnId,
    pub msc: MscNr,
    pub ch_mode_rate: ChannelModeAndRate,
    pub lchan: LchanId,
}

#[derive(Debug)]
pub struct BssapAssignmentFailure {
    pub conn: ConnId,
    pub msc: MscNr,
    pub cause: BssapCause,
    pub rr_cause: Option<RrCause>,
}

#[derive(Debug)]
pub struct BssapHandoverRequired {
    pub conn: ConnId,
    pub msc: MscNr,
    pub target: CellId,
    pub cause: BssapCause,
}

#[derive(Debug)]
pub struct BssapHandoverRequestAck {
    pub conn: ConnId,
    pub msc: MscNr,
    pub msc_ref: u32,
    /// RR Handover Command for the MS, relayed by the old BSC
    pub l3: L3Msg,
}

#[derive(Debug)]
pub struct BssapHandoverDetect {
    pub conn: ConnId,
    pub msc: MscNr,
}

#[derive(Debug)]
pub struct BssapHandoverComplete {
    pub conn: ConnId,
    pub msc: MscNr,
}

/// Intra-BSC handover done, informs the MSC of the new cell
#[derive(Debug)]
pub struct BssapHandoverPerformed {
    pub conn: ConnId,
    pub msc: MscNr,
    pub cell: CellId,
    pub ch_mode_rate: ChannelModeAndRate,
}

#[derive(Debug)]
pub struct BssapHandoverFailure {
    pub conn: ConnId,
    pub msc: MscNr,
    /// Set when this answers a Handover Request
    pub msc_ref: Option<u32>,
    pub cause: BssapCause,
}

#[derive(Debug)]
pub struct BssapClearRequest {
    pub conn: ConnId,
    pub msc: MscNr,
    pub cause: BssapCause,
}

#[derive(Debug)]
pub struct BssapClearComplete {
    pub conn: ConnId,
    pub msc: MscNr,
}

#[derive(Debug)]
pub struct BssapClassmarkUpdate {
    pub conn: ConnId,
    pub msc: MscNr,
    pub classmark: Classmark,
}

#[derive(Debug)]
pub struct BssapCipherModeComplete {
    pub conn: ConnId,
    pub msc: MscNr,
    pub alg_id: u8,
}

#[derive(Debug)]
pub struct BssapCipherModeReject {
    pub conn: ConnId,
    pub msc: MscNr,
    pub cause: BssapCause,
}
