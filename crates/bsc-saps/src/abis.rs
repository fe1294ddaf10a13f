use bsc_core::{ChannelModeAndRate, EncryptionInfo, LchanId, MeasRep, MobileIdentity, PchanKind, RslCause, TsId};

use crate::l3::L3Msg;

/// Reason for a channel activation, signalled to the BTS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivType {
    /// Immediate assignment after a channel request
    Initial,
    Assignment,
    Handover,
}

/// Establishment cause from the RACH burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChreqReason {
    Emergency,
    Call,
    LocationUpdate,
    PagingResponse,
    Other,
}

/// Channel type the MSC wants paged subscribers to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanNeeded {
    Any,
    Sdcch,
    TchF,
    TchForH,
}

// ---------------- BSC -> BTS ----------------

#[derive(Debug)]
pub struct AbisChanActivReq {
    pub lchan: LchanId,
    pub act_type: ActivType,
    pub ch_mode_rate: ChannelModeAndRate,
    pub encr: EncryptionInfo,
    /// Handover reference, for handover activations
    pub ho_ref: Option<u8>,
}

#[derive(Debug)]
pub struct AbisRfChanRelReq {
    pub lchan: LchanId,
}

/// Change the channel mode of an active lchan
#[derive(Debug)]
pub struct AbisModeModifyReq {
    pub lchan: LchanId,
    pub ch_mode_rate: ChannelModeAndRate,
}

/// Switch a dynamic timeslot. `to == Pdch` activates PDCH, anything else deactivates it.
#[derive(Debug)]
pub struct AbisPchanSwitchReq {
    pub ts: TsId,
    pub to: PchanKind,
}

/// Immediate assignment on the CCCH. `lchan == None` is an Immediate Assignment Reject.
#[derive(Debug)]
pub struct AbisImmAssignCmd {
    pub bts: u8,
    pub ra: u8,
    pub lchan: Option<LchanId>,
}

#[derive(Debug)]
pub struct AbisPagingCmd {
    pub bts: u8,
    pub subscriber: MobileIdentity,
    pub chan_needed: ChanNeeded,
}

#[derive(Debug)]
pub struct AbisDataReq {
    pub lchan: LchanId,
    pub l3: L3Msg,
}

// ---------------- BTS -> BSC ----------------

#[derive(Debug)]
pub struct AbisChanActivAck {
    pub lchan: LchanId,
}

#[derive(Debug)]
pub struct AbisChanActivNack {
    pub lchan: LchanId,
    pub cause: RslCause,
}

#[derive(Debug)]
pub struct AbisRfChanRelAck {
    pub lchan: LchanId,
}

#[derive(Debug)]
pub struct AbisModeModifyAck {
    pub lchan: LchanId,
}

/// Mode change refused, the lchan keeps its previous mode
#[derive(Debug)]
pub struct AbisModeModifyNack {
    pub lchan: LchanId,
    pub cause: RslCause,
}

#[derive(Debug)]
pub struct AbisPchanSwitchAck {
    pub ts: TsId,
}

#[derive(Debug)]
pub struct AbisPchanSwitchNack {
    pub ts: TsId,
    pub cause: RslCause,
}

#[derive(Debug)]
pub struct AbisConnFailInd {
    pub lchan: LchanId,
    pub cause: RslCause,
}

/// Radio link layer established. Carries the initial L3 message when the MS sent one.
#[derive(Debug)]
pub struct AbisEstablishInd {
    pub lchan: LchanId,
    pub l3: Option<L3Msg>,
}

#[derive(Debug)]
pub struct AbisChanRqd {
    pub bts: u8,
    pub ra: u8,
    pub reason: ChreqReason,
}

#[derive(Debug)]
pub struct AbisDataInd {
    pub lchan: LchanId,
    pub l3: L3Msg,
}

#[derive(Debug)]
pub struct AbisHandoverDetect {
    pub lchan: LchanId,
}

#[derive(Debug)]
pub struct AbisMeasRes {
    pub lchan: LchanId,
    pub rep: MeasRep,
}

/// OML and RSL of a TRX are up
#[derive(Debug)]
pub struct AbisTrxReady {
    pub bts: u8,
    pub trx: u8,
}

/// TRX went away, all its timeslots are torn down
#[derive(Debug)]
pub struct AbisTrxDown {
    pub bts: u8,
    pub trx: u8,
}
