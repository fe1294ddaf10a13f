use core::fmt::Display;

use bsc_core::BscTime;
use bsc_core::Sap;
use bsc_core::bsc_entities::BscEntity;

use crate::control::*;

use super::abis::*;
use super::bssap::*;
use super::mgcp::*;

/// Exhaustive list of primitives for use in the SapMsg struct
#[derive(Debug)]
pub enum SapMsgInner {
    // Abis-SAP, BSC -> BTS
    AbisChanActivReq(AbisChanActivReq),
    AbisRfChanRelReq(AbisRfChanRelReq),
    AbisModeModifyReq(AbisModeModifyReq),
    AbisPchanSwitchReq(AbisPchanSwitchReq),
    AbisImmAssignCmd(AbisImmAssignCmd),
    AbisPagingCmd(AbisPagingCmd),
    AbisDataReq(AbisDataReq),

    // Abis-SAP, BTS -> BSC
    AbisChanActivAck(AbisChanActivAck),
    AbisChanActivNack(AbisChanActivNack),
    AbisRfChanRelAck(AbisRfChanRelAck),
    AbisModeModifyAck(AbisModeModifyAck),
    AbisModeModifyNack(AbisModeModifyNack),
    AbisPchanSwitchAck(AbisPchanSwitchAck),
    AbisPchanSwitchNack(AbisPchanSwitchNack),
    AbisConnFailInd(AbisConnFailInd),
    AbisEstablishInd(AbisEstablishInd),
    AbisChanRqd(AbisChanRqd),
    AbisDataInd(AbisDataInd),
    AbisHandoverDetect(AbisHandoverDetect),
    AbisMeasRes(AbisMeasRes),
    AbisTrxReady(AbisTrxReady),
    AbisTrxDown(AbisTrxDown),

    // MGCP-SAP
    MgcpConnectReq(MgcpConnectReq),
    MgcpConnectAck(MgcpConnectAck),
    MgcpConnectNack(MgcpConnectNack),
    MgcpEndpointRelease(MgcpEndpointRelease),

    // A-SAP, MSC -> BSC
    BssapAssignmentRequest(BssapAssignmentRequest),
    BssapHandoverCommand(BssapHandoverCommand),
    BssapHandoverRequiredReject(BssapHandoverRequiredReject),
    BssapHandoverRequest(BssapHandoverRequest),
    BssapClearCommand(BssapClearCommand),
    BssapDtapDl(BssapDtapDl),
    BssapCipherModeCommand(BssapCipherModeCommand),
    BssapPaging(BssapPaging),
    BssapLinkDown(BssapLinkDown),

    // A-SAP, either direction
    BssapReset(BssapReset),
    BssapResetAck(BssapResetAck),

    // A-SAP, BSC -> MSC
    BssapCompleteL3(BssapCompleteL3),
    BssapDtapUl(BssapDtapUl),
    BssapAssignmentComplete(BssapAssignmentComplete),
    BssapAssignmentFailure(BssapAssignmentFailure),
    BssapHandoverRequired(BssapHandoverRequired),
    BssapHandoverRequestAck(BssapHandoverRequestAck),
    BssapHandoverDetect(BssapHandoverDetect),
    BssapHandoverComplete(BssapHandoverComplete),
    BssapHandoverPerformed(BssapHandoverPerformed),
    BssapHandoverFailure(BssapHandoverFailure),
    BssapClearRequest(BssapClearRequest),
    BssapClearComplete(BssapClearComplete),
    BssapClassmarkUpdate(BssapClassmarkUpdate),
    BssapCipherModeComplete(BssapCipherModeComplete),
    BssapCipherModeReject(BssapCipherModeReject),

    // Control
    ControlHandoverStart(ControlHandoverStart),
    ControlHandoverEnd(ControlHandoverEnd),
    ControlLchanReset(ControlLchanReset),
}

impl Display for SapMsgInner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            SapMsgInner::AbisChanActivReq(_) => "AbisChanActivReq",
            SapMsgInner::AbisRfChanRelReq(_) => "AbisRfChanRelReq",
            SapMsgInner::AbisModeModifyReq(_) => "AbisModeModifyReq",
            SapMsgInner::AbisPchanSwitchReq(_) => "AbisPchanSwitchReq",
            SapMsgInner::AbisImmAssignCmd(_) => "AbisImmAssignCmd",
            SapMsgInner::AbisPagingCmd(_) => "AbisPagingCmd",
            SapMsgInner::AbisDataReq(_) => "AbisDataReq",
            SapMsgInner::AbisChanActivAck(_) => "AbisChanActivAck",
            SapMsgInner::AbisChanActivNack(_) => "AbisChanActivNack",
            SapMsgInner::AbisRfChanRelAck(_) => "AbisRfChanRelAck",
            SapMsgInner::AbisModeModifyAck(_) => "AbisModeModifyAck",
            SapMsgInner::AbisModeModifyNack(_) => "AbisModeModifyNack",
            SapMsgInner::AbisPchanSwitchAck(_) => "AbisPchanSwitchAck",
            SapMsgInner::AbisPchanSwitchNack(_) => "AbisPchanSwitchNack",
            SapMsgInner::AbisConnFailInd(_) => "AbisConnFailInd",
            SapMsgInner::AbisEstablishInd(_) => "AbisEstablishInd",
            SapMsgInner::AbisChanRqd(_) => "AbisChanRqd",
            SapMsgInner::AbisDataInd(_) => "AbisDataInd",
            SapMsgInner::AbisHandoverDetect(_) => "AbisHandoverDetect",
            SapMsgInner::AbisMeasRes(_) => "AbisMeasRes",
            SapMsgInner::AbisTrxReady(_) => "AbisTrxReady",
            SapMsgInner::AbisTrxDown(_) => "AbisTrxDown",
            SapMsgInner::MgcpConnectReq(_) => "MgcpConnectReq",
            SapMsgInner::MgcpConnectAck(_) => "MgcpConnectAck",
            SapMsgInner::MgcpConnectNack(_) => "MgcpConnectNack",
            SapMsgInner::MgcpEndpointRelease(_) => "MgcpEndpointRelease",
            SapMsgInner::BssapAssignmentRequest(_) => "BssapAssignmentRequest",
            SapMsgInner::BssapHandoverCommand(_) => "BssapHandoverCommand",
            SapMsgInner::BssapHandoverRequiredReject(_) => "BssapHandoverRequiredReject",
            SapMsgInner::BssapHandoverRequest(_) => "BssapHandoverRequest",
            SapMsgInner::BssapClearCommand(_) => "BssapClearCommand",
            SapMsgInner::BssapDtapDl(_) => "BssapDtapDl",
            SapMsgInner::BssapCipherModeCommand(_) => "BssapCipherModeCommand",
            SapMsgInner::BssapPaging(_) => "BssapPaging",
            SapMsgInner::BssapLinkDown(_) => "BssapLinkDown",
            SapMsgInner::BssapReset(_) => "BssapReset",
            SapMsgInner::BssapResetAck(_) => "BssapResetAck",
            SapMsgInner::BssapCompleteL3(_) => "BssapCompleteL3",
            SapMsgInner::BssapDtapUl(_) => "BssapDtapUl",
            SapMsgInner::BssapAssignmentComplete(_) => "BssapAssignmentComplete",
            SapMsgInner::BssapAssignmentFailure(_) => "BssapAssignmentFailure",
            SapMsgInner::BssapHandoverRequired(_) => "BssapHandoverRequired",
            SapMsgInner::BssapHandoverRequestAck(_) => "BssapHandoverRequestAck",
            SapMsgInner::BssapHandoverDetect(_) => "BssapHandoverDetect",
            SapMsgInner::BssapHandoverComplete(_) => "BssapHandoverComplete",
            SapMsgInner::BssapHandoverPerformed(_) => "BssapHandoverPerformed",
            SapMsgInner::BssapHandoverFailure(_) => "BssapHandoverFailure",
            SapMsgInner::BssapClearRequest(_) => "BssapClearRequest",
            SapMsgInner::BssapClearComplete(_) => "BssapClearComplete",
            SapMsgInner::BssapClassmarkUpdate(_) => "BssapClassmarkUpdate",
            SapMsgInner::BssapCipherModeComplete(_) => "BssapCipherModeComplete",
            SapMsgInner::BssapCipherModeReject(_) => "BssapCipherModeReject",
            SapMsgInner::ControlHandoverStart(_) => "ControlHandoverStart",
            SapMsgInner::ControlHandoverEnd(_) => "ControlHandoverEnd",
            SapMsgInner::ControlLchanReset(_) => "ControlLchanReset",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
pub struct SapMsg {
    pub sap: Sap,
    pub src: BscEntity,
    pub dest: BscEntity,
    /// BSC time at the time the message was created
    pub dltime: BscTime,
    pub msg: SapMsgInner,
}

impl SapMsg {
    pub fn new(sap: Sap, src: BscEntity, dest: BscEntity, dltime: BscTime, msg: SapMsgInner) -> Self {
        Self { sap, src, dest, dltime, msg }
    }

    pub fn get_source(&self) -> &BscEntity {
        &self.src
    }
    pub fn get_dest(&self) -> &BscEntity {
        &self.dest
    }
    pub fn get_sap(&self) -> &Sap {
        &self.sap
    }
}
