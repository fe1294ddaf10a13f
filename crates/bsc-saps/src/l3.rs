//! Layer 3 messages exchanged with the MS, reduced to the content the BSC core acts on.
//! Everything the BSC relays transparently is carried as opaque DTAP.

use bsc_core::{CellId, ChannelModeAndRate, LchanId, MobileIdentity, RrCause};

/// CM service type of a CM Service Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmServiceType {
    MoCall,
    Emergency,
    Sms,
    SupplementaryService,
}

/// Protocol discriminator of relayed DTAP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoDisc {
    Mm,
    Cc,
    Sms,
    Ss,
    Rr,
}

/// MS classmark as reported in Classmark Change / initial messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classmark {
    pub rev_level: u8,
    /// RF power capability, 1..=5
    pub power_class: u8,
    /// Bitmask of supported A5 algorithms, bit n = A5/n
    pub a5_support: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L3Msg {
    // Initial messages carried in the establish indication
    PagingResponse { mi: MobileIdentity },
    LocationUpdatingRequest { mi: MobileIdentity, power_class: u8 },
    CmServiceRequest { mi: MobileIdentity, service: CmServiceType, power_class: u8 },

    // RR, handled by the BSC
    ClassmarkChange { classmark: Classmark },
    CipheringModeCommand { alg_id: u8 },
    CipheringModeComplete,
    AssignmentCommand { lchan: LchanId, ch_mode_rate: ChannelModeAndRate },
    AssignmentComplete,
    AssignmentFailure { rr_cause: RrCause },
    HandoverCommand { target: CellId, lchan: Option<LchanId>, ho_ref: u8 },
    HandoverComplete,
    HandoverFailure { rr_cause: RrCause },
    ChannelModeModify { ch_mode_rate: ChannelModeAndRate },
    ChannelModeModifyAck { ch_mode_rate: ChannelModeAndRate },
    ChannelRelease { rr_cause: RrCause },

    /// Relayed transparently between MS and MSC
    Dtap { pdisc: ProtoDisc, payload: Vec<u8> },
}

impl L3Msg {
    /// Mobile identity of an initial layer 3 message
    pub fn mobile_identity(&self) -> Option<&MobileIdentity> {
        match self {
            L3Msg::PagingResponse { mi } => Some(mi),
            L3Msg::LocationUpdatingRequest { mi, .. } => Some(mi),
            L3Msg::CmServiceRequest { mi, .. } => Some(mi),
            _ => None,
        }
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, L3Msg::CmServiceRequest { service: CmServiceType::Emergency, .. })
    }

    pub fn is_paging_response(&self) -> bool {
        matches!(self, L3Msg::PagingResponse { .. })
    }

    pub fn is_initial(&self) -> bool {
        self.mobile_identity().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_classification() {
        let emerg = L3Msg::CmServiceRequest { mi: MobileIdentity::None, service: CmServiceType::Emergency, power_class: 4 };
        assert!(emerg.is_emergency());
        assert!(emerg.is_initial());
        let call = L3Msg::CmServiceRequest { mi: MobileIdentity::Tmsi(1), service: CmServiceType::MoCall, power_class: 4 };
        assert!(!call.is_emergency());
        assert!(!L3Msg::CipheringModeComplete.is_initial());
        assert!(L3Msg::PagingResponse { mi: MobileIdentity::Tmsi(7) }.is_paging_response());
    }
}
