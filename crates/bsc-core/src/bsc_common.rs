/// Service access points between the BSC core and its peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sap {
    /// BSC/BTS, radio signalling link
    AbisSap,
    /// BSC/MGW, media gateway control
    MgcpSap,
    /// BSC/MSC, BSSAP over the connection-oriented transport
    ASap,

    /// Custom SAP for inter-entity control messages
    Control,
}

/// Cause values as reported by the BTS in NACKs and failure indications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RslCause {
    NormalEvent,
    RadioLinkFailure,
    HandoverAccessFailure,
    RadioResourceNotAvailable,
    EquipmentFailure,
    ChannelAlreadyActivated,
    ProtocolError,
    Other(u8),
}

/// RR cause values as carried in RR messages from/to the MS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RrCause {
    Normal,
    AbnormalUnspecified,
    AbnormalChannelUnacceptable,
    AbnormalTimerExpired,
    ChannelModeUnacceptable,
    HandoverImpossible,
    ProtocolErrorUnspecified,
}
