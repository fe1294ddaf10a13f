use serde::Deserialize;

/// Physical channel configuration of a timeslot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PchanKind {
    None,
    Ccch,
    CcchSdcch4,
    Sdcch8,
    #[serde(rename = "TCH/F")]
    TchF,
    #[serde(rename = "TCH/H")]
    TchH,
    Pdch,
    /// Dynamic timeslot switching between TCH/F and PDCH
    #[serde(rename = "TCH/F_PDCH")]
    DynTchFPdch,
    /// Dynamic timeslot switching between TCH/F, TCH/H and PDCH
    #[serde(rename = "TCH/F_TCH/H_PDCH")]
    DynTchFTchHPdch,
}

impl PchanKind {
    /// Number of lchans available in this configuration. Dynamic kinds have
    /// no lchans of their own; they take the count of the kind in effect.
    pub fn num_lchans(&self) -> usize {
        match self {
            PchanKind::CcchSdcch4 => 4,
            PchanKind::Sdcch8 => 8,
            PchanKind::TchF => 1,
            PchanKind::TchH => 2,
            _ => 0,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, PchanKind::DynTchFPdch | PchanKind::DynTchFTchHPdch)
    }

    /// Type of the lchans carried by this configuration, if any
    pub fn lchan_type(&self) -> LchanType {
        match self {
            PchanKind::CcchSdcch4 | PchanKind::Sdcch8 => LchanType::Sdcch,
            PchanKind::TchF => LchanType::TchF,
            PchanKind::TchH => LchanType::TchH,
            _ => LchanType::None,
        }
    }

    /// Whether a timeslot configured as `self` may ever be switched to `target`
    pub fn can_become(&self, target: PchanKind) -> bool {
        if *self == target {
            return true;
        }
        match self {
            PchanKind::DynTchFPdch => matches!(target, PchanKind::TchF | PchanKind::Pdch),
            PchanKind::DynTchFTchHPdch => matches!(target, PchanKind::TchF | PchanKind::TchH | PchanKind::Pdch),
            _ => false,
        }
    }
}

/// Logical channel type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LchanType {
    None,
    Sdcch,
    TchF,
    TchH,
}

impl LchanType {
    /// The physical channel configuration a timeslot must have to carry this lchan type
    pub fn pchan(&self) -> PchanKind {
        match self {
            LchanType::Sdcch => PchanKind::Sdcch8,
            LchanType::TchF => PchanKind::TchF,
            LchanType::TchH => PchanKind::TchH,
            LchanType::None => PchanKind::None,
        }
    }
}

/// Channel rate as requested by the MSC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRate {
    Sdcch,
    Half,
    Full,
}

impl ChannelRate {
    pub fn lchan_type(&self) -> LchanType {
        match self {
            ChannelRate::Sdcch => LchanType::Sdcch,
            ChannelRate::Half => LchanType::TchH,
            ChannelRate::Full => LchanType::TchF,
        }
    }

    pub fn from_lchan_type(t: LchanType) -> Option<Self> {
        match t {
            LchanType::Sdcch => Some(ChannelRate::Sdcch),
            LchanType::TchH => Some(ChannelRate::Half),
            LchanType::TchF => Some(ChannelRate::Full),
            LchanType::None => None,
        }
    }
}

/// Radio channel mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChanMode {
    Signalling,
    /// FR / HR speech version 1
    SpeechV1,
    /// Enhanced full rate
    SpeechEfr,
    SpeechAmr,
    /// Circuit-switched data
    DataCsd,
}

impl ChanMode {
    pub fn is_speech(&self) -> bool {
        matches!(self, ChanMode::SpeechV1 | ChanMode::SpeechEfr | ChanMode::SpeechAmr)
    }

    /// Whether a user plane stream through the media gateway is needed
    pub fn requires_voice_stream(&self) -> bool {
        !matches!(self, ChanMode::Signalling)
    }
}

/// Combination of channel mode and rate, one entry of an MSC preference list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelModeAndRate {
    pub chan_mode: ChanMode,
    pub chan_rate: ChannelRate,
    /// S15..S0 octets from the speech codec element (AMR configuration)
    pub s15_s0: u16,
}

impl ChannelModeAndRate {
    pub fn new(chan_mode: ChanMode, chan_rate: ChannelRate) -> Self {
        Self { chan_mode, chan_rate, s15_s0: 0 }
    }

    pub fn signalling() -> Self {
        Self::new(ChanMode::Signalling, ChannelRate::Sdcch)
    }
}

/// Encryption context of an lchan
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncryptionInfo {
    /// RSL algorithm identifier, 1 = A5/0 (no ciphering), 2 = A5/1, ...
    pub alg_id: u8,
    pub key: Vec<u8>,
}

impl EncryptionInfo {
    pub fn none() -> Self {
        Self { alg_id: 1, key: vec![] }
    }

    pub fn is_ciphered(&self) -> bool {
        self.alg_id > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pchan_switching() {
        assert!(PchanKind::DynTchFPdch.can_become(PchanKind::Pdch));
        assert!(PchanKind::DynTchFPdch.can_become(PchanKind::TchF));
        assert!(!PchanKind::DynTchFPdch.can_become(PchanKind::TchH));
        assert!(PchanKind::DynTchFTchHPdch.can_become(PchanKind::TchH));
        assert!(!PchanKind::TchF.can_become(PchanKind::Pdch));
        assert_eq!(PchanKind::DynTchFTchHPdch.num_lchans(), 0);
        assert_eq!(PchanKind::TchH.num_lchans(), 2);
    }
}
