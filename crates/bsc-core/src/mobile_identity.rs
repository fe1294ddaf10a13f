use core::fmt;

/// Mobile identity as carried in initial layer 3 messages and paging
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum MobileIdentity {
    /// Identity could not be decoded
    None,
    /// IMSI digits
    Imsi(String),
    Tmsi(u32),
    /// IMEI digits
    Imei(String),
}

impl MobileIdentity {
    pub fn is_none(&self) -> bool {
        matches!(self, MobileIdentity::None)
    }

    pub fn tmsi(&self) -> Option<u32> {
        match self {
            MobileIdentity::Tmsi(tmsi) => Some(*tmsi),
            _ => None,
        }
    }

    /// Extract the NRI from a TMSI. The NRI occupies the `nri_bitlen` bits starting
    /// at bit 23 of the TMSI. Returns None for non-TMSI identities or an invalid bit length.
    pub fn nri(&self, nri_bitlen: u8) -> Option<u16> {
        let tmsi = self.tmsi()?;
        if nri_bitlen == 0 || nri_bitlen > 15 {
            return None;
        }
        let mask = (1u32 << nri_bitlen) - 1;
        Some(((tmsi >> (24 - nri_bitlen as u32)) & mask) as u16)
    }
}

impl fmt::Display for MobileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MobileIdentity::None => write!(f, "MI-none"),
            MobileIdentity::Imsi(imsi) => write!(f, "IMSI-{}", imsi),
            MobileIdentity::Tmsi(tmsi) => write!(f, "TMSI-0x{:08X}", tmsi),
            MobileIdentity::Imei(imei) => write!(f, "IMEI-{}", imei),
        }
    }
}

impl fmt::Debug for MobileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
