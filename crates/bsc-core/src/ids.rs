use core::fmt;

/// Connection handle, allocated by the BSC core. Never reused within a run.
pub type ConnId = u32;

/// Stands in for a connection in messages sent before one exists. Never allocated.
pub const CONN_NONE: ConnId = 0;

/// Ordinal of an MSC in the pool
pub type MscNr = u8;

/// Media gateway endpoint identifier, assigned by the MGW
pub type EndpointId = u32;

/// Addresses one timeslot in the BTS tree
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TsId {
    pub bts: u8,
    pub trx: u8,
    pub ts: u8,
}

/// Addresses one logical channel (sub-slot) in a timeslot
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LchanId {
    pub bts: u8,
    pub trx: u8,
    pub ts: u8,
    pub ss: u8,
}

impl LchanId {
    pub fn new(bts: u8, trx: u8, ts: u8, ss: u8) -> Self {
        Self { bts, trx, ts, ss }
    }

    pub fn ts_id(&self) -> TsId {
        TsId { bts: self.bts, trx: self.trx, ts: self.ts }
    }
}

impl TsId {
    pub fn lchan(&self, ss: u8) -> LchanId {
        LchanId { bts: self.bts, trx: self.trx, ts: self.ts, ss }
    }
}

impl fmt::Display for LchanId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "lchan({}-{}-{}-{})", self.bts, self.trx, self.ts, self.ss)
    }
}

impl fmt::Debug for LchanId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for TsId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ts({}-{}-{})", self.bts, self.trx, self.ts)
    }
}

impl fmt::Debug for TsId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Cell identity as used for local BTSs and remote neighbour cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId {
    /// Location area code
    pub lac: u16,
    /// Cell identity
    pub ci: u16,
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "lac={} ci={}", self.lac, self.ci)
    }
}
