use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use bsc_core::ranges::{NriRange, NriRanges};
use bsc_core::{CellId, ChanMode, ChannelRate, Counters, MscNr, PchanKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigErr {
    #[error("at least one BTS must be configured")]
    NoBts,
    #[error("at least one MSC must be configured")]
    NoMsc,
    #[error("duplicate BTS nr {0}")]
    DuplicateBts(u8),
    #[error("duplicate cell {0} on BTS {1}")]
    DuplicateCell(CellId, u8),
    #[error("BTS {bts} TRX {trx}: expected 8 timeslots, got {got}")]
    TimeslotCount { bts: u8, trx: u8, got: usize },
    #[error("BTS {0} has no TRX")]
    NoTrx(u8),
    #[error("duplicate MSC nr {0}")]
    DuplicateMsc(MscNr),
    #[error("nri_bitlen must be 1..=15, got {0}")]
    NriBitlen(u8),
    #[error("MSC {msc}: {err}")]
    MscNri { msc: MscNr, err: String },
    #[error("null NRI: {0}")]
    NullNri(String),
    #[error("paging max_attempts must be at least 1")]
    PagingAttempts,
    #[error("tick_ms must be non-zero")]
    TickMs,
}

#[derive(Debug, Clone)]
pub struct CfgNetInfo {
    pub mcc: u16,
    pub mnc: u16,
    /// Number of NRI bits in a TMSI
    pub nri_bitlen: u8,
    /// NRI values that never select an MSC
    pub null_nri: NriRanges,
}

/// Supervision timers, all in milliseconds
#[derive(Debug, Clone)]
pub struct CfgTimers {
    /// lchan WAIT_ACTIV_ACK
    pub chan_activ_ack_ms: u64,
    /// lchan WAIT_RF_RELEASE_ACK
    pub rf_release_ack_ms: u64,
    /// TS WAIT_PDCH_ACT / WAIT_PDCH_DEACT
    pub pdch_switch_ms: u64,
    /// Immediate assignment until the initial L3 message arrives
    pub t3101_ms: u64,
    /// Each waiting state of an assignment
    pub assignment_ms: u64,
    /// Each waiting state of a handover
    pub handover_ms: u64,
    /// Outgoing inter-BSC handover, waiting for the MSC to clear
    pub moho_clear_ms: u64,
    /// Clear Request sent, waiting for the Clear Command
    pub clear_wait_ms: u64,
    /// Paging supervision
    pub t3113_ms: u64,
}

impl Default for CfgTimers {
    fn default() -> Self {
        Self {
            chan_activ_ack_ms: 4000,
            rf_release_ack_ms: 4000,
            pdch_switch_ms: 4000,
            t3101_ms: 10000,
            assignment_ms: 10000,
            handover_ms: 10000,
            moho_clear_ms: 20000,
            clear_wait_ms: 10000,
            t3113_ms: 7000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CfgPaging {
    /// Interval between retransmissions of a page
    pub retransmit_ms: u64,
    /// Total number of paging transmissions per BTS
    pub max_attempts: u32,
}

impl Default for CfgPaging {
    fn default() -> Self {
        Self { retransmit_ms: 1000, max_attempts: 3 }
    }
}

#[derive(Debug, Clone)]
pub struct CfgHandover {
    /// Run the measurement based handover decision
    pub enabled: bool,
    /// Number of measurement reports averaged
    pub window: usize,
    /// Required minimum of reports before deciding
    pub min_reports: usize,
    /// A neighbour must be this much stronger than the serving cell
    pub hysteresis: u8,
}

impl Default for CfgHandover {
    fn default() -> Self {
        Self { enabled: true, window: 4, min_reports: 4, hysteresis: 5 }
    }
}

#[derive(Debug, Clone)]
pub struct CfgTrx {
    pub nr: u8,
    pub timeslots: Vec<PchanKind>,
}

#[derive(Debug, Clone)]
pub struct CfgBts {
    pub nr: u8,
    pub cell: CellId,
    /// PCU attached, dynamic timeslots idle as PDCH
    pub gprs: bool,
    /// Speech codecs the BTS supports
    pub speech_codecs: Vec<ChanMode>,
    pub half_rate: bool,
    /// Neighbour cells. Cells not served by a local BTS belong to a remote BSC.
    pub neighbors: Vec<CellId>,
    pub trx: Vec<CfgTrx>,
}

impl CfgBts {
    pub fn new(nr: u8, cell: CellId, trx: Vec<CfgTrx>) -> Self {
        Self {
            nr,
            cell,
            gprs: false,
            speech_codecs: vec![ChanMode::SpeechV1, ChanMode::SpeechEfr, ChanMode::SpeechAmr],
            half_rate: true,
            neighbors: vec![],
            trx,
        }
    }

    pub fn supports_rate(&self, rate: ChannelRate) -> bool {
        rate != ChannelRate::Half || self.half_rate
    }
}

#[derive(Debug, Clone)]
pub struct CfgMsc {
    pub nr: MscNr,
    pub allow_emergency: bool,
    pub nri: NriRanges,
}

#[derive(Debug, Clone)]
pub struct BscConfig {
    pub debug_log: Option<String>,

    /// Router tick interval
    pub tick_ms: u64,
    /// Maximum number of DTAP messages held while a procedure is in flight
    pub dtap_queue_max: usize,

    pub net: CfgNetInfo,
    pub timers: CfgTimers,
    pub paging: CfgPaging,
    pub handover: CfgHandover,
    pub bts: Vec<CfgBts>,
    pub msc: Vec<CfgMsc>,
}

impl BscConfig {
    pub fn new(mcc: u16, mnc: u16) -> Self {
        BscConfig {
            debug_log: None,
            tick_ms: 100,
            dtap_queue_max: 8,
            net: CfgNetInfo { mcc, mnc, nri_bitlen: 10, null_nri: NriRanges::empty() },
            timers: CfgTimers::default(),
            paging: CfgPaging::default(),
            handover: CfgHandover::default(),
            bts: vec![],
            msc: vec![],
        }
    }

    pub fn bts_by_cell(&self, cell: CellId) -> Option<&CfgBts> {
        self.bts.iter().find(|b| b.cell == cell)
    }

    /// Validate that all required configuration fields are properly set.
    pub fn validate(&self) -> Result<(), ConfigErr> {
        if self.tick_ms == 0 {
            return Err(ConfigErr::TickMs);
        }
        if self.bts.is_empty() {
            return Err(ConfigErr::NoBts);
        }
        if self.msc.is_empty() {
            return Err(ConfigErr::NoMsc);
        }
        if self.paging.max_attempts == 0 {
            return Err(ConfigErr::PagingAttempts);
        }

        let mut bts_nrs = HashSet::new();
        let mut cells = HashSet::new();
        for bts in &self.bts {
            if !bts_nrs.insert(bts.nr) {
                return Err(ConfigErr::DuplicateBts(bts.nr));
            }
            if !cells.insert(bts.cell) {
                return Err(ConfigErr::DuplicateCell(bts.cell, bts.nr));
            }
            if bts.trx.is_empty() {
                return Err(ConfigErr::NoTrx(bts.nr));
            }
            for trx in &bts.trx {
                if trx.timeslots.len() != 8 {
                    return Err(ConfigErr::TimeslotCount { bts: bts.nr, trx: trx.nr, got: trx.timeslots.len() });
                }
            }
        }

        let bitlen = self.net.nri_bitlen;
        if bitlen == 0 || bitlen > 15 {
            return Err(ConfigErr::NriBitlen(bitlen));
        }
        self.net.null_nri.check_bitlen(bitlen).map_err(|e| ConfigErr::NullNri(e.to_string()))?;

        let mut msc_nrs = HashSet::new();
        for msc in &self.msc {
            if !msc_nrs.insert(msc.nr) {
                return Err(ConfigErr::DuplicateMsc(msc.nr));
            }
            msc.nri
                .check_bitlen(bitlen)
                .map_err(|e| ConfigErr::MscNri { msc: msc.nr, err: e.to_string() })?;
        }

        Ok(())
    }

    /// NRI ranges shared by more than one MSC, as (lower nr, higher nr, overlap).
    /// Such a configuration is usable; the lower numbered MSC wins the overlap.
    pub fn nri_overlaps(&self) -> Vec<(MscNr, MscNr, NriRange)> {
        let mut ret = vec![];
        for (i, a) in self.msc.iter().enumerate() {
            for b in self.msc.iter().skip(i + 1) {
                if let Some(overlap) = a.nri.overlap(&b.nri) {
                    ret.push((a.nr.min(b.nr), a.nr.max(b.nr), overlap));
                }
            }
        }
        ret
    }
}

/// Mutable, stack-editable state (lock-protected).
#[derive(Debug, Clone, Default)]
pub struct BscState {
    pub counters: Counters,
    /// Number of live subscriber connections
    pub num_conns: usize,
}

/// Global shared configuration: immutable config + mutable state.
#[derive(Clone)]
pub struct SharedConfig {
    /// Read-only configuration (immutable after construction).
    cfg: Arc<BscConfig>,
    /// Mutable state guarded with RwLock (write by the stack, read by others).
    state: Arc<RwLock<BscState>>,
}

impl SharedConfig {
    pub fn from_config(cfg: BscConfig) -> Result<Self, ConfigErr> {
        Self::from_parts(cfg, BscState::default())
    }

    pub fn from_parts(cfg: BscConfig, state: BscState) -> Result<Self, ConfigErr> {
        // Check config for validity before returning the SharedConfig object
        cfg.validate()?;

        for (a, b, overlap) in cfg.nri_overlaps() {
            tracing::warn!(
                "NRI range {}..={} configured on MSC {} and MSC {}, MSC {} takes precedence",
                overlap.first,
                overlap.last,
                a,
                b,
                a
            );
        }

        Ok(Self { cfg: Arc::new(cfg), state: Arc::new(RwLock::new(state)) })
    }

    /// Access immutable config.
    pub fn config(&self) -> Arc<BscConfig> {
        Arc::clone(&self.cfg)
    }

    /// Read guard for mutable state. A poisoned lock is recovered, the state only holds counters.
    pub fn state_read(&self) -> std::sync::RwLockReadGuard<'_, BscState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Write guard for mutable state.
    pub fn state_write(&self) -> std::sync::RwLockWriteGuard<'_, BscState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_trx() -> Vec<CfgTrx> {
        vec![CfgTrx { nr: 0, timeslots: vec![PchanKind::CcchSdcch4; 8] }]
    }

    fn minimal() -> BscConfig {
        let mut cfg = BscConfig::new(1, 1);
        cfg.bts.push(CfgBts::new(0, CellId { lac: 1, ci: 1 }, one_trx()));
        cfg.msc.push(CfgMsc { nr: 0, allow_emergency: true, nri: NriRanges::empty() });
        cfg
    }

    #[test]
    fn test_validate_ok() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn test_validate_errors() {
        let mut cfg = minimal();
        cfg.msc.clear();
        assert_eq!(cfg.validate(), Err(ConfigErr::NoMsc));

        let mut cfg = minimal();
        cfg.bts[0].trx[0].timeslots.pop();
        assert_eq!(cfg.validate(), Err(ConfigErr::TimeslotCount { bts: 0, trx: 0, got: 7 }));

        let mut cfg = minimal();
        cfg.net.nri_bitlen = 4;
        cfg.msc[0].nri = NriRanges::from_vec_tuple(vec![(0, 16)]).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigErr::MscNri { msc: 0, .. })));
    }

    #[test]
    fn test_nri_overlap_is_reported() {
        let mut cfg = minimal();
        cfg.msc[0].nri = NriRanges::from_vec_tuple(vec![(0, 9)]).unwrap();
        cfg.msc.push(CfgMsc { nr: 3, allow_emergency: false, nri: NriRanges::from_vec_tuple(vec![(5, 20)]).unwrap() });
        assert!(cfg.validate().is_ok());
        let overlaps = cfg.nri_overlaps();
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].0, 0);
        assert_eq!(overlaps[0].2, NriRange { first: 5, last: 9 });
    }
}
