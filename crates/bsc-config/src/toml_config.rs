use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bsc_core::ranges::NriRanges;
use bsc_core::{CellId, ChanMode, MscNr, PchanKind};
use serde::Deserialize;
use toml::Value;

use super::bsc_config::{BscConfig, BscState, CfgBts, CfgHandover, CfgMsc, CfgPaging, CfgTimers, CfgTrx, SharedConfig};

/// Build `SharedConfig` from a TOML configuration string
pub fn from_toml_str(toml_str: &str) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let root: TomlConfigRoot = toml::from_str(toml_str)?;

    // Various sanity checks
    let expected_config_version = "0.1";
    if !root.config_version.eq(expected_config_version) {
        return Err(format!(
            "Unrecognized config_version: {}, expect {}",
            root.config_version, expected_config_version
        )
        .into());
    }
    if !root.extra.is_empty() {
        return Err(format!("Unrecognized top-level fields: {:?}", sorted_keys(&root.extra)).into());
    }
    if !root.net_info.extra.is_empty() {
        return Err(format!("Unrecognized fields in net_info: {:?}", sorted_keys(&root.net_info.extra)).into());
    }
    if let Some(ref t) = root.timers {
        if !t.extra.is_empty() {
            return Err(format!("Unrecognized fields in timers: {:?}", sorted_keys(&t.extra)).into());
        }
    }
    if let Some(ref p) = root.paging {
        if !p.extra.is_empty() {
            return Err(format!("Unrecognized fields in paging: {:?}", sorted_keys(&p.extra)).into());
        }
    }
    if let Some(ref h) = root.handover {
        if !h.extra.is_empty() {
            return Err(format!("Unrecognized fields in handover: {:?}", sorted_keys(&h.extra)).into());
        }
    }
    for bts in &root.bts {
        if !bts.extra.is_empty() {
            return Err(format!("Unrecognized fields in bts {}: {:?}", bts.nr, sorted_keys(&bts.extra)).into());
        }
        for trx in &bts.trx {
            if !trx.extra.is_empty() {
                return Err(format!("Unrecognized fields in bts {} trx {}: {:?}", bts.nr, trx.nr, sorted_keys(&trx.extra)).into());
            }
        }
    }
    for msc in &root.msc {
        if !msc.extra.is_empty() {
            return Err(format!("Unrecognized fields in msc {}: {:?}", msc.nr, sorted_keys(&msc.extra)).into());
        }
    }

    // Build config from required and optional values
    let mut cfg = BscConfig::new(root.net_info.mcc, root.net_info.mnc);
    cfg.debug_log = root.debug_log;
    if let Some(v) = root.tick_ms {
        cfg.tick_ms = v;
    }
    if let Some(v) = root.dtap_queue_max {
        cfg.dtap_queue_max = v;
    }
    if let Some(v) = root.net_info.nri_bitlen {
        cfg.net.nri_bitlen = v;
    }
    if let Some(v) = root.net_info.null_nri {
        cfg.net.null_nri = nri_ranges_from_dto(v)?;
    }

    if let Some(t) = root.timers {
        apply_timers_patch(&mut cfg.timers, t);
    }
    if let Some(p) = root.paging {
        apply_paging_patch(&mut cfg.paging, p);
    }
    if let Some(h) = root.handover {
        apply_handover_patch(&mut cfg.handover, h);
    }

    for bts in root.bts {
        cfg.bts.push(bts_from_dto(bts));
    }
    for msc in root.msc {
        cfg.msc.push(msc_from_dto(msc)?);
    }

    Ok(SharedConfig::from_parts(cfg, BscState::default())?)
}

/// Build `SharedConfig` from any reader.
pub fn from_reader<R: Read>(reader: R) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let mut contents = String::new();
    let mut reader = BufReader::new(reader);
    reader.read_to_string(&mut contents)?;
    from_toml_str(&contents)
}

/// Build `SharedConfig` from a file path.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let f = File::open(path)?;
    let r = BufReader::new(f);
    let cfg = from_reader(r)?;
    Ok(cfg)
}

fn nri_ranges_from_dto(v: Vec<[u16; 2]>) -> Result<NriRanges, Box<dyn std::error::Error>> {
    Ok(NriRanges::from_vec_tuple(v.into_iter().map(|[a, b]| (a, b)).collect())?)
}

fn apply_timers_patch(dst: &mut CfgTimers, src: TimersDto) {
    if let Some(v) = src.chan_activ_ack_ms {
        dst.chan_activ_ack_ms = v;
    }
    if let Some(v) = src.rf_release_ack_ms {
        dst.rf_release_ack_ms = v;
    }
    if let Some(v) = src.pdch_switch_ms {
        dst.pdch_switch_ms = v;
    }
    if let Some(v) = src.t3101_ms {
        dst.t3101_ms = v;
    }
    if let Some(v) = src.assignment_ms {
        dst.assignment_ms = v;
    }
    if let Some(v) = src.handover_ms {
        dst.handover_ms = v;
    }
    if let Some(v) = src.moho_clear_ms {
        dst.moho_clear_ms = v;
    }
    if let Some(v) = src.clear_wait_ms {
        dst.clear_wait_ms = v;
    }
    if let Some(v) = src.t3113_ms {
        dst.t3113_ms = v;
    }
}

fn apply_paging_patch(dst: &mut CfgPaging, src: PagingDto) {
    if let Some(v) = src.retransmit_ms {
        dst.retransmit_ms = v;
    }
    if let Some(v) = src.max_attempts {
        dst.max_attempts = v;
    }
}

fn apply_handover_patch(dst: &mut CfgHandover, src: HandoverDto) {
    if let Some(v) = src.enabled {
        dst.enabled = v;
    }
    if let Some(v) = src.window {
        dst.window = v;
    }
    if let Some(v) = src.min_reports {
        dst.min_reports = v;
    }
    if let Some(v) = src.hysteresis {
        dst.hysteresis = v;
    }
}

fn bts_from_dto(src: BtsDto) -> CfgBts {
    let trx = src.trx.into_iter().map(|t| CfgTrx { nr: t.nr, timeslots: t.timeslots }).collect();
    let mut bts = CfgBts::new(src.nr, CellId { lac: src.lac, ci: src.ci }, trx);
    if let Some(v) = src.gprs {
        bts.gprs = v;
    }
    if let Some(v) = src.half_rate {
        bts.half_rate = v;
    }
    if let Some(v) = src.speech_codecs {
        bts.speech_codecs = v;
    }
    if let Some(v) = src.neighbors {
        bts.neighbors = v.into_iter().map(|c| CellId { lac: c.lac, ci: c.ci }).collect();
    }
    bts
}

fn msc_from_dto(src: MscDto) -> Result<CfgMsc, Box<dyn std::error::Error>> {
    let nri = match src.nri {
        Some(v) => nri_ranges_from_dto(v)?,
        None => NriRanges::empty(),
    };
    Ok(CfgMsc { nr: src.nr, allow_emergency: src.allow_emergency.unwrap_or(true), nri })
}

fn sorted_keys(map: &HashMap<String, Value>) -> Vec<&str> {
    let mut v: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
    v.sort_unstable();
    v
}

/// ----------------------- DTOs for input shape -----------------------

#[derive(Deserialize)]
struct TomlConfigRoot {
    config_version: String,
    debug_log: Option<String>,
    tick_ms: Option<u64>,
    dtap_queue_max: Option<usize>,

    net_info: NetInfoDto,

    #[serde(default)]
    timers: Option<TimersDto>,

    #[serde(default)]
    paging: Option<PagingDto>,

    #[serde(default)]
    handover: Option<HandoverDto>,

    #[serde(default)]
    bts: Vec<BtsDto>,

    #[serde(default)]
    msc: Vec<MscDto>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct NetInfoDto {
    pub mcc: u16,
    pub mnc: u16,
    pub nri_bitlen: Option<u8>,
    /// Inclusive [first, last] pairs
    pub null_nri: Option<Vec<[u16; 2]>>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct TimersDto {
    pub chan_activ_ack_ms: Option<u64>,
    pub rf_release_ack_ms: Option<u64>,
    pub pdch_switch_ms: Option<u64>,
    pub t3101_ms: Option<u64>,
    pub assignment_ms: Option<u64>,
    pub handover_ms: Option<u64>,
    pub moho_clear_ms: Option<u64>,
    pub clear_wait_ms: Option<u64>,
    pub t3113_ms: Option<u64>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct PagingDto {
    pub retransmit_ms: Option<u64>,
    pub max_attempts: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct HandoverDto {
    pub enabled: Option<bool>,
    pub window: Option<usize>,
    pub min_reports: Option<usize>,
    pub hysteresis: Option<u8>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct CellDto {
    pub lac: u16,
    pub ci: u16,
}

#[derive(Deserialize)]
struct BtsDto {
    pub nr: u8,
    pub lac: u16,
    pub ci: u16,
    pub gprs: Option<bool>,
    pub half_rate: Option<bool>,
    pub speech_codecs: Option<Vec<ChanMode>>,
    pub neighbors: Option<Vec<CellDto>>,

    #[serde(default)]
    pub trx: Vec<TrxDto>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct TrxDto {
    pub nr: u8,
    pub timeslots: Vec<PchanKind>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct MscDto {
    pub nr: MscNr,
    pub allow_emergency: Option<bool>,
    pub nri: Option<Vec<[u16; 2]>>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
config_version = "0.1"
tick_ms = 50

[net_info]
mcc = 1
mnc = 1
nri_bitlen = 8
null_nri = [[0, 0]]

[timers]
t3113_ms = 5000

[paging]
max_attempts = 2

[[bts]]
nr = 0
lac = 23
ci = 1
gprs = true
neighbors = [{ lac = 23, ci = 2 }, { lac = 99, ci = 7 }]

[[bts.trx]]
nr = 0
timeslots = ["CCCH_SDCCH4", "SDCCH8", "TCH/F", "TCH/F", "TCH/H", "TCH/H", "TCH/F_PDCH", "TCH/F_TCH/H_PDCH"]

[[msc]]
nr = 0
nri = [[1, 99]]

[[msc]]
nr = 1
allow_emergency = false
nri = [[100, 199]]
"#;

    #[test]
    fn test_parse_example() {
        let shared = from_toml_str(EXAMPLE).unwrap();
        let cfg = shared.config();
        assert_eq!(cfg.tick_ms, 50);
        assert_eq!(cfg.net.nri_bitlen, 8);
        assert!(cfg.net.null_nri.contains(0));
        assert_eq!(cfg.timers.t3113_ms, 5000);
        assert_eq!(cfg.timers.t3101_ms, CfgTimers::default().t3101_ms);
        assert_eq!(cfg.paging.max_attempts, 2);
        assert_eq!(cfg.bts.len(), 1);
        assert!(cfg.bts[0].gprs);
        assert_eq!(cfg.bts[0].neighbors.len(), 2);
        assert_eq!(cfg.bts[0].trx[0].timeslots[6], PchanKind::DynTchFPdch);
        assert_eq!(cfg.bts[0].trx[0].timeslots[7], PchanKind::DynTchFTchHPdch);
        assert_eq!(cfg.msc.len(), 2);
        assert!(cfg.msc[0].allow_emergency);
        assert!(!cfg.msc[1].allow_emergency);
        assert!(cfg.msc[1].nri.contains(150));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let bad = EXAMPLE.replace("tick_ms = 50", "tick_ms = 50\nbogus = 1");
        assert!(from_toml_str(&bad).is_err());
        let bad = EXAMPLE.replace("gprs = true", "gprs = true\nfoo = 2");
        assert!(from_toml_str(&bad).is_err());
    }

    #[test]
    fn test_version_checked() {
        let bad = EXAMPLE.replace("config_version = \"0.1\"", "config_version = \"9.9\"");
        assert!(from_toml_str(&bad).is_err());
    }
}
