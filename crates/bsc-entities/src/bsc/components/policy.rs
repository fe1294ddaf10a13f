//! Pluggable decisions: which channel mode a connection gets, and when a connection
//! should be handed over to a neighbour cell.

use bsc_config::{CfgBts, CfgHandover};
use bsc_core::{CellId, ChanMode, ChannelModeAndRate, ChannelRate, LchanType, MeasRepRing};

/// Free lchans of a BTS per type, as seen by the channel selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelLoad {
    pub free_sdcch: usize,
    pub free_tch_f: usize,
    pub free_tch_h: usize,
}

impl ChannelLoad {
    pub fn free(&self, t: LchanType) -> usize {
        match t {
            LchanType::Sdcch => self.free_sdcch,
            LchanType::TchF => self.free_tch_f,
            LchanType::TchH => self.free_tch_h,
            LchanType::None => 0,
        }
    }

    /// Counts one more free lchan of type `t`, e.g. the lchan a connection already holds
    pub fn add_free(&mut self, t: LchanType) {
        match t {
            LchanType::Sdcch => self.free_sdcch += 1,
            LchanType::TchF => self.free_tch_f += 1,
            LchanType::TchH => self.free_tch_h += 1,
            LchanType::None => {}
        }
    }
}

pub trait CodecPolicy: Send {
    /// Picks the mode for a connection on `bts` out of `prefs`, most preferred first.
    /// None when no mode is viable.
    fn select(&self, bts: &CfgBts, prefs: &[ChannelModeAndRate], load: &ChannelLoad) -> Option<ChannelModeAndRate>;
}

/// First preference the BTS supports and has a free lchan for
#[derive(Debug, Default)]
pub struct DefaultCodecPolicy;

impl DefaultCodecPolicy {
    /// Checks the BTS codec list and half rate support. EFR exists only at full rate.
    pub fn mode_supported(bts: &CfgBts, cmr: &ChannelModeAndRate) -> bool {
        if !bts.supports_rate(cmr.chan_rate) {
            return false;
        }
        match cmr.chan_mode {
            ChanMode::Signalling => true,
            ChanMode::DataCsd => cmr.chan_rate != ChannelRate::Sdcch,
            ChanMode::SpeechEfr if cmr.chan_rate == ChannelRate::Half => false,
            mode => cmr.chan_rate != ChannelRate::Sdcch && bts.speech_codecs.contains(&mode),
        }
    }
}

impl CodecPolicy for DefaultCodecPolicy {
    fn select(&self, bts: &CfgBts, prefs: &[ChannelModeAndRate], load: &ChannelLoad) -> Option<ChannelModeAndRate> {
        prefs
            .iter()
            .find(|cmr| Self::mode_supported(bts, cmr) && load.free(cmr.chan_rate.lchan_type()) > 0)
            .copied()
    }
}

pub trait HandoverDecision: Send {
    /// Returns the cell a connection served by `serving` should move to, if any
    fn evaluate(&self, serving: &CfgBts, meas: &MeasRepRing, cfg: &CfgHandover) -> Option<CellId>;
}

/// Picks the strongest neighbour that beats the serving cell by the configured
/// hysteresis, averaged over the last `window` reports.
#[derive(Debug, Default)]
pub struct DefaultHandoverDecision;

impl HandoverDecision for DefaultHandoverDecision {
    fn evaluate(&self, serving: &CfgBts, meas: &MeasRepRing, cfg: &CfgHandover) -> Option<CellId> {
        if meas.len() < cfg.min_reports.max(1) {
            return None;
        }
        let own = meas.avg_rxlev(cfg.window)?;
        serving
            .neighbors
            .iter()
            .filter_map(|cell| meas.avg_neighbor_rxlev(*cell, cfg.window).map(|lev| (*cell, lev)))
            .filter(|(_, lev)| *lev >= own + cfg.hysteresis as u32)
            .max_by_key(|(_, lev)| *lev)
            .map(|(cell, _)| cell)
    }
}
