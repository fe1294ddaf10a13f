use std::collections::VecDeque;

use bsc_config::{CfgBts, SharedConfig};
use bsc_core::{
    BscCounter, BscTime, CellId, ChannelModeAndRate, ConnId, EncryptionInfo, LchanId, LchanType, MeasRepRing, PchanKind,
    RslCause, Sap, TsId, bsc_entities::BscEntity,
};
use bsc_saps::SapMsgInner;
use bsc_saps::abis::ActivType;

use crate::MessageQueue;
use crate::bsc::components::lchan_fsm::{LchanNotify, LchanState};
use crate::bsc::components::send_prim;
use crate::bsc::components::ts_fsm::TsState;

/// Why and for whom an lchan is being activated
#[derive(Debug, Clone)]
pub struct LchanActivateInfo {
    pub activ_for: ActivType,
    pub for_conn: ConnId,
    pub ch_mode_rate: ChannelModeAndRate,
    pub encr: EncryptionInfo,
    pub requires_voice_stream: bool,
    pub ho_ref: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct LchanReleaseInfo {
    /// Release requested while an activation was pending
    pub requested: bool,
    pub in_error: bool,
    pub cause: Option<RslCause>,
}

pub struct Lchan {
    pub id: LchanId,
    pub lchan_type: LchanType,
    pub state: LchanState,
    /// Connection this lchan is activated for
    pub owner: Option<ConnId>,
    pub activate: Option<LchanActivateInfo>,
    pub release: LchanReleaseInfo,
    /// Mode in effect, set on activation and mode modify ACK
    pub ch_mode_rate: Option<ChannelModeAndRate>,
    /// Mode requested from the BTS, waiting for its ACK
    pub modify: Option<ChannelModeAndRate>,
    pub encr: EncryptionInfo,
    /// Radio link layer established
    pub established: bool,
    pub meas_rep: MeasRepRing,
    pub deadline: Option<BscTime>,
}

impl Lchan {
    fn new(id: LchanId) -> Self {
        Self {
            id,
            lchan_type: LchanType::None,
            state: LchanState::Unused,
            owner: None,
            activate: None,
            release: LchanReleaseInfo::default(),
            ch_mode_rate: None,
            modify: None,
            encr: EncryptionInfo::none(),
            established: false,
            meas_rep: MeasRepRing::new(),
            deadline: None,
        }
    }

    /// Back to a pristine UNUSED lchan
    pub(crate) fn clear(&mut self) {
        let id = self.id;
        *self = Lchan::new(id);
    }
}

pub struct Timeslot {
    pub id: TsId,
    pub pchan_from_config: PchanKind,
    /// Kind in effect. Dynamic timeslots start out as None.
    pub pchan_is: PchanKind,
    /// Kind requested by lchans waiting for a dynamic timeslot switch
    pub pchan_want: Option<PchanKind>,
    /// Target of the switch sent to the BTS, until its answer arrives
    pub switch_to: Option<PchanKind>,
    pub state: TsState,
    /// Cleared by a PDCH activation NACK, set again on traffic use
    pub pdch_act_allowed: bool,
    pub is_oml_ready: bool,
    pub is_rsl_ready: bool,
    /// Always 8 entries, the first `pchan_is.num_lchans()` are valid
    pub lchans: Vec<Lchan>,
    pub deadline: Option<BscTime>,
}

impl Timeslot {
    fn new(id: TsId, pchan: PchanKind) -> Self {
        Self {
            id,
            pchan_from_config: pchan,
            pchan_is: PchanKind::None,
            pchan_want: None,
            switch_to: None,
            state: TsState::NotInitialized,
            pdch_act_allowed: true,
            is_oml_ready: false,
            is_rsl_ready: false,
            lchans: (0..8).map(|ss| Lchan::new(id.lchan(ss))).collect(),
            deadline: None,
        }
    }

    pub fn num_lchans(&self) -> usize {
        self.pchan_is.num_lchans()
    }

    pub fn all_lchans_unused(&self) -> bool {
        self.lchans.iter().all(|l| l.state == LchanState::Unused)
    }

    pub fn has_waiting_lchans(&self) -> bool {
        self.lchans.iter().any(|l| l.state == LchanState::WaitTsReady)
    }

    /// Whether the switch in flight, or the last one when it went unanswered, is towards PDCH
    pub fn switching_to_pdch(&self) -> bool {
        self.switch_to.is_none_or(|to| to == PchanKind::Pdch)
    }
}

pub struct Trx {
    pub nr: u8,
    pub ts: Vec<Timeslot>,
}

pub struct Bts {
    pub nr: u8,
    pub cfg: CfgBts,
    pub trx: Vec<Trx>,
}

impl Bts {
    pub fn cell(&self) -> CellId {
        self.cfg.cell
    }
}

/// The BTS / TRX / timeslot / lchan tree. Owns every lchan; everybody else refers to
/// lchans by LchanId. The lchan and timeslot state machines are implemented on this
/// struct (see lchan_fsm.rs and ts_fsm.rs); notifications for connections are queued
/// here and drained by the core after each event.
pub struct Network {
    pub(crate) config: SharedConfig,
    pub(crate) now: BscTime,
    pub bts: Vec<Bts>,
    notify: VecDeque<LchanNotify>,
}

impl Network {
    pub fn new(config: SharedConfig) -> Self {
        let cfg = config.config();
        let bts = cfg
            .bts
            .iter()
            .map(|b| Bts {
                nr: b.nr,
                cfg: b.clone(),
                trx: b
                    .trx
                    .iter()
                    .map(|t| Trx {
                        nr: t.nr,
                        ts: t
                            .timeslots
                            .iter()
                            .enumerate()
                            .map(|(tn, pchan)| Timeslot::new(TsId { bts: b.nr, trx: t.nr, ts: tn as u8 }, *pchan))
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        Self { config, now: BscTime::default(), bts, notify: VecDeque::new() }
    }

    pub fn set_time(&mut self, now: BscTime) {
        self.now = now;
    }

    pub fn bts(&self, nr: u8) -> Option<&Bts> {
        self.bts.iter().find(|b| b.nr == nr)
    }

    pub fn bts_by_cell(&self, cell: CellId) -> Option<&Bts> {
        self.bts.iter().find(|b| b.cfg.cell == cell)
    }

    pub fn trx_mut(&mut self, bts: u8, trx: u8) -> Option<&mut Trx> {
        self.bts.iter_mut().find(|b| b.nr == bts)?.trx.iter_mut().find(|t| t.nr == trx)
    }

    pub fn ts(&self, id: TsId) -> Option<&Timeslot> {
        self.bts(id.bts)?.trx.iter().find(|t| t.nr == id.trx)?.ts.get(id.ts as usize)
    }

    pub fn ts_mut(&mut self, id: TsId) -> Option<&mut Timeslot> {
        self.trx_mut(id.bts, id.trx)?.ts.get_mut(id.ts as usize)
    }

    pub fn lchan(&self, id: LchanId) -> Option<&Lchan> {
        self.ts(id.ts_id())?.lchans.get(id.ss as usize)
    }

    pub fn lchan_mut(&mut self, id: LchanId) -> Option<&mut Lchan> {
        self.ts_mut(id.ts_id())?.lchans.get_mut(id.ss as usize)
    }

    pub fn lchan_state(&self, id: LchanId) -> Option<LchanState> {
        self.lchan(id).map(|l| l.state)
    }

    pub fn lchan_owner(&self, id: LchanId) -> Option<ConnId> {
        self.lchan(id).and_then(|l| l.owner)
    }

    pub fn ts_state(&self, id: TsId) -> Option<TsState> {
        self.ts(id).map(|t| t.state)
    }

    /// Iterates over all timeslots of all BTSs
    pub fn all_ts(&self) -> impl Iterator<Item = &Timeslot> {
        self.bts.iter().flat_map(|b| b.trx.iter()).flat_map(|t| t.ts.iter())
    }

    pub fn all_lchans(&self) -> impl Iterator<Item = &Lchan> {
        self.all_ts().flat_map(|ts| ts.lchans.iter())
    }

    /// Takes the next pending notification for a connection
    pub fn pop_notify(&mut self) -> Option<LchanNotify> {
        self.notify.pop_front()
    }

    pub(crate) fn push_notify(&mut self, n: LchanNotify) {
        tracing::trace!("notify {:?}", n);
        self.notify.push_back(n);
    }

    pub(crate) fn count(&self, ctr: BscCounter) {
        self.config.state_write().counters.inc(ctr);
    }

    pub(crate) fn send_abis(&self, queue: &mut MessageQueue, msg: SapMsgInner) {
        send_prim(queue, self.now, Sap::AbisSap, BscEntity::Bts, msg);
    }
}
