use bsc_core::{LchanId, LchanType};

use crate::bsc::components::lchan_fsm::LchanState;
use crate::bsc::components::network::{Network, Timeslot};
use crate::bsc::components::policy::ChannelLoad;
use crate::bsc::components::ts_fsm::TsState;

impl Network {
    /// Picks a free lchan of type `want` on a BTS.
    ///
    /// Static timeslots are tried first, then dynamic timeslots already switched to the
    /// wanted kind, and only then idle dynamic timeslots that would have to be switched.
    pub fn select_lchan(&self, bts: u8, want: LchanType) -> Option<LchanId> {
        let bts = self.bts(bts)?;
        let all_ts = || bts.trx.iter().flat_map(|t| t.ts.iter());

        let usable = |ts: &&Timeslot| matches!(ts.state, TsState::Unused | TsState::InUse);
        let free_lchan = |ts: &Timeslot| {
            ts.lchans.iter().take(ts.num_lchans()).find(|l| l.state == LchanState::Unused).map(|l| l.id)
        };

        let found = all_ts()
            .filter(usable)
            .filter(|ts| !ts.pchan_from_config.is_dynamic() && ts.pchan_is.lchan_type() == want)
            .find_map(free_lchan)
            .or_else(|| {
                all_ts()
                    .filter(usable)
                    .filter(|ts| ts.pchan_from_config.is_dynamic() && ts.pchan_is.lchan_type() == want)
                    .find_map(free_lchan)
            })
            .or_else(|| {
                let target = want.pchan();
                all_ts()
                    .filter(|ts| {
                        ts.pchan_from_config.is_dynamic()
                            && ts.pchan_from_config.can_become(target)
                            && matches!(ts.state, TsState::Unused | TsState::Pdch | TsState::WaitPdchAct)
                            && ts.all_lchans_unused()
                    })
                    .map(|ts| ts.id.lchan(0))
                    .next()
            });

        tracing::trace!("select_lchan bts {} {:?} -> {:?}", bts.nr, want, found);
        found
    }

    /// Number of lchans of type `want` that `select_lchan` could hand out on a BTS. An
    /// idle dynamic timeslot counts with all the lchans it would carry after switching.
    pub fn count_free(&self, bts: u8, want: LchanType) -> usize {
        let Some(bts) = self.bts(bts) else {
            return 0;
        };
        let target = want.pchan();
        bts.trx
            .iter()
            .flat_map(|t| t.ts.iter())
            .map(|ts| {
                let carries = matches!(ts.state, TsState::Unused | TsState::InUse) && ts.pchan_is.lchan_type() == want;
                if carries {
                    ts.lchans.iter().take(ts.num_lchans()).filter(|l| l.state == LchanState::Unused).count()
                } else if ts.pchan_from_config.is_dynamic()
                    && ts.pchan_from_config.can_become(target)
                    && matches!(ts.state, TsState::Unused | TsState::Pdch | TsState::WaitPdchAct)
                    && ts.all_lchans_unused()
                {
                    target.num_lchans()
                } else {
                    0
                }
            })
            .sum()
    }

    /// Free lchans of a BTS per type, the load input of the codec policy
    pub fn channel_load(&self, bts: u8) -> ChannelLoad {
        ChannelLoad {
            free_sdcch: self.count_free(bts, LchanType::Sdcch),
            free_tch_f: self.count_free(bts, LchanType::TchF),
            free_tch_h: self.count_free(bts, LchanType::TchH),
        }
    }
}
