use std::collections::HashMap;

/// Rate counters maintained by the BSC core.
/// Names follow the `group:name` scheme used by operators to query them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BscCounter {
    ChreqTotal,
    ChreqNoChannel,
    ChanActTotal,
    ChanActNack,
    ChanRfFail,
    /// State the lchan was in when it went BORKEN
    LchanBorkenFromState(&'static str),
    /// Event received while the lchan was BORKEN
    LchanBorkenEvent(&'static str),
    TsBorkenFromState(&'static str),
    TsBorkenEvent(&'static str),

    AssignmentAttempted,
    /// Outcome of an assignment, e.g. "completed" or "no_channel"
    Assignment(&'static str),

    /// Handover attempts and outcomes per scope group, e.g. ("handover", "attempted")
    /// or ("interbsc_ho_out", "timeout")
    Handover(&'static str, &'static str),

    PagingAttempted,
    PagingAlready,
    PagingResponded,
    PagingExpired,
    PagingNoActivePaging,
    PagingMscFlush,

    MscNoneAvailable,
}

impl BscCounter {
    pub fn name(&self) -> String {
        match self {
            BscCounter::ChreqTotal => "chreq:total".to_string(),
            BscCounter::ChreqNoChannel => "chreq:no_channel".to_string(),
            BscCounter::ChanActTotal => "chan_act:total".to_string(),
            BscCounter::ChanActNack => "chan_act:nack".to_string(),
            BscCounter::ChanRfFail => "chan:rf_fail".to_string(),
            BscCounter::LchanBorkenFromState(s) => format!("lchan_borken:from_state:{}", s),
            BscCounter::LchanBorkenEvent(e) => format!("lchan_borken:event:{}", e),
            BscCounter::TsBorkenFromState(s) => format!("ts_borken:from_state:{}", s),
            BscCounter::TsBorkenEvent(e) => format!("ts_borken:event:{}", e),
            BscCounter::AssignmentAttempted => "assignment:attempted".to_string(),
            BscCounter::Assignment(r) => format!("assignment:{}", r),
            BscCounter::Handover(group, r) => format!("{}:{}", group, r),
            BscCounter::PagingAttempted => "paging:attempted".to_string(),
            BscCounter::PagingAlready => "paging:already".to_string(),
            BscCounter::PagingResponded => "paging:responded".to_string(),
            BscCounter::PagingExpired => "paging:expired".to_string(),
            BscCounter::PagingNoActivePaging => "paging:no_active_paging".to_string(),
            BscCounter::PagingMscFlush => "paging:msc_flush".to_string(),
            BscCounter::MscNoneAvailable => "msc:no_msc_available".to_string(),
        }
    }
}

/// Counter values by name
#[derive(Debug, Clone, Default)]
pub struct Counters {
    values: HashMap<String, u64>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&mut self, ctr: BscCounter) {
        self.add(ctr, 1);
    }

    pub fn add(&mut self, ctr: BscCounter, n: u64) {
        *self.values.entry(ctr.name()).or_insert(0) += n;
    }

    pub fn get(&self, ctr: BscCounter) -> u64 {
        self.get_by_name(&ctr.name())
    }

    pub fn get_by_name(&self, name: &str) -> u64 {
        self.values.get(name).copied().unwrap_or(0)
    }

    /// All counters with non-zero values, sorted by name
    pub fn dump(&self) -> Vec<(&str, u64)> {
        let mut v: Vec<(&str, u64)> = self.values.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        v.sort_unstable();
        v
    }
}
