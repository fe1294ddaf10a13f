//! MSC pool and the routing of new subscriber connections.
//!
//! An initial L3 message goes to, in this order of preference: the MSC that paged the
//! subscriber, the MSC owning the NRI encoded in the TMSI, or the next usable MSC in
//! round-robin order. Emergency calls keep their own round-robin position and only go to
//! MSCs that allow them.

use bsc_config::SharedConfig;
use bsc_core::ranges::NriRanges;
use bsc_core::{MobileIdentity, MscNr};
use bsc_saps::l3::L3Msg;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct MscLink {
    pub nr: MscNr,
    pub allow_emergency: bool,
    pub nri: NriRanges,
    /// BSSMAP reset procedure completed, link usable
    pub reset_done: bool,
}

/// Why an MSC was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MscSelection {
    Paging(MscNr),
    Nri { msc: MscNr, nri: u16 },
    RoundRobin(MscNr),
}

impl MscSelection {
    pub fn msc(&self) -> MscNr {
        match self {
            MscSelection::Paging(msc) | MscSelection::Nri { msc, .. } | MscSelection::RoundRobin(msc) => *msc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteErr {
    #[error("no mobile identity in initial message")]
    NoIdentity,
    #[error("no suitable MSC available")]
    NoMsc,
}

pub struct MscPool {
    /// Sorted by nr, lower nr wins overlapping NRI ranges
    links: Vec<MscLink>,
    nri_bitlen: u8,
    null_nri: NriRanges,
    /// Round-robin positions, one past the MSC used last
    next_nr: u16,
    next_emerg_nr: u16,
}

impl MscPool {
    pub fn new(config: &SharedConfig) -> Self {
        let cfg = config.config();
        let mut links: Vec<MscLink> = cfg
            .msc
            .iter()
            .map(|m| MscLink { nr: m.nr, allow_emergency: m.allow_emergency, nri: m.nri.clone(), reset_done: false })
            .collect();
        links.sort_by_key(|l| l.nr);
        Self { links, nri_bitlen: cfg.net.nri_bitlen, null_nri: cfg.net.null_nri.clone(), next_nr: 0, next_emerg_nr: 0 }
    }

    pub fn links(&self) -> &[MscLink] {
        &self.links
    }

    pub fn contains(&self, nr: MscNr) -> bool {
        self.links.iter().any(|l| l.nr == nr)
    }

    pub fn set_reset_done(&mut self, nr: MscNr, done: bool) {
        match self.links.iter_mut().find(|l| l.nr == nr) {
            Some(link) => {
                if link.reset_done != done {
                    tracing::info!("MSC {} is {}", nr, if done { "up" } else { "down" });
                }
                link.reset_done = done;
            }
            None => tracing::warn!("set_reset_done: unknown MSC {}", nr),
        }
    }

    fn usable(link: &MscLink, emergency: bool) -> bool {
        link.reset_done && (!emergency || link.allow_emergency)
    }

    pub fn is_usable(&self, nr: MscNr, emergency: bool) -> bool {
        self.links.iter().any(|l| l.nr == nr && Self::usable(l, emergency))
    }

    /// Chooses the MSC for a new connection. `paging_msc` is the MSC with an active paging
    /// transaction for the subscriber, if any.
    pub fn select(&mut self, l3: &L3Msg, paging_msc: Option<MscNr>) -> Result<MscSelection, RouteErr> {
        let emergency = l3.is_emergency();
        let mi = l3.mobile_identity().cloned().unwrap_or(MobileIdentity::None);

        if mi.is_none() && !emergency {
            tracing::warn!("select: no mobile identity, cannot route");
            return Err(RouteErr::NoIdentity);
        }

        if l3.is_paging_response() {
            match paging_msc {
                Some(nr) if self.is_usable(nr, emergency) => {
                    tracing::debug!("{}: paging response, MSC {} paged", mi, nr);
                    return Ok(MscSelection::Paging(nr));
                }
                Some(nr) => tracing::debug!("{}: paging MSC {} not usable", mi, nr),
                None => tracing::debug!("{}: paging response without active paging", mi),
            }
        }

        let nri = mi.nri(self.nri_bitlen).filter(|nri| {
            let null = self.null_nri.contains(*nri);
            if null {
                tracing::debug!("{}: NRI {} is a null NRI", mi, nri);
            }
            !null
        });

        let cursor = if emergency { self.next_emerg_nr } else { self.next_nr };
        let mut first = None;
        let mut next = None;
        for link in self.links.iter().filter(|l| Self::usable(l, emergency)) {
            if let Some(nri) = nri {
                if link.nri.contains(nri) {
                    tracing::debug!("{}: NRI {} belongs to MSC {}", mi, nri, link.nr);
                    return Ok(MscSelection::Nri { msc: link.nr, nri });
                }
            }
            first.get_or_insert(link.nr);
            if next.is_none() && link.nr as u16 >= cursor {
                next = Some(link.nr);
            }
        }

        let Some(chosen) = next.or(first) else {
            tracing::warn!("{}: no usable MSC{}", mi, if emergency { " for emergency calls" } else { "" });
            return Err(RouteErr::NoMsc);
        };
        if emergency {
            self.next_emerg_nr = chosen as u16 + 1;
        } else {
            self.next_nr = chosen as u16 + 1;
        }
        tracing::debug!("{}: round-robin to MSC {}", mi, chosen);
        Ok(MscSelection::RoundRobin(chosen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsc_config::{BscConfig, CfgBts, CfgMsc, CfgTrx};
    use bsc_core::{CellId, PchanKind};
    use bsc_saps::l3::CmServiceType;

    fn pool(mscs: Vec<CfgMsc>) -> MscPool {
        let mut cfg = BscConfig::new(1, 1);
        cfg.net.null_nri = NriRanges::from_vec_tuple(vec![(0, 0)]).unwrap();
        cfg.bts.push(CfgBts::new(0, CellId { lac: 1, ci: 1 }, vec![CfgTrx { nr: 0, timeslots: vec![PchanKind::TchF; 8] }]));
        cfg.msc = mscs;
        let mut pool = MscPool::new(&SharedConfig::from_config(cfg).unwrap());
        let nrs: Vec<MscNr> = pool.links().iter().map(|l| l.nr).collect();
        for nr in nrs {
            pool.set_reset_done(nr, true);
        }
        pool
    }

    fn msc(nr: MscNr, nri: Vec<(u16, u16)>) -> CfgMsc {
        CfgMsc { nr, allow_emergency: true, nri: NriRanges::from_vec_tuple(nri).unwrap() }
    }

    fn lu(mi: MobileIdentity) -> L3Msg {
        L3Msg::LocationUpdatingRequest { mi, power_class: 4 }
    }

    fn imsi() -> MobileIdentity {
        MobileIdentity::Imsi("001010000000001".to_string())
    }

    /// TMSI carrying `nri` with the default 10 bit NRI length
    fn tmsi_with_nri(nri: u16) -> MobileIdentity {
        MobileIdentity::Tmsi((nri as u32) << 14 | 0x42)
    }

    #[test]
    fn test_round_robin_advances_and_wraps() {
        let mut p = pool(vec![msc(0, vec![]), msc(1, vec![]), msc(2, vec![])]);
        let picks: Vec<MscNr> = (0..4).map(|_| p.select(&lu(imsi()), None).unwrap().msc()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_nri_match_keeps_cursor() {
        let mut p = pool(vec![msc(0, vec![(1, 99)]), msc(1, vec![(100, 199)])]);
        assert_eq!(p.select(&lu(tmsi_with_nri(150)), None), Ok(MscSelection::Nri { msc: 1, nri: 150 }));
        assert_eq!(p.select(&lu(imsi()), None), Ok(MscSelection::RoundRobin(0)));
        assert_eq!(p.select(&lu(tmsi_with_nri(5)), None), Ok(MscSelection::Nri { msc: 0, nri: 5 }));
        assert_eq!(p.select(&lu(imsi()), None), Ok(MscSelection::RoundRobin(1)));
    }

    #[test]
    fn test_nri_overlap_lower_nr_wins() {
        let mut p = pool(vec![msc(3, vec![(10, 20)]), msc(1, vec![(15, 30)])]);
        assert_eq!(p.select(&lu(tmsi_with_nri(17)), None).unwrap().msc(), 1);
        assert_eq!(p.select(&lu(tmsi_with_nri(12)), None).unwrap().msc(), 3);
    }

    #[test]
    fn test_null_nri_goes_round_robin() {
        let mut p = pool(vec![msc(0, vec![(0, 10)]), msc(1, vec![])]);
        assert_eq!(p.select(&lu(tmsi_with_nri(0)), None), Ok(MscSelection::RoundRobin(0)));
    }

    #[test]
    fn test_emergency_has_own_cursor() {
        let mut p = pool(vec![msc(0, vec![]), msc(1, vec![])]);
        let emerg = L3Msg::CmServiceRequest { mi: MobileIdentity::None, service: CmServiceType::Emergency, power_class: 4 };
        assert_eq!(p.select(&lu(imsi()), None).unwrap().msc(), 0);
        assert_eq!(p.select(&emerg, None).unwrap().msc(), 0);
        assert_eq!(p.select(&emerg, None).unwrap().msc(), 1);
        assert_eq!(p.select(&lu(imsi()), None).unwrap().msc(), 1);
    }

    #[test]
    fn test_emergency_requires_allow() {
        let mut p = pool(vec![CfgMsc { nr: 0, allow_emergency: false, nri: NriRanges::empty() }]);
        let emerg = L3Msg::CmServiceRequest { mi: imsi(), service: CmServiceType::Emergency, power_class: 4 };
        assert_eq!(p.select(&emerg, None), Err(RouteErr::NoMsc));
        assert_eq!(p.select(&lu(imsi()), None).unwrap().msc(), 0);
    }

    #[test]
    fn test_dead_msc_skipped() {
        let mut p = pool(vec![msc(0, vec![(1, 50)]), msc(1, vec![])]);
        p.set_reset_done(0, false);
        assert_eq!(p.select(&lu(tmsi_with_nri(7)), None), Ok(MscSelection::RoundRobin(1)));
        assert_eq!(p.select(&lu(imsi()), None), Ok(MscSelection::RoundRobin(1)));
        p.set_reset_done(1, false);
        assert_eq!(p.select(&lu(imsi()), None), Err(RouteErr::NoMsc));
    }

    #[test]
    fn test_single_msc_round_robin() {
        let mut p = pool(vec![msc(4, vec![])]);
        for _ in 0..3 {
            assert_eq!(p.select(&lu(imsi()), None), Ok(MscSelection::RoundRobin(4)));
        }
    }

    #[test]
    fn test_paging_response_prefers_paging_msc() {
        let mut p = pool(vec![msc(0, vec![]), msc(1, vec![])]);
        let resp = L3Msg::PagingResponse { mi: imsi() };
        assert_eq!(p.select(&resp, Some(1)), Ok(MscSelection::Paging(1)));
        // Unknown paging MSC falls through to round-robin
        assert_eq!(p.select(&resp, Some(7)), Ok(MscSelection::RoundRobin(0)));
        assert_eq!(p.select(&resp, None), Ok(MscSelection::RoundRobin(1)));
    }

    #[test]
    fn test_no_identity() {
        let mut p = pool(vec![msc(0, vec![])]);
        assert_eq!(p.select(&lu(MobileIdentity::None), None), Err(RouteErr::NoIdentity));
    }
}
