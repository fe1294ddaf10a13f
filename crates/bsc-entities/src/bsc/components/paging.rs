//! Paging coordinator.
//!
//! Keeps one paging transaction per (BTS, subscriber). Repeated requests for the same
//! subscriber on the same BTS are coalesced. Pages are retransmitted until the attempt
//! limit is reached; T3113 ends the transaction if the subscriber never answers.

use bsc_config::SharedConfig;
use bsc_core::{BscCounter, BscTime, MobileIdentity, MscNr, Sap, bsc_entities::BscEntity};
use bsc_saps::SapMsgInner;
use bsc_saps::abis::{AbisPagingCmd, ChanNeeded};

use crate::MessageQueue;
use crate::bsc::components::send_prim;

/// Identity a subscriber is paged with and may answer with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedSubscriber {
    pub imsi: String,
    pub tmsi: Option<u32>,
}

impl PagedSubscriber {
    pub fn matches(&self, mi: &MobileIdentity) -> bool {
        match mi {
            MobileIdentity::Imsi(imsi) => *imsi == self.imsi,
            MobileIdentity::Tmsi(tmsi) => self.tmsi == Some(*tmsi),
            _ => false,
        }
    }

    /// The identity sent on the air interface, TMSI when known
    pub fn paging_identity(&self) -> MobileIdentity {
        match self.tmsi {
            Some(tmsi) => MobileIdentity::Tmsi(tmsi),
            None => MobileIdentity::Imsi(self.imsi.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PagingRequest {
    pub bts: u8,
    pub subscriber: PagedSubscriber,
    pub msc: MscNr,
    pub chan_needed: ChanNeeded,
    pub attempts: u32,
    pub next_tx: BscTime,
    pub expires: BscTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingStart {
    Started,
    /// Subscriber already being paged on this BTS
    Already,
}

/// A transaction that ended without a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingExpired {
    pub bts: u8,
    pub subscriber: PagedSubscriber,
    pub msc: MscNr,
}

pub struct PagingMgr {
    config: SharedConfig,
    /// Ordered by creation, retransmissions go out in that order
    reqs: Vec<PagingRequest>,
}

impl PagingMgr {
    pub fn new(config: SharedConfig) -> Self {
        Self { config, reqs: vec![] }
    }

    fn count(&self, ctr: BscCounter, n: u64) {
        if n > 0 {
            self.config.state_write().counters.add(ctr, n);
        }
    }

    pub fn len(&self) -> usize {
        self.reqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reqs.is_empty()
    }

    pub fn get(&self, bts: u8, imsi: &str) -> Option<&PagingRequest> {
        self.reqs.iter().find(|r| r.bts == bts && r.subscriber.imsi == imsi)
    }

    fn send_page(queue: &mut MessageQueue, now: BscTime, req: &PagingRequest) {
        send_prim(
            queue,
            now,
            Sap::AbisSap,
            BscEntity::Bts,
            SapMsgInner::AbisPagingCmd(AbisPagingCmd {
                bts: req.bts,
                subscriber: req.subscriber.paging_identity(),
                chan_needed: req.chan_needed,
            }),
        );
    }

    /// Starts paging a subscriber on one BTS, the first page goes out right away
    pub fn start(
        &mut self,
        queue: &mut MessageQueue,
        now: BscTime,
        bts: u8,
        subscriber: PagedSubscriber,
        msc: MscNr,
        chan_needed: ChanNeeded,
    ) -> PagingStart {
        if self.get(bts, &subscriber.imsi).is_some() {
            tracing::debug!("paging: IMSI-{} already paged on bts {}", subscriber.imsi, bts);
            self.count(BscCounter::PagingAlready, 1);
            return PagingStart::Already;
        }

        let cfg = self.config.config();
        let req = PagingRequest {
            bts,
            subscriber,
            msc,
            chan_needed,
            attempts: 1,
            next_tx: now.add_ms(cfg.paging.retransmit_ms),
            expires: now.add_ms(cfg.timers.t3113_ms),
        };
        tracing::info!("paging: IMSI-{} on bts {} for MSC {}", req.subscriber.imsi, bts, msc);
        Self::send_page(queue, now, &req);
        self.reqs.push(req);
        self.count(BscCounter::PagingAttempted, 1);
        PagingStart::Started
    }

    /// MSC that paged this subscriber. The responding BTS is preferred.
    pub fn get_msc(&self, bts: u8, mi: &MobileIdentity) -> Option<MscNr> {
        self.reqs
            .iter()
            .find(|r| r.bts == bts && r.subscriber.matches(mi))
            .or_else(|| self.reqs.iter().find(|r| r.subscriber.matches(mi)))
            .map(|r| r.msc)
    }

    /// Subscriber answered on `bts`: paging stops everywhere. Returns the paging MSC.
    pub fn stop(&mut self, bts: u8, mi: &MobileIdentity) -> Option<MscNr> {
        let msc = self.get_msc(bts, mi);
        let before = self.reqs.len();
        let responded = self.reqs.iter().any(|r| r.bts == bts && r.subscriber.matches(mi));
        self.reqs.retain(|r| !r.subscriber.matches(mi));

        if before == self.reqs.len() {
            tracing::debug!("paging: response from {} without active paging", mi);
            self.count(BscCounter::PagingNoActivePaging, 1);
        } else {
            tracing::info!("paging: {} responded on bts {}, stopped {} request(s)", mi, bts, before - self.reqs.len());
            if responded {
                self.count(BscCounter::PagingResponded, 1);
            }
        }
        msc
    }

    /// Drops all transactions of an MSC without reporting expiry
    pub fn flush_msc(&mut self, msc: MscNr) -> usize {
        let before = self.reqs.len();
        self.reqs.retain(|r| r.msc != msc);
        let n = before - self.reqs.len();
        if n > 0 {
            tracing::info!("paging: flushed {} request(s) of MSC {}", n, msc);
        }
        self.count(BscCounter::PagingMscFlush, n as u64);
        n
    }

    /// Drops all transactions of a BTS, e.g. when it goes away
    pub fn flush_bts(&mut self, bts: u8) -> usize {
        let before = self.reqs.len();
        self.reqs.retain(|r| r.bts != bts);
        before - self.reqs.len()
    }

    /// Retransmits due pages and expires transactions whose T3113 ran out
    pub fn tick(&mut self, queue: &mut MessageQueue, now: BscTime) -> Vec<PagingExpired> {
        let cfg = self.config.config();
        let mut expired = vec![];

        self.reqs.retain(|r| {
            if now.reached(r.expires) {
                tracing::info!("paging: IMSI-{} on bts {} expired after {} attempt(s)", r.subscriber.imsi, r.bts, r.attempts);
                expired.push(PagingExpired { bts: r.bts, subscriber: r.subscriber.clone(), msc: r.msc });
                return false;
            }
            true
        });

        for req in self.reqs.iter_mut() {
            if req.attempts < cfg.paging.max_attempts && now.reached(req.next_tx) {
                req.attempts += 1;
                req.next_tx = now.add_ms(cfg.paging.retransmit_ms);
                tracing::debug!("paging: retransmit #{} IMSI-{} on bts {}", req.attempts, req.subscriber.imsi, req.bts);
                Self::send_page(queue, now, req);
            }
        }

        self.count(BscCounter::PagingExpired, expired.len() as u64);
        expired
    }
}
