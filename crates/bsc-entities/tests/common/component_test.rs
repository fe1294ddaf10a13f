use as_any::AsAny;
use bsc_config::{BscConfig, CfgBts, CfgMsc, CfgTrx, SharedConfig};
use bsc_core::bsc_entities::BscEntity;
use bsc_core::ranges::NriRanges;
use bsc_core::{BscCounter, CellId, ChanMode, ChannelModeAndRate, ChannelRate, ConnId, LchanId, MobileIdentity, MscNr, PchanKind, Sap};
use bsc_entities::bsc::BscCore;
use bsc_entities::{BscEntityTrait, MessageRouter};
use bsc_saps::abis::{AbisChanActivAck, AbisChanRqd, AbisEstablishInd, AbisTrxReady, ChreqReason};
use bsc_saps::bssap::{AssignmentRequest, BssapResetAck};
use bsc_saps::l3::{CmServiceType, L3Msg};
use bsc_saps::{SapMsg, SapMsgInner};

use super::sink::Sink;

pub const CELL0: CellId = CellId { lac: 1, ci: 1 };
pub const CELL1: CellId = CellId { lac: 1, ci: 2 };
/// Neighbour of BTS 0 that belongs to a remote BSC
pub const REMOTE_CELL: CellId = CellId { lac: 9, ci: 9 };

/// Creates a default config for testing. It can still be modified as needed
/// before passing it to the ComponentTest constructor.
///
/// BTS 0 has SDCCHs on TS0/TS1, TCH/F on TS2, TS3, TS6, TS7, TCH/H on TS4 and a
/// dynamic TCH/F / TCH/H / PDCH timeslot on TS5. BTS 1 is a neighbour with one SDCCH/4.
/// MSC 0 owns NRI 1..=99 and takes emergency calls, MSC 1 owns NRI 100..=199.
pub fn default_test_config() -> BscConfig {
    use PchanKind::*;

    let mut cfg = BscConfig::new(1, 1);
    let mut bts0 = CfgBts::new(
        0,
        CELL0,
        vec![CfgTrx { nr: 0, timeslots: vec![CcchSdcch4, Sdcch8, TchF, TchF, TchH, DynTchFTchHPdch, TchF, TchF] }],
    );
    bts0.neighbors = vec![CELL1, REMOTE_CELL];
    let mut bts1 =
        CfgBts::new(1, CELL1, vec![CfgTrx { nr: 0, timeslots: vec![CcchSdcch4, TchF, TchF, TchH, TchH, TchF, TchF, TchF] }]);
    bts1.neighbors = vec![CELL0];
    cfg.bts = vec![bts0, bts1];

    cfg.net.null_nri = NriRanges::from_vec_tuple(vec![(0, 0)]).unwrap();
    cfg.msc = vec![
        CfgMsc { nr: 0, allow_emergency: true, nri: NriRanges::from_vec_tuple(vec![(1, 99)]).unwrap() },
        CfgMsc { nr: 1, allow_emergency: false, nri: NriRanges::from_vec_tuple(vec![(100, 199)]).unwrap() },
    ];

    // Tests trigger handovers explicitly
    cfg.handover.enabled = false;
    cfg
}

/// A connection that made it to the MSC
#[derive(Debug, Clone, Copy)]
pub struct Established {
    pub conn: ConnId,
    pub lchan: LchanId,
    pub msc: MscNr,
}

/// Infrastructure for testing the BSC core
/// Peers are replaced by sinks collecting everything the core sends them
pub struct ComponentTest {
    pub config: SharedConfig,
    pub router: MessageRouter,
    pub sinks: Vec<BscEntity>,
}

impl ComponentTest {
    pub fn new(config: BscConfig) -> Self {
        let shared_config = SharedConfig::from_config(config).expect("invalid test config");
        let mr = MessageRouter::new(shared_config.clone());
        Self { config: shared_config, router: mr, sinks: vec![] }
    }

    /// BSC core with sinks for all its peers, MSCs reset and all TRX up
    pub fn with_bsc(config: BscConfig) -> Self {
        let mut test = Self::new(config);
        test.populate_entities(
            vec![BscEntity::Bsc],
            vec![BscEntity::Bts, BscEntity::Msc, BscEntity::Mgw, BscEntity::Hodec],
        );
        test.bring_up();
        test
    }

    pub fn get_shared_config(&self) -> SharedConfig {
        self.config.clone()
    }

    pub fn populate_entities(&mut self, components: Vec<BscEntity>, sinks: Vec<BscEntity>) {
        for component in components.iter() {
            match component {
                BscEntity::Bsc => {
                    let bsc = BscCore::new(self.config.clone());
                    self.register_entity(bsc);
                }
                _ => {
                    panic!("Component not implemented: {:?}", component);
                }
            }
        }

        // Create sinks for debugging / message collection
        self.create_sinks(sinks);
    }

    fn create_sinks(&mut self, sinks: Vec<BscEntity>) {
        for sink in sinks.iter() {
            assert!(!self.sinks.contains(sink), "Sink already exists: {:?}", sink);
            assert!(self.router.get_entity(*sink).is_none(), "Sink already registered as entity: {:?}", sink);

            self.sinks.push(*sink);
            let sink = Sink::new(*sink);
            self.router.register_entity(Box::new(sink));
        }
    }

    pub fn register_entity<T: 'static + BscEntityTrait>(&mut self, entity: T) {
        self.router.register_entity(Box::new(entity));
    }

    /// First tick sends the Resets, the MSCs answer and the BTSs report their TRX up.
    /// Everything sent up to here is discarded.
    pub fn bring_up(&mut self) {
        self.run_stack(Some(1));
        let cfg = self.config.config();
        for msc in cfg.msc.iter() {
            self.submit(Sap::ASap, BscEntity::Msc, SapMsgInner::BssapResetAck(BssapResetAck { msc: msc.nr }));
        }
        for bts in cfg.bts.iter() {
            for trx in bts.trx.iter() {
                self.submit(Sap::AbisSap, BscEntity::Bts, SapMsgInner::AbisTrxReady(AbisTrxReady { bts: bts.nr, trx: trx.nr }));
            }
        }
        self.deliver_all_messages();
        self.dump_sinks();
    }

    pub fn run_stack(&mut self, num_ticks: Option<usize>) {
        self.router.run_stack(num_ticks, None);
    }

    pub fn submit_message(&mut self, message: SapMsg) {
        self.router.submit_message(message);
    }

    pub fn deliver_all_messages(&mut self) {
        self.router.deliver_all_messages();
    }

    /// Queues a primitive from a peer towards the BSC core
    pub fn submit(&mut self, sap: Sap, src: BscEntity, msg: SapMsgInner) {
        let now = self.router.now();
        self.submit_message(SapMsg::new(sap, src, BscEntity::Bsc, now, msg));
    }

    /// Delivers a BTS primitive and everything it causes
    pub fn abis(&mut self, msg: SapMsgInner) {
        self.submit(Sap::AbisSap, BscEntity::Bts, msg);
        self.deliver_all_messages();
    }

    /// Delivers an MSC primitive and everything it causes
    pub fn bssap(&mut self, msg: SapMsgInner) {
        self.submit(Sap::ASap, BscEntity::Msc, msg);
        self.deliver_all_messages();
    }

    /// Delivers a media gateway primitive and everything it causes
    pub fn mgcp(&mut self, msg: SapMsgInner) {
        self.submit(Sap::MgcpSap, BscEntity::Mgw, msg);
        self.deliver_all_messages();
    }

    pub fn control(&mut self, msg: SapMsgInner) {
        self.submit(Sap::Control, BscEntity::Operator, msg);
        self.deliver_all_messages();
    }

    pub fn bsc(&mut self) -> &mut BscCore {
        self.router
            .get_entity(BscEntity::Bsc)
            .and_then(|e| e.as_any_mut().downcast_mut::<BscCore>())
            .expect("BSC core not registered")
    }

    pub fn counter(&self, ctr: BscCounter) -> u64 {
        self.config.state_read().counters.get(ctr)
    }

    pub fn dump_sinks(&mut self) -> Vec<SapMsg> {
        let mut msgs = vec![];
        for sink in self.sinks.iter() {
            if let Some(component) = self.router.get_entity(*sink) {
                if let Some(sink) = component.as_any_mut().downcast_mut::<Sink>() {
                    let mut sink_msgs = sink.take_msgqueue();
                    msgs.append(&mut sink_msgs);
                }
            }
        }
        msgs
    }

    /// Runs a channel request through to the Complete Layer 3 towards the MSC
    pub fn establish(&mut self, bts: u8, ra: u8, reason: ChreqReason, l3: L3Msg) -> Established {
        self.abis(SapMsgInner::AbisChanRqd(AbisChanRqd { bts, ra, reason }));
        let msgs = self.dump_sinks();
        let lchan = find(&msgs, |m| match m {
            SapMsgInner::AbisChanActivReq(r) => Some(r.lchan),
            _ => None,
        })
        .expect("no channel activation");

        self.abis(SapMsgInner::AbisChanActivAck(AbisChanActivAck { lchan }));
        self.abis(SapMsgInner::AbisEstablishInd(AbisEstablishInd { lchan, l3: Some(l3) }));
        let msgs = self.dump_sinks();
        let (conn, msc) = find(&msgs, |m| match m {
            SapMsgInner::BssapCompleteL3(c) => Some((c.conn, c.msc)),
            _ => None,
        })
        .expect("no Complete Layer 3");
        Established { conn, lchan, msc }
    }

    /// Location update of a subscriber known by IMSI
    pub fn establish_lu(&mut self, bts: u8) -> Established {
        self.establish(bts, 0x21, ChreqReason::LocationUpdate, lu_request(imsi(1)))
    }

    /// Asks for a speech channel and runs the assignment to completion
    pub fn assign_speech(&mut self, conn: ConnId, rates: &[ChannelRate]) -> LchanId {
        let req = speech_request(rates);
        self.bssap(SapMsgInner::BssapAssignmentRequest(bsc_saps::bssap::BssapAssignmentRequest { conn, req }));
        let msgs = self.dump_sinks();
        let lchan = find(&msgs, |m| match m {
            SapMsgInner::AbisChanActivReq(r) => Some(r.lchan),
            _ => None,
        })
        .expect("no channel activation for the assignment");

        self.abis(SapMsgInner::AbisChanActivAck(AbisChanActivAck { lchan }));
        self.abis(SapMsgInner::AbisEstablishInd(AbisEstablishInd { lchan, l3: None }));
        self.mgcp(SapMsgInner::MgcpConnectAck(bsc_saps::mgcp::MgcpConnectAck { conn, endpoint: 1, lchan }));
        let msgs = self.dump_sinks();
        assert!(
            msgs.iter().any(|m| matches!(m.msg, SapMsgInner::BssapAssignmentComplete(_))),
            "assignment did not complete: {:?}",
            msgs
        );
        lchan
    }
}

/// First payload matching `f`
pub fn find<T>(msgs: &[SapMsg], f: impl Fn(&SapMsgInner) -> Option<T>) -> Option<T> {
    msgs.iter().find_map(|m| f(&m.msg))
}

/// All payloads matching `f`, in the order the sinks received them
pub fn collect<T>(msgs: &[SapMsg], f: impl Fn(&SapMsgInner) -> Option<T>) -> Vec<T> {
    msgs.iter().filter_map(|m| f(&m.msg)).collect()
}

pub fn imsi(n: u32) -> MobileIdentity {
    MobileIdentity::Imsi(format!("0010100000{:05}", n))
}

/// TMSI carrying `nri` at the default NRI length of 10 bits
pub fn tmsi_with_nri(nri: u16) -> MobileIdentity {
    MobileIdentity::Tmsi((nri as u32) << 14 | 0x77)
}

pub fn lu_request(mi: MobileIdentity) -> L3Msg {
    L3Msg::LocationUpdatingRequest { mi, power_class: 4 }
}

pub fn cm_service(mi: MobileIdentity, service: CmServiceType) -> L3Msg {
    L3Msg::CmServiceRequest { mi, service, power_class: 4 }
}

/// FR speech version 1 at each given rate, in order of preference
pub fn speech_request(rates: &[ChannelRate]) -> AssignmentRequest {
    AssignmentRequest {
        aoip: true,
        cic: None,
        msc_rtp: Some("10.0.0.1:4000".parse().unwrap()),
        ch_mode_rates: rates.iter().map(|r| ChannelModeAndRate::new(ChanMode::SpeechV1, *r)).collect(),
    }
}
