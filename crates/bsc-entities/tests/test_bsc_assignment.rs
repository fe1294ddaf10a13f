mod common;

use std::sync::{Arc, Mutex};

use bsc_config::CfgBts;
use bsc_core::bsc_entities::BscEntity;
use bsc_core::{
    BscCounter, ChanMode, ChannelModeAndRate, ChannelRate, EncryptionInfo, LchanId, PchanKind, RrCause, RslCause, debug,
};
use bsc_entities::bsc::BscCore;
use bsc_entities::bsc::components::lchan_fsm::LchanState;
use bsc_entities::bsc::components::policy::{ChannelLoad, CodecPolicy, DefaultCodecPolicy, DefaultHandoverDecision};
use bsc_entities::bsc::subentities::conn::ConnState;
use bsc_saps::abis::*;
use bsc_saps::bssap::*;
use bsc_saps::l3::{L3Msg, ProtoDisc};
use bsc_saps::mgcp::MgcpConnectAck;
use bsc_saps::SapMsgInner;
use common::*;

fn dtap(n: u8) -> L3Msg {
    L3Msg::Dtap { pdisc: ProtoDisc::Cc, payload: vec![0x03, n] }
}

fn activation(msgs: &[bsc_saps::SapMsg]) -> Option<(LchanId, ActivType, ChannelModeAndRate)> {
    find(msgs, |m| match m {
        SapMsgInner::AbisChanActivReq(r) => Some((r.lchan, r.act_type, r.ch_mode_rate)),
        _ => None,
    })
}

#[test]
fn test_speech_assignment_with_queued_dtap() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_bsc(default_test_config());
    let est = test.establish_lu(0);

    let req = speech_request(&[ChannelRate::Full]);
    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest { conn: est.conn, req }));
    let msgs = test.dump_sinks();
    let (tch, act_type, cmr) = activation(&msgs).expect("no TCH activation");
    assert_eq!(tch, LchanId::new(0, 0, 2, 0));
    assert_eq!(act_type, ActivType::Assignment);
    assert_eq!(cmr, ChannelModeAndRate::new(ChanMode::SpeechV1, ChannelRate::Full));

    // DTAP arriving while the assignment runs is held back
    test.bssap(SapMsgInner::BssapDtapDl(BssapDtapDl { conn: est.conn, l3: dtap(1) }));
    test.bssap(SapMsgInner::BssapDtapDl(BssapDtapDl { conn: est.conn, l3: dtap(2) }));
    assert!(test.dump_sinks().is_empty());

    // A second assignment is refused without disturbing the first
    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest {
        conn: est.conn,
        req: speech_request(&[ChannelRate::Half]),
    }));
    let msgs = test.dump_sinks();
    let fail = find(&msgs, |m| match m {
        SapMsgInner::BssapAssignmentFailure(f) => Some(f.cause),
        _ => None,
    });
    assert_eq!(fail, Some(BssapCause::EquipmentFailure));
    assert!(activation(&msgs).is_none());

    // RR Assignment Command goes out on the old lchan
    test.abis(SapMsgInner::AbisChanActivAck(AbisChanActivAck { lchan: tch }));
    let msgs = test.dump_sinks();
    let cmd = find(&msgs, |m| match m {
        SapMsgInner::AbisDataReq(r) => Some((r.lchan, r.l3.clone())),
        _ => None,
    });
    assert_eq!(cmd, Some((est.lchan, L3Msg::AssignmentCommand { lchan: tch, ch_mode_rate: cmr })));

    test.abis(SapMsgInner::AbisEstablishInd(AbisEstablishInd { lchan: tch, l3: None }));
    let msgs = test.dump_sinks();
    let crcx = find(&msgs, |m| match m {
        SapMsgInner::MgcpConnectReq(r) => Some((r.conn, r.endpoint, r.lchan)),
        _ => None,
    });
    assert_eq!(crcx, Some((est.conn, None, tch)));

    test.mgcp(SapMsgInner::MgcpConnectAck(MgcpConnectAck { conn: est.conn, endpoint: 17, lchan: tch }));
    let msgs = test.dump_sinks();
    let done = find(&msgs, |m| match m {
        SapMsgInner::BssapAssignmentComplete(c) => Some((c.conn, c.lchan, c.ch_mode_rate)),
        _ => None,
    });
    assert_eq!(done, Some((est.conn, tch, cmr)));
    let rel = collect(&msgs, |m| match m {
        SapMsgInner::AbisRfChanRelReq(r) => Some(r.lchan),
        _ => None,
    });
    assert_eq!(rel, vec![est.lchan]);

    // Held DTAP follows on the new lchan, in order
    let dl = collect(&msgs, |m| match m {
        SapMsgInner::AbisDataReq(r) => Some((r.lchan, r.l3.clone())),
        _ => None,
    });
    assert_eq!(dl, vec![(tch, dtap(1)), (tch, dtap(2))]);

    let bsc = test.bsc();
    let conn = bsc.conns.get(est.conn).expect("conn gone");
    assert_eq!(conn.lchan, Some(tch));
    assert_eq!(conn.endpoint, Some(17));
    assert_eq!(conn.ch_mode_rate, Some(cmr));
    assert!(conn.procedure.is_none());
    assert!(bsc.conns.check_ownership(&bsc.ctx.net).is_ok());
    // The refused request never started an assignment
    assert_eq!(test.counter(BscCounter::AssignmentAttempted), 1);
    assert_eq!(test.counter(BscCounter::Assignment("completed")), 1);
}

#[test]
fn test_half_rate_fallback() {
    debug::setup_logging_verbose();
    let mut cfg = default_test_config();
    // No TCH/F at all on BTS 0
    cfg.bts[0].trx[0].timeslots = vec![
        PchanKind::CcchSdcch4,
        PchanKind::Sdcch8,
        PchanKind::TchH,
        PchanKind::TchH,
        PchanKind::Pdch,
        PchanKind::Pdch,
        PchanKind::Pdch,
        PchanKind::Pdch,
    ];
    let mut test = ComponentTest::with_bsc(cfg);
    let est = test.establish_lu(0);

    let req = speech_request(&[ChannelRate::Full, ChannelRate::Half]);
    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest { conn: est.conn, req }));
    let msgs = test.dump_sinks();
    let (tch, _, cmr) = activation(&msgs).expect("no TCH activation");
    assert_eq!(tch, LchanId::new(0, 0, 2, 0));
    assert_eq!(cmr.chan_rate, ChannelRate::Half);

    test.abis(SapMsgInner::AbisChanActivAck(AbisChanActivAck { lchan: tch }));
    test.abis(SapMsgInner::AbisEstablishInd(AbisEstablishInd { lchan: tch, l3: None }));
    test.mgcp(SapMsgInner::MgcpConnectAck(MgcpConnectAck { conn: est.conn, endpoint: 3, lchan: tch }));
    let msgs = test.dump_sinks();
    let done = find(&msgs, |m| match m {
        SapMsgInner::BssapAssignmentComplete(c) => Some(c.ch_mode_rate),
        _ => None,
    });
    assert_eq!(done, Some(ChannelModeAndRate::new(ChanMode::SpeechV1, ChannelRate::Half)));
}

#[test]
fn test_no_channel_for_any_mode() {
    debug::setup_logging_verbose();
    let mut cfg = default_test_config();
    cfg.bts[0].half_rate = false;
    cfg.bts[0].trx[0].timeslots = vec![
        PchanKind::CcchSdcch4,
        PchanKind::TchH,
        PchanKind::TchH,
        PchanKind::Pdch,
        PchanKind::Pdch,
        PchanKind::Pdch,
        PchanKind::Pdch,
        PchanKind::Pdch,
    ];
    let mut test = ComponentTest::with_bsc(cfg);
    let est = test.establish_lu(0);

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest {
        conn: est.conn,
        req: speech_request(&[ChannelRate::Full, ChannelRate::Half]),
    }));
    let msgs = test.dump_sinks();
    assert!(activation(&msgs).is_none());
    let fail = find(&msgs, |m| match m {
        SapMsgInner::BssapAssignmentFailure(f) => Some(f.cause),
        _ => None,
    });
    assert_eq!(fail, Some(BssapCause::NoRadioResourceAvailable));
    assert_eq!(test.counter(BscCounter::Assignment("no_channel")), 1);
    assert_eq!(test.bsc().conns.get(est.conn).map(|c| c.state), Some(ConnState::Active));
}

#[test]
fn test_activation_nack_leaves_conn_untouched() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_bsc(default_test_config());
    let est = test.establish_lu(0);
    let before = test.bsc().conns.get(est.conn).map(|c| (c.lchan, c.ch_mode_rate, c.endpoint));

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest {
        conn: est.conn,
        req: speech_request(&[ChannelRate::Full]),
    }));
    let (tch, _, _) = activation(&test.dump_sinks()).expect("no TCH activation");
    test.abis(SapMsgInner::AbisChanActivNack(AbisChanActivNack { lchan: tch, cause: RslCause::EquipmentFailure }));

    let msgs = test.dump_sinks();
    let fail = find(&msgs, |m| match m {
        SapMsgInner::BssapAssignmentFailure(f) => Some((f.cause, f.rr_cause)),
        _ => None,
    });
    assert_eq!(fail, Some((BssapCause::EquipmentFailure, None)));

    let bsc = test.bsc();
    let after = bsc.conns.get(est.conn).map(|c| (c.lchan, c.ch_mode_rate, c.endpoint));
    assert_eq!(before, after);
    assert_eq!(bsc.conns.get(est.conn).map(|c| c.state), Some(ConnState::Active));
    // NACKed lchans are free again, not BORKEN
    assert_eq!(bsc.ctx.net.lchan_state(tch), Some(LchanState::Unused));
    assert!(bsc.conns.check_ownership(&bsc.ctx.net).is_ok());
    assert_eq!(test.counter(BscCounter::Assignment("failed")), 1);
    assert_eq!(test.counter(BscCounter::LchanBorkenFromState("wait_activ_ack")), 0);
}

#[test]
fn test_ms_assignment_failure() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_bsc(default_test_config());
    let est = test.establish_lu(0);

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest {
        conn: est.conn,
        req: speech_request(&[ChannelRate::Full]),
    }));
    let (tch, _, _) = activation(&test.dump_sinks()).expect("no TCH activation");
    test.abis(SapMsgInner::AbisChanActivAck(AbisChanActivAck { lchan: tch }));
    test.dump_sinks();

    // The MS stays on the SDCCH and says why
    test.abis(SapMsgInner::AbisDataInd(AbisDataInd {
        lchan: est.lchan,
        l3: L3Msg::AssignmentFailure { rr_cause: RrCause::ChannelModeUnacceptable },
    }));
    let msgs = test.dump_sinks();
    let fail = find(&msgs, |m| match m {
        SapMsgInner::BssapAssignmentFailure(f) => Some((f.cause, f.rr_cause)),
        _ => None,
    });
    assert_eq!(fail, Some((BssapCause::RadioInterfaceFailure, Some(RrCause::ChannelModeUnacceptable))));
    let rel = collect(&msgs, |m| match m {
        SapMsgInner::AbisRfChanRelReq(r) => Some(r.lchan),
        _ => None,
    });
    assert_eq!(rel, vec![tch]);
    assert_eq!(test.bsc().conns.get(est.conn).and_then(|c| c.lchan), Some(est.lchan));
}

#[test]
fn test_assignment_timeout() {
    debug::setup_logging_verbose();
    let mut cfg = default_test_config();
    cfg.timers.assignment_ms = 300;
    let mut test = ComponentTest::with_bsc(cfg);
    let est = test.establish_lu(0);

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest {
        conn: est.conn,
        req: speech_request(&[ChannelRate::Full]),
    }));
    let (tch, _, _) = activation(&test.dump_sinks()).expect("no TCH activation");
    test.abis(SapMsgInner::AbisChanActivAck(AbisChanActivAck { lchan: tch }));
    test.dump_sinks();

    // MS never shows up on the TCH
    test.run_stack(Some(6));
    let msgs = test.dump_sinks();
    let fail = find(&msgs, |m| match m {
        SapMsgInner::BssapAssignmentFailure(f) => Some(f.cause),
        _ => None,
    });
    assert_eq!(fail, Some(BssapCause::RadioInterfaceMessageFailure));
    assert!(msgs.iter().any(|m| matches!(&m.msg, SapMsgInner::AbisRfChanRelReq(r) if r.lchan == tch)));
    assert_eq!(test.counter(BscCounter::Assignment("timeout")), 1);
    assert!(test.bsc().conns.get(est.conn).is_some_and(|c| c.procedure.is_none() && c.lchan == Some(est.lchan)));
}

#[test]
fn test_mgw_failure_fails_assignment() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_bsc(default_test_config());
    let est = test.establish_lu(0);

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest {
        conn: est.conn,
        req: speech_request(&[ChannelRate::Full]),
    }));
    let (tch, _, _) = activation(&test.dump_sinks()).expect("no TCH activation");
    test.abis(SapMsgInner::AbisChanActivAck(AbisChanActivAck { lchan: tch }));
    test.abis(SapMsgInner::AbisEstablishInd(AbisEstablishInd { lchan: tch, l3: None }));
    test.dump_sinks();

    test.mgcp(SapMsgInner::MgcpConnectNack(bsc_saps::mgcp::MgcpConnectNack { conn: est.conn, lchan: tch }));
    let msgs = test.dump_sinks();
    let fail = find(&msgs, |m| match m {
        SapMsgInner::BssapAssignmentFailure(f) => Some(f.cause),
        _ => None,
    });
    assert_eq!(fail, Some(BssapCause::EquipmentFailure));
    assert_eq!(test.counter(BscCounter::Assignment("error")), 1);

    // A late ACK for a connection that no longer waits is released at the MGW
    test.mgcp(SapMsgInner::MgcpConnectAck(MgcpConnectAck { conn: est.conn, endpoint: 9, lchan: tch }));
    let msgs = test.dump_sinks();
    assert!(msgs.iter().any(|m| matches!(&m.msg, SapMsgInner::MgcpEndpointRelease(r) if r.endpoint == 9)));
}

fn request(cmrs: &[ChannelModeAndRate]) -> AssignmentRequest {
    let mut req = speech_request(&[]);
    req.ch_mode_rates = cmrs.to_vec();
    req
}

fn rr_sent(msgs: &[bsc_saps::SapMsg]) -> Vec<(LchanId, L3Msg)> {
    collect(msgs, |m| match m {
        SapMsgInner::AbisDataReq(r) => Some((r.lchan, r.l3.clone())),
        _ => None,
    })
}

fn assignment_failure(msgs: &[bsc_saps::SapMsg]) -> Option<(BssapCause, Option<RrCause>)> {
    find(msgs, |m| match m {
        SapMsgInner::BssapAssignmentFailure(f) => Some((f.cause, f.rr_cause)),
        _ => None,
    })
}

/// Speech call on a TCH/F, then the MSC asks for data on the same kind of channel
fn speech_then_data_request(test: &mut ComponentTest) -> (Established, LchanId, ChannelModeAndRate) {
    let est = test.establish_lu(0);
    let tch = test.assign_speech(est.conn, &[ChannelRate::Full]);
    let data = ChannelModeAndRate::new(ChanMode::DataCsd, ChannelRate::Full);

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest { conn: est.conn, req: request(&[data]) }));
    let msgs = test.dump_sinks();
    // The lchan is kept, the MS is told about the new mode first
    assert!(activation(&msgs).is_none());
    assert_eq!(rr_sent(&msgs), vec![(tch, L3Msg::ChannelModeModify { ch_mode_rate: data })]);
    assert!(!msgs.iter().any(|m| matches!(
        m.msg,
        SapMsgInner::AbisModeModifyReq(_) | SapMsgInner::MgcpConnectReq(_) | SapMsgInner::BssapAssignmentComplete(_)
    )));

    test.abis(SapMsgInner::AbisDataInd(AbisDataInd { lchan: tch, l3: L3Msg::ChannelModeModifyAck { ch_mode_rate: data } }));
    let msgs = test.dump_sinks();
    let modify = find(&msgs, |m| match m {
        SapMsgInner::AbisModeModifyReq(r) => Some((r.lchan, r.ch_mode_rate)),
        _ => None,
    });
    assert_eq!(modify, Some((tch, data)));
    assert!(!msgs.iter().any(|m| matches!(m.msg, SapMsgInner::MgcpConnectReq(_))));
    assert_eq!(test.bsc().ctx.net.lchan_state(tch), Some(LchanState::WaitModeModifyAck));
    (est, tch, data)
}

#[test]
fn test_mode_change_on_current_lchan() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_bsc(default_test_config());
    let (est, tch, data) = speech_then_data_request(&mut test);

    test.abis(SapMsgInner::AbisModeModifyAck(AbisModeModifyAck { lchan: tch }));
    let msgs = test.dump_sinks();
    let crcx = find(&msgs, |m| match m {
        SapMsgInner::MgcpConnectReq(r) => Some((r.endpoint, r.lchan, r.ch_mode_rate)),
        _ => None,
    });
    assert_eq!(crcx, Some((Some(1), tch, data)));

    test.mgcp(SapMsgInner::MgcpConnectAck(MgcpConnectAck { conn: est.conn, endpoint: 1, lchan: tch }));
    let msgs = test.dump_sinks();
    let done = find(&msgs, |m| match m {
        SapMsgInner::BssapAssignmentComplete(c) => Some((c.lchan, c.ch_mode_rate)),
        _ => None,
    });
    assert_eq!(done, Some((tch, data)));
    assert!(!msgs.iter().any(|m| matches!(m.msg, SapMsgInner::AbisRfChanRelReq(_) | SapMsgInner::MgcpEndpointRelease(_))));

    let bsc = test.bsc();
    let conn = bsc.conns.get(est.conn).expect("conn gone");
    assert_eq!(conn.lchan, Some(tch));
    assert_eq!(conn.ch_mode_rate, Some(data));
    assert_eq!(bsc.ctx.net.lchan(tch).and_then(|l| l.ch_mode_rate), Some(data));
    assert_eq!(bsc.ctx.net.lchan_state(tch), Some(LchanState::Active));
    assert_eq!(test.counter(BscCounter::Assignment("completed")), 2);
}

#[test]
fn test_mode_change_refused_by_bts() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_bsc(default_test_config());
    let (est, tch, _) = speech_then_data_request(&mut test);
    let speech = ChannelModeAndRate::new(ChanMode::SpeechV1, ChannelRate::Full);

    test.abis(SapMsgInner::AbisModeModifyNack(AbisModeModifyNack { lchan: tch, cause: RslCause::EquipmentFailure }));
    let msgs = test.dump_sinks();
    assert_eq!(assignment_failure(&msgs), Some((BssapCause::EquipmentFailure, None)));
    assert!(!msgs.iter().any(|m| matches!(m.msg, SapMsgInner::MgcpConnectReq(_) | SapMsgInner::AbisRfChanRelReq(_))));

    let bsc = test.bsc();
    let conn = bsc.conns.get(est.conn).expect("conn gone");
    assert_eq!(conn.state, ConnState::Active);
    assert_eq!(conn.lchan, Some(tch));
    assert_eq!(conn.ch_mode_rate, Some(speech));
    assert!(conn.procedure.is_none());
    assert_eq!(bsc.ctx.net.lchan(tch).and_then(|l| l.ch_mode_rate), Some(speech));
    assert_eq!(bsc.ctx.net.lchan_state(tch), Some(LchanState::Active));
    assert_eq!(test.counter(BscCounter::Assignment("failed")), 1);
}

#[test]
fn test_mode_change_ms_acks_other_mode() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_bsc(default_test_config());
    let est = test.establish_lu(0);
    let tch = test.assign_speech(est.conn, &[ChannelRate::Full]);
    let data = ChannelModeAndRate::new(ChanMode::DataCsd, ChannelRate::Full);
    let efr = ChannelModeAndRate::new(ChanMode::SpeechEfr, ChannelRate::Full);

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest { conn: est.conn, req: request(&[data]) }));
    test.dump_sinks();
    test.abis(SapMsgInner::AbisDataInd(AbisDataInd { lchan: tch, l3: L3Msg::ChannelModeModifyAck { ch_mode_rate: efr } }));
    let msgs = test.dump_sinks();
    assert_eq!(assignment_failure(&msgs), Some((BssapCause::RadioInterfaceFailure, Some(RrCause::ChannelModeUnacceptable))));
    assert!(!msgs.iter().any(|m| matches!(m.msg, SapMsgInner::AbisModeModifyReq(_))));
    assert_eq!(test.bsc().ctx.net.lchan_state(tch), Some(LchanState::Active));
}

#[test]
fn test_same_mode_keeps_lchan_untouched() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_bsc(default_test_config());
    let est = test.establish_lu(0);
    let tch = test.assign_speech(est.conn, &[ChannelRate::Full]);

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest {
        conn: est.conn,
        req: speech_request(&[ChannelRate::Full]),
    }));
    let msgs = test.dump_sinks();
    assert!(activation(&msgs).is_none());
    assert!(rr_sent(&msgs).is_empty());
    assert!(!msgs.iter().any(|m| matches!(m.msg, SapMsgInner::AbisModeModifyReq(_))));
    let crcx = find(&msgs, |m| match m {
        SapMsgInner::MgcpConnectReq(r) => Some((r.endpoint, r.lchan)),
        _ => None,
    });
    assert_eq!(crcx, Some((Some(1), tch)));

    test.mgcp(SapMsgInner::MgcpConnectAck(MgcpConnectAck { conn: est.conn, endpoint: 1, lchan: tch }));
    let msgs = test.dump_sinks();
    assert!(msgs.iter().any(|m| matches!(&m.msg, SapMsgInner::BssapAssignmentComplete(c) if c.lchan == tch)));
}

/// Sets up ciphering with algorithm 2 on the signalling lchan
fn cipher(test: &mut ComponentTest, est: &Established) -> EncryptionInfo {
    let encr = EncryptionInfo { alg_id: 2, key: vec![8, 7, 6, 5, 4, 3, 2, 1] };
    test.bssap(SapMsgInner::BssapCipherModeCommand(BssapCipherModeCommand { conn: est.conn, encr: encr.clone() }));
    test.abis(SapMsgInner::AbisDataInd(AbisDataInd { lchan: est.lchan, l3: L3Msg::CipheringModeComplete }));
    test.dump_sinks();
    encr
}

#[test]
fn test_queued_dtap_after_failed_assignment() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_bsc(default_test_config());
    let est = test.establish_lu(0);
    let encr = cipher(&mut test, &est);

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest {
        conn: est.conn,
        req: speech_request(&[ChannelRate::Full]),
    }));
    let (tch, _, _) = activation(&test.dump_sinks()).expect("no TCH activation");
    for n in 1..=3 {
        test.bssap(SapMsgInner::BssapDtapDl(BssapDtapDl { conn: est.conn, l3: dtap(n) }));
    }
    assert!(test.dump_sinks().is_empty());

    test.abis(SapMsgInner::AbisChanActivNack(AbisChanActivNack { lchan: tch, cause: RslCause::EquipmentFailure }));
    let msgs = test.dump_sinks();
    assert!(assignment_failure(&msgs).is_some());
    // Everything held back goes out on the lchan the MS stayed on
    assert_eq!(rr_sent(&msgs), vec![(est.lchan, dtap(1)), (est.lchan, dtap(2)), (est.lchan, dtap(3))]);

    let bsc = test.bsc();
    let conn = bsc.conns.get(est.conn).expect("conn gone");
    assert_eq!(conn.encr, encr);
    assert!(!conn.ciphering_pending);
    assert!(conn.dl_queue.is_empty());
    assert_eq!(bsc.ctx.net.lchan(est.lchan).map(|l| l.encr.clone()), Some(encr));
}

#[test]
fn test_cipher_mode_command_waits_for_assignment() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_bsc(default_test_config());
    let est = test.establish_lu(0);
    let encr = EncryptionInfo { alg_id: 3, key: vec![1; 8] };

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest {
        conn: est.conn,
        req: speech_request(&[ChannelRate::Full]),
    }));
    let (tch, _, _) = activation(&test.dump_sinks()).expect("no TCH activation");
    test.bssap(SapMsgInner::BssapDtapDl(BssapDtapDl { conn: est.conn, l3: dtap(1) }));
    test.bssap(SapMsgInner::BssapCipherModeCommand(BssapCipherModeCommand { conn: est.conn, encr: encr.clone() }));
    test.bssap(SapMsgInner::BssapDtapDl(BssapDtapDl { conn: est.conn, l3: dtap(2) }));
    assert!(test.dump_sinks().is_empty());
    assert!(test.bsc().conns.get(est.conn).is_some_and(|c| !c.ciphering_pending && c.encr == EncryptionInfo::none()));

    test.abis(SapMsgInner::AbisChanActivAck(AbisChanActivAck { lchan: tch }));
    test.abis(SapMsgInner::AbisEstablishInd(AbisEstablishInd { lchan: tch, l3: None }));
    test.mgcp(SapMsgInner::MgcpConnectAck(MgcpConnectAck { conn: est.conn, endpoint: 4, lchan: tch }));
    let msgs = test.dump_sinks();
    assert!(msgs.iter().any(|m| matches!(m.msg, SapMsgInner::BssapAssignmentComplete(_))));
    let dl: Vec<(LchanId, L3Msg)> =
        rr_sent(&msgs).into_iter().filter(|(_, l3)| !matches!(l3, L3Msg::AssignmentCommand { .. })).collect();
    assert_eq!(dl, vec![(tch, dtap(1)), (tch, L3Msg::CipheringModeCommand { alg_id: 3 }), (tch, dtap(2))]);

    let bsc = test.bsc();
    let conn = bsc.conns.get(est.conn).expect("conn gone");
    assert!(conn.ciphering_pending);
    assert_eq!(conn.encr, encr);
    assert_eq!(bsc.ctx.net.lchan(tch).map(|l| l.encr.clone()), Some(encr));
}

#[test]
fn test_downlink_queue_overflow() {
    debug::setup_logging_verbose();
    let mut cfg = default_test_config();
    cfg.dtap_queue_max = 2;
    let mut test = ComponentTest::with_bsc(cfg);
    let est = test.establish_lu(0);

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest {
        conn: est.conn,
        req: speech_request(&[ChannelRate::Full]),
    }));
    let (tch, _, _) = activation(&test.dump_sinks()).expect("no TCH activation");
    for n in 1..=4 {
        test.bssap(SapMsgInner::BssapDtapDl(BssapDtapDl { conn: est.conn, l3: dtap(n) }));
    }
    assert_eq!(test.bsc().conns.get(est.conn).map(|c| c.dl_queue.len()), Some(2));

    test.abis(SapMsgInner::AbisChanActivNack(AbisChanActivNack { lchan: tch, cause: RslCause::EquipmentFailure }));
    let msgs = test.dump_sinks();
    // The oldest messages are kept, later ones dropped
    assert_eq!(rr_sent(&msgs), vec![(est.lchan, dtap(1)), (est.lchan, dtap(2))]);
}

/// Prefers half rate while few TCH/F are left, and remembers the load it was shown
struct HalfRateUnderLoad {
    min_free_tch_f: usize,
    seen: Arc<Mutex<Vec<ChannelLoad>>>,
}

impl CodecPolicy for HalfRateUnderLoad {
    fn select(&self, bts: &CfgBts, prefs: &[ChannelModeAndRate], load: &ChannelLoad) -> Option<ChannelModeAndRate> {
        self.seen.lock().unwrap().push(*load);
        let viable = |c: &&ChannelModeAndRate| {
            DefaultCodecPolicy::mode_supported(bts, c) && load.free(c.chan_rate.lchan_type()) > 0
        };
        if load.free_tch_f < self.min_free_tch_f {
            if let Some(hr) = prefs.iter().filter(|c| c.chan_rate == ChannelRate::Half).find(viable) {
                return Some(*hr);
            }
        }
        prefs.iter().find(viable).copied()
    }
}

#[test]
fn test_codec_policy_sees_channel_load() {
    debug::setup_logging_verbose();
    let seen = Arc::new(Mutex::new(vec![]));
    let mut test = ComponentTest::new(default_test_config());
    let policy = HalfRateUnderLoad { min_free_tch_f: 10, seen: seen.clone() };
    let bsc = BscCore::with_policies(test.get_shared_config(), Box::new(policy), Box::new(DefaultHandoverDecision));
    test.register_entity(bsc);
    test.populate_entities(vec![], vec![BscEntity::Bts, BscEntity::Msc, BscEntity::Mgw, BscEntity::Hodec]);
    test.bring_up();
    let est = test.establish_lu(0);

    test.bssap(SapMsgInner::BssapAssignmentRequest(BssapAssignmentRequest {
        conn: est.conn,
        req: speech_request(&[ChannelRate::Full, ChannelRate::Half]),
    }));
    let (tch, _, cmr) = activation(&test.dump_sinks()).expect("no TCH activation");
    assert_eq!(cmr.chan_rate, ChannelRate::Half);
    assert_eq!(tch, LchanId::new(0, 0, 4, 0));

    // Four static TCH/F plus the dynamic timeslot, which could also carry two TCH/H
    let load = seen.lock().unwrap().last().copied().expect("policy not asked");
    assert_eq!((load.free_tch_f, load.free_tch_h), (5, 4));
}
