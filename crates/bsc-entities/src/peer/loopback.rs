//! Loopback peers answering the BSC core locally. They let the daemon run without any
//! real BTS, MSC or media gateway: activations are acknowledged, endpoints handed out
//! and resets answered.

use crossbeam_channel::{Receiver, Sender};

use bsc_core::{BscTime, EndpointId, Sap, bsc_entities::BscEntity};
use bsc_saps::abis::*;
use bsc_saps::bssap::{BssapClearCommand, BssapResetAck};
use bsc_saps::l3::L3Msg;
use bsc_saps::mgcp::MgcpConnectAck;
use bsc_saps::{SapMsg, SapMsgInner};

use crate::peer::PeerWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackRole {
    Bts,
    Mgw,
    Msc,
    Hodec,
}

/// What a loopback worker gets to start with
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    pub role: LoopbackRole,
    /// (bts, trx) pairs reported ready on startup, BTS role only
    pub trx: Vec<(u8, u8)>,
}

impl LoopbackTransport {
    pub fn new(role: LoopbackRole) -> Self {
        Self { role, trx: vec![] }
    }
}

#[derive(Debug, Default)]
pub struct LoopbackState {
    next_endpoint: EndpointId,
}

/// Replies of a loopback peer to one primitive from the BSC core
pub fn respond(role: LoopbackRole, state: &mut LoopbackState, msg: &SapMsgInner) -> Vec<SapMsgInner> {
    match (role, msg) {
        (LoopbackRole::Bts, SapMsgInner::AbisChanActivReq(req)) => {
            vec![SapMsgInner::AbisChanActivAck(AbisChanActivAck { lchan: req.lchan })]
        }
        (LoopbackRole::Bts, SapMsgInner::AbisRfChanRelReq(req)) => {
            vec![SapMsgInner::AbisRfChanRelAck(AbisRfChanRelAck { lchan: req.lchan })]
        }
        // The MS behind the loopback BTS accepts any channel mode
        (
            LoopbackRole::Bts,
            SapMsgInner::AbisDataReq(AbisDataReq { lchan, l3: L3Msg::ChannelModeModify { ch_mode_rate } }),
        ) => {
            vec![SapMsgInner::AbisDataInd(AbisDataInd {
                lchan: *lchan,
                l3: L3Msg::ChannelModeModifyAck { ch_mode_rate: *ch_mode_rate },
            })]
        }
        (LoopbackRole::Bts, SapMsgInner::AbisModeModifyReq(req)) => {
            vec![SapMsgInner::AbisModeModifyAck(AbisModeModifyAck { lchan: req.lchan })]
        }
        (LoopbackRole::Bts, SapMsgInner::AbisPchanSwitchReq(req)) => {
            vec![SapMsgInner::AbisPchanSwitchAck(AbisPchanSwitchAck { ts: req.ts })]
        }
        (LoopbackRole::Mgw, SapMsgInner::MgcpConnectReq(req)) => {
            let endpoint = req.endpoint.unwrap_or_else(|| {
                state.next_endpoint += 1;
                state.next_endpoint
            });
            vec![SapMsgInner::MgcpConnectAck(MgcpConnectAck { conn: req.conn, endpoint, lchan: req.lchan })]
        }
        (LoopbackRole::Msc, SapMsgInner::BssapReset(reset)) => {
            vec![SapMsgInner::BssapResetAck(BssapResetAck { msc: reset.msc })]
        }
        (LoopbackRole::Msc, SapMsgInner::BssapClearRequest(req)) => {
            vec![SapMsgInner::BssapClearCommand(BssapClearCommand { conn: req.conn, cause: req.cause })]
        }
        _ => vec![],
    }
}

pub struct LoopbackWorker {
    entity_self: BscEntity,
    entity_dest: BscEntity,
    sap: Sap,
    transport: LoopbackTransport,
    state: LoopbackState,
    w2e_sender: Sender<SapMsg>,
    e2w_receiver: Receiver<SapMsg>,
}

impl LoopbackWorker {
    fn send(&self, msg: SapMsgInner, dltime: BscTime) -> bool {
        let msg = SapMsg::new(self.sap, self.entity_self, self.entity_dest, dltime, msg);
        if let Err(e) = self.w2e_sender.send(msg) {
            tracing::error!("loopback {:?}: entity gone: {:?}", self.transport.role, e.0.msg);
            return false;
        }
        true
    }
}

impl PeerWorker for LoopbackWorker {
    type Transport = LoopbackTransport;

    fn new(
        entity_self: BscEntity,
        entity_dest: BscEntity,
        sap: Sap,
        w2e_sender: Sender<SapMsg>,
        e2w_receiver: Receiver<SapMsg>,
        transport: Self::Transport,
    ) -> Self {
        Self { entity_self, entity_dest, sap, transport, state: LoopbackState::default(), w2e_sender, e2w_receiver }
    }

    fn run(&mut self) {
        tracing::info!("loopback {:?} started", self.transport.role);

        for (bts, trx) in self.transport.trx.clone() {
            if !self.send(SapMsgInner::AbisTrxReady(AbisTrxReady { bts, trx }), Default::default()) {
                return;
            }
        }

        while let Ok(msg) = self.e2w_receiver.recv() {
            tracing::debug!("loopback {:?}: {}", self.transport.role, msg.msg);
            for reply in respond(self.transport.role, &mut self.state, &msg.msg) {
                if !self.send(reply, msg.dltime) {
                    return;
                }
            }
        }
        tracing::info!("loopback {:?} stopped", self.transport.role);
    }
}
