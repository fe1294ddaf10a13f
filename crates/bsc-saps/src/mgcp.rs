use bsc_core::{ChannelModeAndRate, ConnId, EndpointId, LchanId};

/// Connect the BTS side of an MGW endpoint to an lchan.
/// Without an endpoint, the MGW allocates a new one.
#[derive(Debug)]
pub struct MgcpConnectReq {
    pub conn: ConnId,
    pub endpoint: Option<EndpointId>,
    pub lchan: LchanId,
    pub ch_mode_rate: ChannelModeAndRate,
}

#[derive(Debug)]
pub struct MgcpConnectAck {
    pub conn: ConnId,
    pub endpoint: EndpointId,
    pub lchan: LchanId,
}

#[derive(Debug)]
pub struct MgcpConnectNack {
    pub conn: ConnId,
    pub lchan: LchanId,
}

#[derive(Debug)]
pub struct MgcpEndpointRelease {
    pub endpoint: EndpointId,
}
