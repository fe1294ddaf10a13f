// Entities taking part in the BSC message flow
#[derive(PartialEq, Eq, Hash, Clone, Debug, Copy)]
pub enum BscEntity {
    /// Base transceiver stations, reached over Abis
    Bts,
    /// Media gateway
    Mgw,
    /// MSC pool, reached over the A interface
    Msc,
    /// The BSC signaling core: lchan/TS/conn state machines, router, paging
    Bsc,
    /// Handover decision, receives handover outcomes
    Hodec,
    /// Operator / O&M side, issues resets and manual handovers
    Operator,
}
