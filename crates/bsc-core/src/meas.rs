use std::collections::VecDeque;

use crate::CellId;

/// Number of measurement reports kept per lchan
pub const MAX_MEAS_REP: usize = 10;

/// One measurement result as relayed by the BTS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasRep {
    /// Downlink RXLEV of the serving cell, 0..=63
    pub rxlev_dl: u8,
    /// Downlink RXQUAL of the serving cell, 0..=7
    pub rxqual_dl: u8,
    /// RXLEV per reported neighbour cell
    pub neighbors: Vec<(CellId, u8)>,
}

/// Bounded history of measurement reports, oldest first
#[derive(Debug, Clone, Default)]
pub struct MeasRepRing {
    reps: VecDeque<MeasRep>,
}

impl MeasRepRing {
    pub fn new() -> Self {
        Self { reps: VecDeque::with_capacity(MAX_MEAS_REP) }
    }

    pub fn push(&mut self, rep: MeasRep) {
        if self.reps.len() == MAX_MEAS_REP {
            self.reps.pop_front();
        }
        self.reps.push_back(rep);
    }

    pub fn len(&self) -> usize {
        self.reps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reps.is_empty()
    }

    pub fn clear(&mut self) {
        self.reps.clear();
    }

    /// Iterates over the `n` most recent reports, newest last
    pub fn latest(&self, n: usize) -> impl Iterator<Item = &MeasRep> {
        let skip = self.reps.len().saturating_sub(n);
        self.reps.iter().skip(skip)
    }

    /// Average serving cell RXLEV over the `window` most recent reports
    pub fn avg_rxlev(&self, window: usize) -> Option<u32> {
        let vals: Vec<u32> = self.latest(window).map(|r| r.rxlev_dl as u32).collect();
        if vals.is_empty() {
            return None;
        }
        Some(vals.iter().sum::<u32>() / vals.len() as u32)
    }

    /// Average RXLEV of a neighbour over the `window` most recent reports.
    /// Reports not mentioning the neighbour are skipped.
    pub fn avg_neighbor_rxlev(&self, cell: CellId, window: usize) -> Option<u32> {
        let vals: Vec<u32> = self
            .latest(window)
            .filter_map(|r| r.neighbors.iter().find(|(c, _)| *c == cell).map(|(_, lev)| *lev as u32))
            .collect();
        if vals.is_empty() {
            return None;
        }
        Some(vals.iter().sum::<u32>() / vals.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep(rxlev: u8, nb: Option<(CellId, u8)>) -> MeasRep {
        MeasRep { rxlev_dl: rxlev, rxqual_dl: 0, neighbors: nb.into_iter().collect() }
    }

    #[test]
    fn test_ring_is_bounded() {
        let mut ring = MeasRepRing::new();
        for i in 0..(MAX_MEAS_REP as u8 + 5) {
            ring.push(rep(i, None));
        }
        assert_eq!(ring.len(), MAX_MEAS_REP);
        // Oldest 5 were dropped
        assert_eq!(ring.latest(MAX_MEAS_REP).next().map(|r| r.rxlev_dl), Some(5));
    }

    #[test]
    fn test_averages() {
        let nb = CellId { lac: 1, ci: 7 };
        let mut ring = MeasRepRing::new();
        ring.push(rep(10, Some((nb, 40))));
        ring.push(rep(20, None));
        ring.push(rep(30, Some((nb, 50))));
        assert_eq!(ring.avg_rxlev(2), Some(25));
        assert_eq!(ring.avg_neighbor_rxlev(nb, 3), Some(45));
        assert_eq!(ring.avg_neighbor_rxlev(CellId { lac: 1, ci: 8 }, 3), None);
    }
}
