//! First-observation ledger.
//!
//! The only telemetry the kernel produces: "block B was first observed by
//! node N at time T", recorded at most once per (block, node) pair. Reporting
//! derives propagation delays from it.

use blocksim_types::{BlockId, NodeIndex};
use std::collections::HashSet;
use std::time::Duration;

/// A single first-observation notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockObservation {
    pub block: BlockId,
    pub node: NodeIndex,
    pub at: Duration,
}

/// Append-only record of first observations.
#[derive(Debug, Default, Clone)]
pub struct ObservationLedger {
    observations: Vec<BlockObservation>,
    seen: HashSet<(BlockId, NodeIndex)>,
}

impl ObservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `node` first became aware of `block` at `at`.
    ///
    /// Returns `false` (and records nothing) if the pair was already seen.
    pub fn record(&mut self, block: BlockId, node: NodeIndex, at: Duration) -> bool {
        if !self.seen.insert((block, node)) {
            return false;
        }
        self.observations.push(BlockObservation { block, node, at });
        true
    }

    pub fn contains(&self, block: BlockId, node: NodeIndex) -> bool {
        self.seen.contains(&(block, node))
    }

    /// All observations, in the order they were raised.
    pub fn observations(&self) -> &[BlockObservation] {
        &self.observations
    }

    /// Observations of one block.
    pub fn for_block(&self, block: BlockId) -> impl Iterator<Item = &BlockObservation> {
        self.observations.iter().filter(move |o| o.block == block)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn clear(&mut self) {
        self.observations.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_once_per_pair() {
        let mut ledger = ObservationLedger::new();
        assert!(ledger.record(BlockId(1), 2, Duration::from_millis(5)));
        assert!(!ledger.record(BlockId(1), 2, Duration::from_millis(9)));
        assert!(ledger.record(BlockId(1), 3, Duration::from_millis(9)));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.for_block(BlockId(1)).count(), 2);
        assert_eq!(ledger.observations()[0].at, Duration::from_millis(5));
    }
}
