//! Run statistics.

use blocksim_core::{TaskClass, TaskKind};
use blocksim_node::RelayCounters;
use std::collections::BTreeMap;

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Total tasks executed.
    pub tasks_executed: u64,
    /// Tasks executed by class.
    pub tasks_by_class: [u64; TaskClass::COUNT],
    /// Tasks executed by kind name.
    pub tasks_by_kind: BTreeMap<&'static str, u64>,
    /// Blocks minted, genesis excluded.
    pub blocks_minted: u64,
    /// Transactions injected from outside the network.
    pub transactions_injected: u64,
    /// Counters bumped by node handlers.
    pub relay: RelayCounters,
}

impl SimulationStats {
    pub(crate) fn record(&mut self, kind: &TaskKind) {
        self.tasks_executed += 1;
        self.tasks_by_class[kind.class() as usize] += 1;
        *self.tasks_by_kind.entry(kind.name()).or_default() += 1;
    }

    pub fn class_count(&self, class: TaskClass) -> u64 {
        self.tasks_by_class[class as usize]
    }

    /// Tasks executed of the kind named `name` (see [`TaskKind::name`]).
    pub fn kind_count(&self, name: &str) -> u64 {
        self.tasks_by_kind.get(name).copied().unwrap_or(0)
    }

    /// Fraction of adversarial sends that were dropped rather than delayed.
    pub fn drop_rate(&self) -> f64 {
        let total = self.relay.sends_delayed + self.relay.sends_dropped;
        if total == 0 {
            0.0
        } else {
            self.relay.sends_dropped as f64 / total as f64
        }
    }
}
