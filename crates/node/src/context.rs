//! Everything a node handler may touch besides its own state.

use crate::RelayConfig;
use blocksim_core::{
    delivery_interval, ChainRules, LinkModel, ObservationLedger, Scheduler, Task, TaskKey,
    Topology,
};
use blocksim_types::{BlockArena, NodeIndex, Region};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// Publicly visible facts about a node that its peers may act on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerInfo {
    /// Whether the node accepts compact blocks.
    pub uses_compact_relay: bool,
    /// Whether the node is adversarial. Honest nodes arm download timeouts
    /// only against adversarial advertisers.
    pub adversarial: bool,
    pub churn: bool,
}

/// [`PeerInfo`] for every node, indexed by [`NodeIndex`].
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: Vec<PeerInfo>,
}

impl PeerDirectory {
    pub fn new(peers: Vec<PeerInfo>) -> Self {
        Self { peers }
    }

    pub fn get(&self, node: NodeIndex) -> PeerInfo {
        self.peers[node as usize]
    }

    pub fn uses_compact_relay(&self, node: NodeIndex) -> bool {
        self.get(node).uses_compact_relay
    }

    pub fn is_adversarial(&self, node: NodeIndex) -> bool {
        self.get(node).adversarial
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Counters nodes bump as they run. Aggregated into run statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayCounters {
    /// Own minting tasks withdrawn because a better block arrived.
    pub mining_cancelled: u64,
    /// Minting candidates rejected by the admission filter.
    pub mining_filtered: u64,
    /// Sends held back over a delayed adversarial link.
    pub sends_delayed: u64,
    /// Sends dropped over a delayed adversarial link.
    pub sends_dropped: u64,
    /// Compact blocks that needed a missing-transactions round trip.
    pub compact_failures: u64,
    /// Adoptions that switched to a different chain.
    pub reorgs: u64,
    /// Download timeouts that re-requested from another advertiser.
    pub timeout_retries: u64,
}

/// The slice of simulation state a node handler runs against.
///
/// Built by the runner from disjoint fields for the duration of one task,
/// so a node can read shared state and schedule follow-up tasks while the
/// runner still holds the node table.
pub struct NodeContext<'a> {
    pub scheduler: &'a mut Scheduler,
    pub blocks: &'a BlockArena,
    pub topology: &'a dyn Topology,
    pub links: &'a dyn LinkModel,
    pub chain: &'a dyn ChainRules,
    pub peers: &'a PeerDirectory,
    pub config: &'a RelayConfig,
    pub rng: &'a mut ChaCha8Rng,
    pub observations: &'a mut ObservationLedger,
    pub counters: &'a mut RelayCounters,
}

impl NodeContext<'_> {
    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub fn region(&self, node: NodeIndex) -> Region {
        self.topology.region(node)
    }

    /// Link bandwidth from one node to another, in bytes per millisecond.
    pub fn bandwidth(&self, from: NodeIndex, to: NodeIndex) -> u64 {
        self.links.bandwidth(self.region(from), self.region(to))
    }

    /// One-hop delivery interval for `payload_bytes` from `from` to `to`.
    ///
    /// `share` divides the link bandwidth among that many concurrent sends.
    pub fn message_interval(
        &self,
        from: NodeIndex,
        to: NodeIndex,
        payload_bytes: u64,
        share: u32,
    ) -> Duration {
        let latency = self.links.latency(self.region(from), self.region(to));
        let bandwidth = (self.bandwidth(from, to) / u64::from(share.max(1))).max(1);
        delivery_interval(latency, bandwidth, payload_bytes, self.config.processing_time())
    }

    pub fn schedule(&mut self, task: Task) -> TaskKey {
        self.scheduler.schedule(task)
    }
}
