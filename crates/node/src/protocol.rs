//! Block propagation protocol family.
//!
//! Each protocol decides which neighbors receive a newly adopted block
//! directly (pushed into the upload queue) and which only get an inventory
//! advertisement, whether it speaks compact blocks, and how its uploads
//! share bandwidth. [`PropagationProtocol`] is the closed set of protocols a
//! node can run; all per-protocol behavior goes through [`RelayStrategy`].

use crate::{PeerDirectory, ReconstructionModel, RelayConfig};
use blocksim_core::{ConfigError, LinkModel, Topology};
use blocksim_types::NodeIndex;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Protocol selector, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Push,
    #[serde(alias = "adv")]
    Advertisement,
    #[serde(alias = "cbr")]
    CompactBlockRelay,
    Hybrid,
    #[serde(alias = "monero")]
    Fluffy,
    #[serde(alias = "cardano")]
    ParallelFetch,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 6] = [
        ProtocolKind::Push,
        ProtocolKind::Advertisement,
        ProtocolKind::CompactBlockRelay,
        ProtocolKind::Hybrid,
        ProtocolKind::Fluffy,
        ProtocolKind::ParallelFetch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolKind::Push => "push",
            ProtocolKind::Advertisement => "advertisement",
            ProtocolKind::CompactBlockRelay => "compact_block_relay",
            ProtocolKind::Hybrid => "hybrid",
            ProtocolKind::Fluffy => "fluffy",
            ProtocolKind::ParallelFetch => "parallel_fetch",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "push" => Ok(ProtocolKind::Push),
            "advertisement" | "adv" => Ok(ProtocolKind::Advertisement),
            "compact_block_relay" | "cbr" => Ok(ProtocolKind::CompactBlockRelay),
            "hybrid" => Ok(ProtocolKind::Hybrid),
            "fluffy" | "monero" => Ok(ProtocolKind::Fluffy),
            "parallel_fetch" | "cardano" => Ok(ProtocolKind::ParallelFetch),
            _ => Err(ConfigError::UnknownProtocol(s.to_string())),
        }
    }
}

/// Recipients of a newly adopted block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fanout {
    /// Neighbors that get the block pushed into the upload queue.
    pub direct: Vec<NodeIndex>,
    /// Neighbors that only get an inventory advertisement.
    pub inventory: Vec<NodeIndex>,
}

/// How a node's block uploads share its link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendConcurrency {
    /// One upload at a time; the rest wait in the send queue.
    Serial,
    /// Every upload starts immediately, dividing bandwidth by the number in
    /// flight.
    Shared,
}

/// Per-protocol behavior.
pub trait RelayStrategy {
    fn kind(&self) -> ProtocolKind;

    /// Whether this node accepts compact blocks.
    fn uses_compact_relay(&self) -> bool {
        false
    }

    /// Whether a requested block goes to a receiver as a compact block.
    fn sends_compact_to(&self, receiver_uses_compact: bool) -> bool {
        self.uses_compact_relay() && receiver_uses_compact
    }

    /// Split neighbors into direct and inventory recipients.
    fn fanout(
        &mut self,
        neighbors: &[NodeIndex],
        adversarial: bool,
        peers: &PeerDirectory,
        rng: &mut ChaCha8Rng,
    ) -> Fanout;

    /// Model deciding whether a received compact block reconstructs.
    fn reconstruction(&self, configured: ReconstructionModel) -> ReconstructionModel {
        configured
    }

    fn concurrency(&self) -> SendConcurrency {
        SendConcurrency::Serial
    }
}

fn shuffled(neighbors: &[NodeIndex], rng: &mut ChaCha8Rng) -> Vec<NodeIndex> {
    let mut neighbors = neighbors.to_vec();
    neighbors.shuffle(rng);
    neighbors
}

// ─── Protocols ───

/// Flood: every neighbor gets the full block.
#[derive(Debug, Clone, Default)]
pub struct Push;

impl RelayStrategy for Push {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Push
    }

    fn fanout(
        &mut self,
        neighbors: &[NodeIndex],
        _adversarial: bool,
        _peers: &PeerDirectory,
        rng: &mut ChaCha8Rng,
    ) -> Fanout {
        Fanout {
            direct: shuffled(neighbors, rng),
            inventory: Vec::new(),
        }
    }
}

/// Pull: every neighbor gets an inventory and requests the block.
#[derive(Debug, Clone, Default)]
pub struct Advertisement;

impl RelayStrategy for Advertisement {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Advertisement
    }

    fn fanout(
        &mut self,
        neighbors: &[NodeIndex],
        _adversarial: bool,
        _peers: &PeerDirectory,
        rng: &mut ChaCha8Rng,
    ) -> Fanout {
        Fanout {
            direct: Vec::new(),
            inventory: shuffled(neighbors, rng),
        }
    }
}

/// Compact block relay with high- and low-bandwidth peers.
///
/// Neighbors that picked this node as one of their fastest sources are in
/// high-bandwidth mode and get compact blocks pushed. Everyone else gets an
/// inventory. The low-bandwidth set is fixed the first time a block is
/// propagated. Adversarial nodes advertise to everyone instead of pushing.
#[derive(Debug, Clone, Default)]
pub struct CompactBlockRelay {
    high_bandwidth: Vec<NodeIndex>,
    low_bandwidth: Option<Vec<NodeIndex>>,
}

impl CompactBlockRelay {
    /// Put `peer` in high-bandwidth mode.
    pub fn register_high_bandwidth_peer(&mut self, peer: NodeIndex) {
        if !self.high_bandwidth.contains(&peer) {
            self.high_bandwidth.push(peer);
        }
    }

    pub fn high_bandwidth_peers(&self) -> &[NodeIndex] {
        &self.high_bandwidth
    }
}

impl RelayStrategy for CompactBlockRelay {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::CompactBlockRelay
    }

    fn uses_compact_relay(&self) -> bool {
        true
    }

    fn fanout(
        &mut self,
        neighbors: &[NodeIndex],
        adversarial: bool,
        _peers: &PeerDirectory,
        rng: &mut ChaCha8Rng,
    ) -> Fanout {
        let neighbors = shuffled(neighbors, rng);
        if adversarial {
            return Fanout {
                direct: Vec::new(),
                inventory: neighbors,
            };
        }

        let high_bandwidth = &self.high_bandwidth;
        let low_bandwidth = self.low_bandwidth.get_or_insert_with(|| {
            neighbors
                .iter()
                .copied()
                .filter(|n| !high_bandwidth.contains(n))
                .collect()
        });
        Fanout {
            direct: self.high_bandwidth.clone(),
            inventory: low_bandwidth.clone(),
        }
    }
}

/// Square-root fan-out: `ceil(sqrt(n))` random neighbors get the block,
/// the rest an inventory.
#[derive(Debug, Clone, Default)]
pub struct Hybrid;

impl Hybrid {
    pub fn direct_count(neighbors: usize) -> usize {
        (neighbors as f64).sqrt().ceil() as usize
    }
}

impl RelayStrategy for Hybrid {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Hybrid
    }

    fn fanout(
        &mut self,
        neighbors: &[NodeIndex],
        _adversarial: bool,
        _peers: &PeerDirectory,
        rng: &mut ChaCha8Rng,
    ) -> Fanout {
        let mut direct = shuffled(neighbors, rng);
        let inventory = direct.split_off(Self::direct_count(direct.len()).min(direct.len()));
        Fanout { direct, inventory }
    }
}

/// Probabilistic fluffy blocks.
///
/// Each node opts into compact relay once, at construction. Blocks are
/// pushed to every neighbor, compact-capable ones first, and go compact
/// whenever the receiver opted in. Reconstruction always follows the
/// failure-rate model.
#[derive(Debug, Clone)]
pub struct Fluffy {
    opted_in: bool,
}

impl Fluffy {
    pub fn new(opted_in: bool) -> Self {
        Self { opted_in }
    }
}

impl RelayStrategy for Fluffy {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Fluffy
    }

    fn uses_compact_relay(&self) -> bool {
        self.opted_in
    }

    fn sends_compact_to(&self, receiver_uses_compact: bool) -> bool {
        receiver_uses_compact
    }

    fn fanout(
        &mut self,
        neighbors: &[NodeIndex],
        _adversarial: bool,
        peers: &PeerDirectory,
        _rng: &mut ChaCha8Rng,
    ) -> Fanout {
        let (mut direct, rest): (Vec<NodeIndex>, Vec<NodeIndex>) = neighbors
            .iter()
            .copied()
            .partition(|&n| peers.uses_compact_relay(n));
        direct.extend(rest);
        Fanout {
            direct,
            inventory: Vec::new(),
        }
    }

    fn reconstruction(&self, _configured: ReconstructionModel) -> ReconstructionModel {
        ReconstructionModel::Probabilistic
    }
}

/// Pull with unbounded parallel uploads sharing the node's bandwidth.
#[derive(Debug, Clone, Default)]
pub struct ParallelFetch;

impl RelayStrategy for ParallelFetch {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::ParallelFetch
    }

    fn fanout(
        &mut self,
        neighbors: &[NodeIndex],
        _adversarial: bool,
        _peers: &PeerDirectory,
        _rng: &mut ChaCha8Rng,
    ) -> Fanout {
        Fanout {
            direct: Vec::new(),
            inventory: neighbors.to_vec(),
        }
    }

    fn concurrency(&self) -> SendConcurrency {
        SendConcurrency::Shared
    }
}

// ─── Protocol Selection ───

/// The protocol a node runs, fixed at construction.
#[derive(Debug, Clone)]
pub enum PropagationProtocol {
    Push(Push),
    Advertisement(Advertisement),
    CompactBlockRelay(CompactBlockRelay),
    Hybrid(Hybrid),
    Fluffy(Fluffy),
    ParallelFetch(ParallelFetch),
}

impl PropagationProtocol {
    /// Instantiate a protocol for one node.
    ///
    /// Fluffy nodes draw their compact opt-in here.
    pub fn new(kind: ProtocolKind, config: &RelayConfig, rng: &mut ChaCha8Rng) -> Self {
        match kind {
            ProtocolKind::Push => PropagationProtocol::Push(Push),
            ProtocolKind::Advertisement => PropagationProtocol::Advertisement(Advertisement),
            ProtocolKind::CompactBlockRelay => {
                PropagationProtocol::CompactBlockRelay(CompactBlockRelay::default())
            }
            ProtocolKind::Hybrid => PropagationProtocol::Hybrid(Hybrid),
            ProtocolKind::Fluffy => {
                let opted_in = rng.gen::<f64>() < config.compact_adoption_probability;
                PropagationProtocol::Fluffy(Fluffy::new(opted_in))
            }
            ProtocolKind::ParallelFetch => PropagationProtocol::ParallelFetch(ParallelFetch),
        }
    }

    pub fn strategy(&self) -> &dyn RelayStrategy {
        match self {
            PropagationProtocol::Push(p) => p,
            PropagationProtocol::Advertisement(p) => p,
            PropagationProtocol::CompactBlockRelay(p) => p,
            PropagationProtocol::Hybrid(p) => p,
            PropagationProtocol::Fluffy(p) => p,
            PropagationProtocol::ParallelFetch(p) => p,
        }
    }

    pub fn strategy_mut(&mut self) -> &mut dyn RelayStrategy {
        match self {
            PropagationProtocol::Push(p) => p,
            PropagationProtocol::Advertisement(p) => p,
            PropagationProtocol::CompactBlockRelay(p) => p,
            PropagationProtocol::Hybrid(p) => p,
            PropagationProtocol::Fluffy(p) => p,
            PropagationProtocol::ParallelFetch(p) => p,
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        self.strategy().kind()
    }

    pub fn uses_compact_relay(&self) -> bool {
        self.strategy().uses_compact_relay()
    }

    /// The compact relay state, if this node runs compact block relay.
    pub fn as_compact_block_relay_mut(&mut self) -> Option<&mut CompactBlockRelay> {
        match self {
            PropagationProtocol::CompactBlockRelay(p) => Some(p),
            _ => None,
        }
    }
}

/// Neighbors `node` would pick as high-bandwidth sources.
///
/// Ranks neighbors by estimated one-hop compact block delivery time towards
/// `node` (ascending, ties by index) and returns the first `count`.
pub fn rank_high_bandwidth_peers(
    node: NodeIndex,
    topology: &dyn Topology,
    links: &dyn LinkModel,
    compact_block_size: u64,
    count: usize,
) -> Vec<NodeIndex> {
    let to = topology.region(node);
    let mut ranked: Vec<(u128, NodeIndex)> = topology
        .neighbors(node)
        .iter()
        .map(|&peer| {
            let from = topology.region(peer);
            let bandwidth = links.bandwidth(from, to).max(1);
            let estimate =
                links.latency(from, to).as_millis() + u128::from(compact_block_size / bandwidth);
            (estimate, peer)
        })
        .collect();
    ranked.sort_unstable();
    ranked.into_iter().take(count).map(|(_, peer)| peer).collect()
}
