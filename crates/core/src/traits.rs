//! Collaborator interfaces.
//!
//! The kernel does not build networks or validate consensus itself. It
//! queries these traits, implemented by the in-memory network crate and by
//! [`ProofOfWork`](crate::ProofOfWork).

use crate::Task;
use blocksim_types::{Block, Difficulty, NodeIndex, Region};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// Who is connected to whom, and where each node lives.
pub trait Topology {
    /// Total number of nodes.
    fn node_count(&self) -> usize;

    /// A node's neighbors, in a stable order.
    fn neighbors(&self, node: NodeIndex) -> &[NodeIndex];

    /// Region a node is placed in.
    fn region(&self, node: NodeIndex) -> Region;
}

/// Point-to-point link characteristics between regions.
pub trait LinkModel {
    /// Usable bandwidth from `from` to `to`, in bytes per millisecond.
    ///
    /// Always non-zero; implementations reject zero at construction.
    fn bandwidth(&self, from: Region, to: Region) -> u64;

    /// One-way latency from `from` to `to`.
    fn latency(&self, from: Region, to: Region) -> Duration;
}

/// Chain-selection and minting rules.
pub trait ChainRules {
    /// Whether `candidate` should replace `current` as a node's best block.
    fn is_better_than(&self, candidate: &Block, current: Option<&Block>) -> bool;

    /// Draw the next minting task for `minter` building on `parent`.
    ///
    /// Returns `None` when the minter cannot mint (e.g. zero mining power).
    fn next_mining_task(
        &self,
        minter: NodeIndex,
        mining_power: u64,
        parent: &Block,
        rng: &mut ChaCha8Rng,
    ) -> Option<Task>;

    /// Difficulty the first block after genesis is mined at.
    fn genesis_next_difficulty(&self, total_mining_power: u64) -> Difficulty;
}
