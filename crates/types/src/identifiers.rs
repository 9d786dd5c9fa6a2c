//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a node in the simulated network.
///
/// Node indices are dense (`0..n`) and double as the position of the node in
/// the runner's node table.
pub type NodeIndex = u32;

/// Identity of a block in the [`BlockArena`](crate::BlockArena).
///
/// Ids are assigned in creation order, so the genesis block is always
/// `BlockId(0)` and a parent id is always smaller than its child's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u64);

impl BlockId {
    /// Id of the genesis block.
    pub const GENESIS: BlockId = BlockId(0);
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Identity of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Geographic region a node is placed in.
///
/// Opaque index into the link model's latency and bandwidth tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Region(pub u16);

impl Region {
    /// Index into per-region tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
