//! Block type.

use crate::{BlockId, NodeIndex, TxId};
use std::time::Duration;

/// Proof-of-work weight.
///
/// Wide enough that total difficulty never overflows over realistic runs.
pub type Difficulty = u128;

/// A block in the shared block tree.
///
/// Blocks are created only through [`BlockArena`](crate::BlockArena) and are
/// never mutated afterwards. Nodes hold blocks by [`BlockId`], so one block is
/// freely shared by every node that learned of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Identity within the arena.
    pub id: BlockId,

    /// Parent block (`None` only for genesis).
    pub parent: Option<BlockId>,

    /// Node that minted the block.
    pub minter: NodeIndex,

    /// Simulation time at which the block was minted.
    pub time: Duration,

    /// Transactions included in the block, in ascending id order.
    pub transactions: Vec<TxId>,

    /// Work contributed by this block.
    pub difficulty: Difficulty,

    /// Cumulative work from genesis up to and including this block.
    pub total_difficulty: Difficulty,

    /// Difficulty a child of this block will be mined at.
    pub next_difficulty: Difficulty,

    /// Distance from genesis (genesis = 0).
    pub height: u64,
}

impl Block {
    /// Check if this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }

    /// Check whether the block includes a transaction.
    pub fn contains_transaction(&self, tx: TxId) -> bool {
        self.transactions.binary_search(&tx).is_ok()
    }
}
