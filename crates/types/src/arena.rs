//! Append-only block storage.
//!
//! Every block minted during a run lives here exactly once. Parents are stored
//! as ids rather than references, so the tree has no ownership cycles and a
//! block can be shared by any number of nodes without reference counting.

use crate::{Block, BlockId, Difficulty, NodeIndex, TxId};
use std::time::Duration;

/// Arena of all blocks in a simulation run, indexed by [`BlockId`].
#[derive(Debug, Default, Clone)]
pub struct BlockArena {
    blocks: Vec<Block>,
}

impl BlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the genesis block.
    ///
    /// The arena must be empty; genesis is always `BlockId::GENESIS`.
    pub fn genesis(&mut self, minter: NodeIndex, next_difficulty: Difficulty) -> BlockId {
        assert!(self.blocks.is_empty(), "genesis must be the first block");
        self.blocks.push(Block {
            id: BlockId::GENESIS,
            parent: None,
            minter,
            time: Duration::ZERO,
            transactions: Vec::new(),
            difficulty: 0,
            total_difficulty: 0,
            next_difficulty: next_difficulty.max(1),
            height: 0,
        });
        BlockId::GENESIS
    }

    /// Mint a child of `parent`.
    ///
    /// Height, total difficulty and next difficulty are derived from the
    /// parent. `difficulty` must be non-zero so total difficulty strictly
    /// increases along every chain.
    pub fn mint(
        &mut self,
        parent: BlockId,
        minter: NodeIndex,
        time: Duration,
        difficulty: Difficulty,
        mut transactions: Vec<TxId>,
    ) -> BlockId {
        debug_assert!(difficulty > 0, "minted blocks must carry work");
        let parent_block = self.get(parent);
        let height = parent_block.height + 1;
        let total_difficulty = parent_block.total_difficulty + difficulty;
        let next_difficulty = parent_block.next_difficulty;

        transactions.sort_unstable();
        transactions.dedup();

        let id = BlockId(self.blocks.len() as u64);
        self.blocks.push(Block {
            id,
            parent: Some(parent),
            minter,
            time,
            transactions,
            difficulty,
            total_difficulty,
            next_difficulty,
            height,
        });
        id
    }

    /// Look up a block.
    ///
    /// Ids are only ever handed out by this arena, so a missing id is a
    /// programming error.
    pub fn get(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    /// Look up a block that may not exist (e.g. after a reset).
    pub fn try_get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0 as usize)
    }

    pub fn parent(&self, id: BlockId) -> Option<BlockId> {
        self.get(id).parent
    }

    pub fn height(&self, id: BlockId) -> u64 {
        self.get(id).height
    }

    /// Iterate from `tip` back to genesis (inclusive).
    pub fn ancestors(&self, tip: BlockId) -> Ancestors<'_> {
        Ancestors {
            arena: self,
            next: Some(tip),
        }
    }

    /// Walk back from `id` to the ancestor at `height`.
    ///
    /// Returns `None` if `height` is above the block.
    pub fn ancestor_at(&self, id: BlockId, height: u64) -> Option<BlockId> {
        self.ancestors(id).find(|&b| self.height(b) <= height).filter(|&b| self.height(b) == height)
    }

    /// Whether one block is an ancestor of (or equal to) the other.
    pub fn is_on_same_chain(&self, a: BlockId, b: BlockId) -> bool {
        let (low, high) = if self.height(a) <= self.height(b) {
            (a, b)
        } else {
            (b, a)
        };
        self.ancestor_at(high, self.height(low)) == Some(low)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Drop every block, ready for another run.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}

/// Iterator over a block and its ancestors, tip first.
#[derive(Debug)]
pub struct Ancestors<'a> {
    arena: &'a BlockArena,
    next: Option<BlockId>,
}

impl Iterator for Ancestors<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        let current = self.next?;
        self.next = self.arena.parent(current);
        Some(current)
    }
}
