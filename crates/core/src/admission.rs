//! Mining-task admission filter.
//!
//! Every miner draws a candidate minting task whenever its best block
//! changes, so without a filter the queue grows with the miner count even
//! though only the earliest candidate per parent can ever win. The filter
//! admits the first `ceiling` candidates per parent outright and afterwards
//! only candidates that finish strictly earlier than every one admitted so
//! far, which keeps the eventual winner unchanged.
//!
//! Windows are tagged with their parent's height. Once every node's best
//! block is above a height nobody mines on it again, and
//! [`retire_below`](MiningAdmission::retire_below) drops those windows.

use blocksim_types::BlockId;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct AdmissionWindow {
    height: u64,
    admitted: usize,
    earliest: Duration,
}

/// Per-parent bound on competing minting tasks.
#[derive(Debug, Clone, Default)]
pub struct MiningAdmission {
    /// `None` disables filtering.
    ceiling: Option<usize>,
    windows: HashMap<BlockId, AdmissionWindow>,
}

impl MiningAdmission {
    pub fn new(ceiling: Option<usize>) -> Self {
        Self {
            ceiling,
            windows: HashMap::new(),
        }
    }

    /// Decide whether a candidate completing at `due` on `parent`, a block
    /// at `height`, is kept.
    pub fn admit(&mut self, parent: BlockId, height: u64, due: Duration) -> bool {
        let Some(ceiling) = self.ceiling else {
            return true;
        };

        let window = self.windows.entry(parent).or_insert(AdmissionWindow {
            height,
            admitted: 0,
            earliest: Duration::MAX,
        });

        if window.admitted < ceiling || due < window.earliest {
            window.admitted += 1;
            window.earliest = window.earliest.min(due);
            true
        } else {
            false
        }
    }

    /// Number of candidates admitted for `parent`.
    pub fn admitted(&self, parent: BlockId) -> usize {
        self.windows.get(&parent).map_or(0, |w| w.admitted)
    }

    /// Configured ceiling, `None` when filtering is off.
    pub fn ceiling(&self) -> Option<usize> {
        self.ceiling
    }

    /// Number of parents with an open window.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Drop the windows of parents below `height`.
    pub fn retire_below(&mut self, height: u64) {
        self.windows.retain(|_, window| window.height >= height);
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }
}
