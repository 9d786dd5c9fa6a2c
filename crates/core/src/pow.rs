//! Proof-of-work chain rules.

use crate::{ChainRules, Task, TaskKind};
use blocksim_types::{Block, Difficulty, NodeIndex};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// Heaviest-chain proof of work with exponentially distributed block times.
///
/// With total network power `W` and genesis difficulty `W * target`, a miner
/// with power `w` finds a block after `Exp(w / difficulty)` milliseconds, so
/// the network as a whole averages one block per target interval.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    target_interval: Duration,
}

impl ProofOfWork {
    pub fn new(target_interval: Duration) -> Self {
        Self { target_interval }
    }

    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }
}

impl ChainRules for ProofOfWork {
    fn is_better_than(&self, candidate: &Block, current: Option<&Block>) -> bool {
        match current {
            None => true,
            Some(current) => candidate.total_difficulty > current.total_difficulty,
        }
    }

    fn next_mining_task(
        &self,
        minter: NodeIndex,
        mining_power: u64,
        parent: &Block,
        rng: &mut ChaCha8Rng,
    ) -> Option<Task> {
        if mining_power == 0 {
            return None;
        }
        let difficulty = parent.next_difficulty;
        // u in (0, 1] so ln(u) is finite
        let u: f64 = 1.0 - rng.gen::<f64>();
        let interval_ms = -u.ln() * difficulty as f64 / mining_power as f64;

        Some(Task::new(
            TaskKind::MiningComplete {
                minter,
                parent: parent.id,
                difficulty,
            },
            Duration::from_millis(interval_ms as u64),
        ))
    }

    fn genesis_next_difficulty(&self, total_mining_power: u64) -> Difficulty {
        let target_ms = self.target_interval.as_millis();
        (Difficulty::from(total_mining_power) * target_ms).max(1)
    }
}
