//! Future event list with deterministic ordering.

use crate::{MiningAdmission, Task};
use blocksim_types::BlockId;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::trace;

/// Key for ordering tasks in the queue.
///
/// Tasks are ordered by:
/// 1. Time (earlier first)
/// 2. Sequence number (FIFO for tasks due at the same time)
///
/// The sequence number is assigned at insertion, so identical
/// schedule/cancel call sequences always produce the same execution order.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct TaskKey {
    /// When this task should run.
    pub time: Duration,
    /// Insertion sequence number.
    pub sequence: u64,
}

impl Ord for TaskKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Order by time first
        match self.time.cmp(&other.time) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Finally by sequence (FIFO)
        self.sequence.cmp(&other.sequence)
    }
}

impl PartialOrd for TaskKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The simulation's future event list.
///
/// Owns simulated time. [`advance`](Self::advance) pops the earliest task and
/// moves the clock to its scheduled time; the caller runs it, which may
/// schedule further tasks.
#[derive(Debug)]
pub struct Scheduler {
    /// Pending tasks, ordered deterministically.
    queue: BTreeMap<TaskKey, Task>,

    /// Keys of pending tasks that may be withdrawn with [`cancel`](Self::cancel).
    cancelable: HashSet<TaskKey>,

    /// Sequence counter for deterministic ordering.
    sequence: u64,

    /// Current simulation time.
    now: Duration,

    /// Total tasks ever scheduled since the last reset.
    task_count: u64,

    /// Per-parent filter on competing minting tasks.
    admission: MiningAdmission,
}

impl Scheduler {
    /// Create an empty scheduler.
    ///
    /// `admission_ceiling` bounds minting tasks per parent block; `None`
    /// admits every task.
    pub fn new(admission_ceiling: Option<usize>) -> Self {
        Self {
            queue: BTreeMap::new(),
            cancelable: HashSet::new(),
            sequence: 0,
            now: Duration::ZERO,
            task_count: 0,
            admission: MiningAdmission::new(admission_ceiling),
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no task is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total tasks scheduled since the last reset.
    pub fn task_count(&self) -> u64 {
        self.task_count
    }

    /// Schedule `task` to run `task.interval` after the current time.
    pub fn schedule(&mut self, task: Task) -> TaskKey {
        let time = self.now + task.interval;
        self.insert(time, task)
    }

    /// Schedule `task` and register it so it can later be cancelled.
    pub fn schedule_cancelable(&mut self, task: Task) -> TaskKey {
        let key = self.schedule(task);
        self.cancelable.insert(key);
        key
    }

    /// Withdraw a cancelable task.
    ///
    /// Returns `true` if the task was still pending. Cancelling a task that
    /// already ran, was never cancelable, or was already cancelled is a no-op.
    pub fn cancel(&mut self, key: TaskKey) -> bool {
        if !self.cancelable.remove(&key) {
            return false;
        }
        let removed = self.queue.remove(&key).is_some();
        if removed {
            trace!(time = ?key.time, sequence = key.sequence, "Cancelled task");
        }
        removed
    }

    /// Whether the task behind `key` is still waiting to run.
    pub fn is_pending(&self, key: TaskKey) -> bool {
        self.queue.contains_key(&key)
    }

    /// The next task due, without removing it.
    pub fn peek_next(&self) -> Option<(TaskKey, &Task)> {
        self.queue.first_key_value().map(|(key, task)| (*key, task))
    }

    /// Pop the earliest task and move the clock to its scheduled time.
    ///
    /// The caller is responsible for running the returned task.
    pub fn advance(&mut self) -> Option<(TaskKey, Task)> {
        let (key, task) = self.queue.pop_first()?;
        self.cancelable.remove(&key);
        debug_assert!(key.time >= self.now, "time must not run backwards");
        self.now = key.time;
        Some((key, task))
    }

    /// Decide whether a candidate minting task on `parent`, a block at
    /// `height`, may be scheduled.
    ///
    /// Candidates are compared by their absolute completion time, so tasks
    /// drawn at different moments compete fairly.
    pub fn admit_mining_task(&mut self, parent: BlockId, height: u64, interval: Duration) -> bool {
        let due = self.now + interval;
        self.admission.admit(parent, height, due)
    }

    /// Forget admission windows of parents below `height`.
    ///
    /// Call once no node's best block is below `height`.
    pub fn retire_mining_windows_below(&mut self, height: u64) {
        self.admission.retire_below(height);
    }

    /// The mining admission filter, for inspection.
    pub fn admission(&self) -> &MiningAdmission {
        &self.admission
    }

    /// Clear queue, cancelable registry, clock, counters and admission
    /// windows for reuse across runs.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.cancelable.clear();
        self.sequence = 0;
        self.now = Duration::ZERO;
        self.task_count = 0;
        self.admission.clear();
    }

    fn insert(&mut self, time: Duration, task: Task) -> TaskKey {
        self.sequence += 1;
        self.task_count += 1;
        let key = TaskKey {
            time,
            sequence: self.sequence,
        };
        self.queue.insert(key, task);
        key
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(None)
    }
}
