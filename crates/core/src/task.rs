//! Task and message model.
//!
//! A [`Task`] is anything the scheduler can run: a network message arriving at
//! its receiver, a miner finding a block, a request timing out, or an
//! adversarially delayed send becoming due. Tasks are immutable once
//! scheduled; the only way to withdraw one is to cancel it while pending.

use blocksim_types::{BlockId, Difficulty, NodeIndex, TxId};
use std::time::Duration;

/// Coarse classification of tasks, used for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskClass {
    /// Block-family and transaction messages between nodes.
    Message = 0,
    /// Minting completions.
    Mining = 1,
    /// Download timeouts.
    Timer = 2,
    /// Adversarially delayed sends.
    Adversarial = 3,
}

impl TaskClass {
    pub const COUNT: usize = 4;
}

/// Why a block is being sent to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockSendKind {
    /// The peer asked for the block (or is pushed it as if it had).
    /// Delivered compact when both ends opt in, full otherwise.
    Requested,
    /// The peer failed compact reconstruction and asked for the missing
    /// transactions. Delivered as a full block of reduced size.
    MissingTransactions,
}

/// A block send waiting in a node's upload queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutboundBlock {
    pub to: NodeIndex,
    pub block: BlockId,
    pub kind: BlockSendKind,
}

/// A send held back by an adversarial node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelayedSend {
    /// Re-enters the sender's upload queue when released.
    Block(OutboundBlock),
    /// Relayed immediately when released.
    Transaction { to: NodeIndex, tx: TxId },
}

impl DelayedSend {
    /// Destination of the held-back send.
    pub fn to(&self) -> NodeIndex {
        match self {
            DelayedSend::Block(outbound) => outbound.to,
            DelayedSend::Transaction { to, .. } => *to,
        }
    }
}

/// Every kind of event the simulation schedules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// "I have block X" advertisement.
    Inventory {
        from: NodeIndex,
        to: NodeIndex,
        block: BlockId,
    },

    /// Pull request sent back to an advertiser.
    BlockRequest {
        from: NodeIndex,
        to: NodeIndex,
        block: BlockId,
    },

    /// Full block body, pushed or in answer to a request.
    DirectBlock {
        from: NodeIndex,
        to: NodeIndex,
        block: BlockId,
    },

    /// Compact block to be reconstructed from the receiver's mempool.
    CompactBlock {
        from: NodeIndex,
        to: NodeIndex,
        block: BlockId,
    },

    /// Receiver failed compact reconstruction and asks for the remainder.
    MissingTransactionsRequest {
        from: NodeIndex,
        to: NodeIndex,
        block: BlockId,
    },

    /// Remainder of a block after failed compact reconstruction.
    FullBlock {
        from: NodeIndex,
        to: NodeIndex,
        block: BlockId,
    },

    /// Transaction relay. `from` is `None` for externally injected
    /// transactions.
    TransactionRelay {
        from: Option<NodeIndex>,
        to: NodeIndex,
        tx: TxId,
    },

    /// A minter found a block on `parent`.
    MiningComplete {
        minter: NodeIndex,
        parent: BlockId,
        difficulty: Difficulty,
    },

    /// A download from an adversarial advertiser took too long.
    Timeout { node: NodeIndex, block: BlockId },

    /// An adversarial node releases a held-back send.
    AdversarialDelay { node: NodeIndex, send: DelayedSend },
}

impl TaskKind {
    pub fn class(&self) -> TaskClass {
        match self {
            TaskKind::Inventory { .. }
            | TaskKind::BlockRequest { .. }
            | TaskKind::DirectBlock { .. }
            | TaskKind::CompactBlock { .. }
            | TaskKind::MissingTransactionsRequest { .. }
            | TaskKind::FullBlock { .. }
            | TaskKind::TransactionRelay { .. } => TaskClass::Message,
            TaskKind::MiningComplete { .. } => TaskClass::Mining,
            TaskKind::Timeout { .. } => TaskClass::Timer,
            TaskKind::AdversarialDelay { .. } => TaskClass::Adversarial,
        }
    }

    /// Node whose handler runs when the task fires.
    pub fn target(&self) -> NodeIndex {
        match *self {
            TaskKind::Inventory { to, .. }
            | TaskKind::BlockRequest { to, .. }
            | TaskKind::DirectBlock { to, .. }
            | TaskKind::CompactBlock { to, .. }
            | TaskKind::MissingTransactionsRequest { to, .. }
            | TaskKind::FullBlock { to, .. }
            | TaskKind::TransactionRelay { to, .. } => to,
            TaskKind::MiningComplete { minter, .. } => minter,
            TaskKind::Timeout { node, .. } | TaskKind::AdversarialDelay { node, .. } => node,
        }
    }

    /// Sender whose upload slot a block delivery occupied.
    ///
    /// `None` for every task that does not carry a block body.
    pub fn uploader(&self) -> Option<NodeIndex> {
        match *self {
            TaskKind::DirectBlock { from, .. }
            | TaskKind::CompactBlock { from, .. }
            | TaskKind::FullBlock { from, .. } => Some(from),
            _ => None,
        }
    }

    pub fn is_block_delivery(&self) -> bool {
        self.uploader().is_some()
    }

    /// Short name for logs and per-kind counters.
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Inventory { .. } => "Inventory",
            TaskKind::BlockRequest { .. } => "BlockRequest",
            TaskKind::DirectBlock { .. } => "DirectBlock",
            TaskKind::CompactBlock { .. } => "CompactBlock",
            TaskKind::MissingTransactionsRequest { .. } => "MissingTransactionsRequest",
            TaskKind::FullBlock { .. } => "FullBlock",
            TaskKind::TransactionRelay { .. } => "TransactionRelay",
            TaskKind::MiningComplete { .. } => "MiningComplete",
            TaskKind::Timeout { .. } => "Timeout",
            TaskKind::AdversarialDelay { .. } => "AdversarialDelay",
        }
    }
}

/// A schedulable task: what happens, and how long after scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub kind: TaskKind,
    /// Delay between scheduling and execution.
    pub interval: Duration,
}

impl Task {
    pub fn new(kind: TaskKind, interval: Duration) -> Self {
        Self { kind, interval }
    }
}

/// One-hop delivery time of a message.
///
/// `latency + payload / bandwidth + processing`, with bandwidth in bytes per
/// millisecond. Bandwidth is validated non-zero when the link model is built.
pub fn delivery_interval(
    latency: Duration,
    bandwidth_bytes_per_ms: u64,
    payload_bytes: u64,
    processing: Duration,
) -> Duration {
    debug_assert!(bandwidth_bytes_per_ms > 0, "zero bandwidth link");
    let transfer_ms = payload_bytes / bandwidth_bytes_per_ms.max(1);
    latency + Duration::from_millis(transfer_ms) + processing
}
