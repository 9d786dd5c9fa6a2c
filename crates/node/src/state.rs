//! Node state machine.

use crate::adversary::{AdversarialState, Routing};
use crate::{NodeContext, PropagationProtocol, ReconstructionModel, SendConcurrency, SendQueue};
use blocksim_core::{BlockSendKind, DelayedSend, OutboundBlock, Task, TaskKey, TaskKind};
use blocksim_types::{BlockArena, BlockId, NodeIndex, Region, TxId};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// How a node relates to a given block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRelation {
    Unknown,
    Downloading,
    Orphan,
    CurrentBest,
    AncestorOfBest,
}

/// A simulated peer.
///
/// Holds one node's chain view, mempool and protocol state. Handlers are
/// driven by the runner, one task at a time, and never touch another node's
/// state: everything they affect elsewhere goes through a scheduled task.
pub struct Node {
    index: NodeIndex,
    region: Region,
    mining_power: u64,
    churn: bool,

    /// Tip of the chain this node mines on.
    best: Option<BlockId>,

    /// Known blocks not on the best chain.
    orphans: HashSet<BlockId>,

    /// Blocks requested and not yet received.
    downloading: HashSet<BlockId>,

    /// Unconfirmed transactions, lowest id first.
    mempool: BTreeSet<TxId>,

    /// Every transaction ever seen, whether relayed or included in a block.
    known_transactions: HashSet<TxId>,

    /// Pending minting task on `best`, if admitted.
    mining_task: Option<TaskKey>,

    /// Peers that advertised an in-flight download, asked in order if the
    /// current request times out.
    fallback_advertisers: HashMap<BlockId, VecDeque<NodeIndex>>,

    protocol: PropagationProtocol,
    send_queue: SendQueue,
    adversary: Option<AdversarialState>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("index", &self.index)
            .field("protocol", &self.protocol.kind())
            .field("best", &self.best)
            .field("orphans", &self.orphans.len())
            .field("mempool", &self.mempool.len())
            .field("adversarial", &self.is_adversarial())
            .finish()
    }
}

impl Node {
    pub fn new(
        index: NodeIndex,
        region: Region,
        mining_power: u64,
        churn: bool,
        protocol: PropagationProtocol,
    ) -> Self {
        Self {
            index,
            region,
            mining_power,
            churn,
            best: None,
            orphans: HashSet::new(),
            downloading: HashSet::new(),
            mempool: BTreeSet::new(),
            known_transactions: HashSet::new(),
            mining_task: None,
            fallback_advertisers: HashMap::new(),
            protocol,
            send_queue: SendQueue::new(),
            adversary: None,
        }
    }

    // ─── Accessors ───

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn mining_power(&self) -> u64 {
        self.mining_power
    }

    pub fn is_churn(&self) -> bool {
        self.churn
    }

    pub fn best(&self) -> Option<BlockId> {
        self.best
    }

    pub fn orphans(&self) -> &HashSet<BlockId> {
        &self.orphans
    }

    pub fn is_downloading(&self, block: BlockId) -> bool {
        self.downloading.contains(&block)
    }

    pub fn mempool(&self) -> &BTreeSet<TxId> {
        &self.mempool
    }

    pub fn knows_transaction(&self, tx: TxId) -> bool {
        self.known_transactions.contains(&tx)
    }

    pub fn mining_task(&self) -> Option<TaskKey> {
        self.mining_task
    }

    pub fn protocol(&self) -> &PropagationProtocol {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut PropagationProtocol {
        &mut self.protocol
    }

    pub fn send_queue(&self) -> &SendQueue {
        &self.send_queue
    }

    pub fn adversary(&self) -> Option<&AdversarialState> {
        self.adversary.as_ref()
    }

    pub fn is_adversarial(&self) -> bool {
        self.adversary.is_some()
    }

    pub fn set_adversary(&mut self, adversary: Option<AdversarialState>) {
        self.adversary = adversary;
    }

    /// Classify `block` from this node's point of view.
    pub fn relation(&self, blocks: &BlockArena, block: BlockId) -> BlockRelation {
        if let Some(best) = self.best {
            if best == block {
                return BlockRelation::CurrentBest;
            }
            if blocks.try_get(block).is_some()
                && blocks.height(block) < blocks.height(best)
                && blocks.ancestor_at(best, blocks.height(block)) == Some(block)
            {
                return BlockRelation::AncestorOfBest;
            }
        }
        if self.orphans.contains(&block) {
            BlockRelation::Orphan
        } else if self.downloading.contains(&block) {
            BlockRelation::Downloading
        } else {
            BlockRelation::Unknown
        }
    }

    // ─── Dispatch ───

    /// Run a message, timeout or delayed-send task addressed to this node.
    ///
    /// Minting completions create blocks and are run by the simulation
    /// runner, which owns the block arena.
    pub fn handle_message(&mut self, ctx: &mut NodeContext<'_>, kind: &TaskKind) {
        trace!(node = self.index, task = kind.name(), "Handling task");
        match *kind {
            TaskKind::Inventory { from, block, .. } => self.handle_inventory(ctx, from, block),
            TaskKind::BlockRequest { from, block, .. } => self.handle_block_request(ctx, from, block),
            TaskKind::DirectBlock { block, .. } | TaskKind::FullBlock { block, .. } => {
                self.handle_block_delivery(ctx, block)
            }
            TaskKind::CompactBlock { from, block, .. } => self.handle_compact_block(ctx, from, block),
            TaskKind::MissingTransactionsRequest { from, block, .. } => {
                self.handle_missing_transactions_request(ctx, from, block)
            }
            TaskKind::TransactionRelay { from, tx, .. } => self.handle_transaction(ctx, from, tx),
            TaskKind::Timeout { block, .. } => self.handle_timeout(ctx, block),
            TaskKind::AdversarialDelay { send, .. } => self.release_delayed(ctx, send),
            TaskKind::MiningComplete { .. } => {
                unreachable!("minting completions are run by the simulation runner")
            }
        }
    }

    // ─── Chain Selection ───

    /// Start from the genesis block without propagating or observing it.
    pub fn install_genesis(&mut self, ctx: &mut NodeContext<'_>, genesis: BlockId) {
        debug_assert!(ctx.blocks.get(genesis).is_genesis());
        self.best = Some(genesis);
        self.mint(ctx);
    }

    /// Process a block this node now holds in full.
    ///
    /// A better block is adopted and propagated. A worse block on another
    /// chain is recorded as an orphan.
    pub fn receive_block(&mut self, ctx: &mut NodeContext<'_>, block: BlockId) {
        let candidate = ctx.blocks.get(block);
        let current = self.best.map(|best| ctx.blocks.get(best));

        if ctx.chain.is_better_than(candidate, current) {
            if let Some(previous) = self.best {
                if !ctx.blocks.is_on_same_chain(previous, block) {
                    ctx.counters.reorgs += 1;
                    debug!(node = self.index, from = %previous, to = %block, "Switching chain");
                    self.reconcile(ctx.blocks, previous, Some(block));
                }
            }
            self.adopt(ctx, block);
        } else if !self.orphans.contains(&block)
            && !self
                .best
                .is_some_and(|best| ctx.blocks.is_on_same_chain(best, block))
        {
            self.reconcile(ctx.blocks, block, self.best);
            self.observe(ctx, block);
        }
    }

    /// Mark blocks on `candidate`'s chain that are not on `accepted`'s chain
    /// as orphans, and clear the orphan mark along `accepted`'s chain.
    ///
    /// Walks both tips back to their common ancestor, always stepping the
    /// taller one, so it ends at the fork point.
    fn reconcile(&mut self, blocks: &BlockArena, candidate: BlockId, accepted: Option<BlockId>) {
        let mut orphan = Some(candidate);
        let mut valid = accepted;

        while let Some(o) = orphan {
            if Some(o) == valid {
                break;
            }
            self.orphans.insert(o);
            if let Some(v) = valid {
                self.orphans.remove(&v);
            }

            match valid {
                None => orphan = blocks.parent(o),
                Some(v) if blocks.height(o) > blocks.height(v) => orphan = blocks.parent(o),
                Some(v) if blocks.height(o) == blocks.height(v) => {
                    orphan = blocks.parent(o);
                    valid = blocks.parent(v);
                }
                Some(v) => valid = blocks.parent(v),
            }
        }
    }

    fn adopt(&mut self, ctx: &mut NodeContext<'_>, block: BlockId) {
        if let Some(task) = self.mining_task.take() {
            if ctx.scheduler.cancel(task) {
                ctx.counters.mining_cancelled += 1;
            }
        }
        self.best = Some(block);
        self.orphans.remove(&block);
        self.observe(ctx, block);

        let adopted = ctx.blocks.get(block);
        debug!(
            node = self.index,
            block = %block,
            height = adopted.height,
            "Adopted block"
        );

        self.mint(ctx);

        for tx in &adopted.transactions {
            self.mempool.remove(tx);
            self.known_transactions.insert(*tx);
        }

        self.propagate(ctx, block);
    }

    fn observe(&self, ctx: &mut NodeContext<'_>, block: BlockId) {
        let observed = ctx.blocks.get(block);
        if observed.is_genesis() || observed.minter == self.index {
            return;
        }
        if ctx.observations.record(block, self.index, ctx.now()) {
            trace!(node = self.index, block = %block, at = ?ctx.now(), "First observation");
        }
    }

    // ─── Minting ───

    /// Draw a minting task on the current best block.
    ///
    /// Candidates the scheduler's admission filter rejects are discarded.
    fn mint(&mut self, ctx: &mut NodeContext<'_>) {
        self.mining_task = None;
        let Some(parent) = self.best else {
            return;
        };
        let Some(task) =
            ctx.chain
                .next_mining_task(self.index, self.mining_power, ctx.blocks.get(parent), ctx.rng)
        else {
            return;
        };

        let height = ctx.blocks.height(parent);
        if ctx.scheduler.admit_mining_task(parent, height, task.interval) {
            self.mining_task = Some(ctx.scheduler.schedule_cancelable(task));
        } else {
            ctx.counters.mining_filtered += 1;
            debug!(node = self.index, parent = %parent, "Minting task filtered");
        }
    }

    /// Forget the minting task that just fired.
    pub fn complete_mining(&mut self, key: TaskKey) {
        if self.mining_task == Some(key) {
            self.mining_task = None;
        }
    }

    /// Up to `max` mempool transactions to include in a new block, lowest
    /// id first.
    pub fn select_block_transactions(&self, max: usize) -> Vec<TxId> {
        self.mempool.iter().take(max).copied().collect()
    }

    // ─── Propagation ───

    fn propagate(&mut self, ctx: &mut NodeContext<'_>, block: BlockId) {
        let neighbors = ctx.topology.neighbors(self.index).to_vec();
        let adversarial = self.is_adversarial();
        let fanout = self
            .protocol
            .strategy_mut()
            .fanout(&neighbors, adversarial, ctx.peers, ctx.rng);

        for to in fanout.direct {
            self.route_block_send(
                ctx,
                OutboundBlock {
                    to,
                    block,
                    kind: BlockSendKind::Requested,
                },
            );
        }
        for to in fanout.inventory {
            let interval = ctx.message_interval(self.index, to, 0, 1);
            ctx.schedule(Task::new(
                TaskKind::Inventory {
                    from: self.index,
                    to,
                    block,
                },
                interval,
            ));
        }
    }

    fn handle_inventory(&mut self, ctx: &mut NodeContext<'_>, from: NodeIndex, block: BlockId) {
        if self.orphans.contains(&block) {
            return;
        }
        if self.downloading.contains(&block) {
            if let Some(advertisers) = self.fallback_advertisers.get_mut(&block) {
                advertisers.push_back(from);
            }
            return;
        }

        let advertised = ctx.blocks.get(block);
        let current = self.best.map(|best| ctx.blocks.get(best));
        let wanted = ctx.chain.is_better_than(advertised, current)
            || !self
                .best
                .is_some_and(|best| ctx.blocks.is_on_same_chain(best, block));
        if !wanted {
            return;
        }

        self.downloading.insert(block);
        self.fallback_advertisers.insert(block, VecDeque::new());
        self.request_block(ctx, from, block);
    }

    /// Ask `from` for `block`, arming a timeout if `from` may stall.
    fn request_block(&mut self, ctx: &mut NodeContext<'_>, from: NodeIndex, block: BlockId) {
        let interval = ctx.message_interval(self.index, from, 0, 1);
        ctx.schedule(Task::new(
            TaskKind::BlockRequest {
                from: self.index,
                to: from,
                block,
            },
            interval,
        ));

        if ctx.peers.is_adversarial(from) {
            let timeout = ctx.config.inventory_timeout();
            ctx.schedule(Task::new(
                TaskKind::Timeout {
                    node: self.index,
                    block,
                },
                timeout,
            ));
        }
    }

    fn handle_timeout(&mut self, ctx: &mut NodeContext<'_>, block: BlockId) {
        if !self.downloading.contains(&block) {
            self.fallback_advertisers.remove(&block);
            return;
        }

        let next = self
            .fallback_advertisers
            .get_mut(&block)
            .and_then(VecDeque::pop_front);
        match next {
            Some(advertiser) => {
                ctx.counters.timeout_retries += 1;
                debug!(node = self.index, block = %block, advertiser, "Download timed out, retrying");
                self.request_block(ctx, advertiser, block);
            }
            None => {
                debug!(node = self.index, block = %block, "Download timed out, giving up");
                self.downloading.remove(&block);
                self.fallback_advertisers.remove(&block);
            }
        }
    }

    fn handle_block_delivery(&mut self, ctx: &mut NodeContext<'_>, block: BlockId) {
        self.finish_download(block);
        self.receive_block(ctx, block);
    }

    fn finish_download(&mut self, block: BlockId) {
        self.downloading.remove(&block);
        self.fallback_advertisers.remove(&block);
    }

    fn handle_block_request(&mut self, ctx: &mut NodeContext<'_>, from: NodeIndex, block: BlockId) {
        self.route_block_send(
            ctx,
            OutboundBlock {
                to: from,
                block,
                kind: BlockSendKind::Requested,
            },
        );
    }

    // ─── Compact Blocks ───

    fn handle_compact_block(&mut self, ctx: &mut NodeContext<'_>, from: NodeIndex, block: BlockId) {
        let compact = ctx.blocks.get(block);
        let current = self.best.map(|best| ctx.blocks.get(best));
        if !ctx.chain.is_better_than(compact, current) {
            // Nothing to reconstruct, but a block off the best chain is
            // still an orphan this node has now seen.
            self.finish_download(block);
            self.receive_block(ctx, block);
            return;
        }

        let model = self.protocol.strategy().reconstruction(ctx.config.reconstruction);
        let reconstructed = match model {
            ReconstructionModel::Transactions => compact
                .transactions
                .iter()
                .all(|tx| self.mempool.contains(tx) || self.known_transactions.contains(tx)),
            ReconstructionModel::Probabilistic => {
                ctx.rng.gen::<f64>() >= ctx.config.compact_failure_rate(self.churn)
            }
        };

        if reconstructed {
            self.finish_download(block);
            self.receive_block(ctx, block);
        } else {
            ctx.counters.compact_failures += 1;
            trace!(node = self.index, block = %block, "Compact reconstruction failed");
            let interval = ctx.message_interval(self.index, from, 0, 1);
            ctx.schedule(Task::new(
                TaskKind::MissingTransactionsRequest {
                    from: self.index,
                    to: from,
                    block,
                },
                interval,
            ));
        }
    }

    fn handle_missing_transactions_request(
        &mut self,
        ctx: &mut NodeContext<'_>,
        from: NodeIndex,
        block: BlockId,
    ) {
        self.enqueue_block_send(
            ctx,
            OutboundBlock {
                to: from,
                block,
                kind: BlockSendKind::MissingTransactions,
            },
        );
    }

    /// Size of the block remainder sent after a failed reconstruction.
    fn failed_block_size(&self, ctx: &mut NodeContext<'_>) -> u64 {
        let fraction = ctx
            .config
            .failed_size_distribution(self.churn)
            .choose(ctx.rng)
            .copied()
            .unwrap_or(1.0);
        (ctx.config.block_size as f64 * fraction) as u64
    }

    // ─── Upload Slot ───

    /// Send a block body, unless an adversarial link holds it back.
    fn route_block_send(&mut self, ctx: &mut NodeContext<'_>, outbound: OutboundBlock) {
        match self.routing(outbound.to) {
            Routing::Immediate => self.enqueue_block_send(ctx, outbound),
            Routing::Delayed(delay) => {
                ctx.counters.sends_delayed += 1;
                ctx.schedule(Task::new(
                    TaskKind::AdversarialDelay {
                        node: self.index,
                        send: DelayedSend::Block(outbound),
                    },
                    delay,
                ));
            }
            Routing::Dropped => {
                ctx.counters.sends_dropped += 1;
                trace!(node = self.index, to = outbound.to, block = %outbound.block, "Dropped block send");
            }
        }
    }

    fn routing(&self, to: NodeIndex) -> Routing {
        self.adversary
            .as_ref()
            .map_or(Routing::Immediate, |adversary| adversary.route(to))
    }

    fn enqueue_block_send(&mut self, ctx: &mut NodeContext<'_>, outbound: OutboundBlock) {
        match self.protocol.strategy().concurrency() {
            SendConcurrency::Serial => {
                if let Some(next) = self.send_queue.push(outbound) {
                    self.start_upload(ctx, next, 1);
                }
            }
            SendConcurrency::Shared => {
                let share = self.send_queue.start_shared();
                self.start_upload(ctx, outbound, share);
            }
        }
    }

    /// Start the next queued upload, if any.
    pub fn drain_send_queue(&mut self, ctx: &mut NodeContext<'_>) {
        if let Some(next) = self.send_queue.next() {
            self.start_upload(ctx, next, 1);
        }
    }

    /// One of this node's block uploads reached its receiver.
    pub fn on_transmission_complete(&mut self, ctx: &mut NodeContext<'_>) {
        match self.protocol.strategy().concurrency() {
            SendConcurrency::Serial => self.drain_send_queue(ctx),
            SendConcurrency::Shared => self.send_queue.finish_shared(),
        }
    }

    fn start_upload(&mut self, ctx: &mut NodeContext<'_>, outbound: OutboundBlock, share: u32) {
        let OutboundBlock { to, block, kind } = outbound;
        let from = self.index;
        let (task, payload) = match kind {
            BlockSendKind::Requested => {
                let compact = self
                    .protocol
                    .strategy()
                    .sends_compact_to(ctx.peers.uses_compact_relay(to));
                if compact {
                    (
                        TaskKind::CompactBlock { from, to, block },
                        ctx.config.compact_block_size,
                    )
                } else {
                    (TaskKind::DirectBlock { from, to, block }, ctx.config.block_size)
                }
            }
            BlockSendKind::MissingTransactions => (
                TaskKind::FullBlock { from, to, block },
                self.failed_block_size(ctx),
            ),
        };
        let interval = ctx.message_interval(from, to, payload, share);
        ctx.schedule(Task::new(task, interval));
    }

    // ─── Transactions ───

    /// Learn a transaction and relay it if it is new.
    pub fn handle_transaction(&mut self, ctx: &mut NodeContext<'_>, from: Option<NodeIndex>, tx: TxId) {
        if !self.known_transactions.insert(tx) {
            return;
        }
        if self.mempool.len() < ctx.config.mempool_capacity {
            self.mempool.insert(tx);
        }

        let neighbors = ctx.topology.neighbors(self.index).to_vec();
        for to in neighbors.into_iter().filter(|&n| Some(n) != from) {
            match self.routing(to) {
                Routing::Immediate => self.send_transaction(ctx, to, tx),
                Routing::Delayed(delay) => {
                    ctx.counters.sends_delayed += 1;
                    ctx.schedule(Task::new(
                        TaskKind::AdversarialDelay {
                            node: self.index,
                            send: DelayedSend::Transaction { to, tx },
                        },
                        delay,
                    ));
                }
                Routing::Dropped => ctx.counters.sends_dropped += 1,
            }
        }
    }

    fn send_transaction(&self, ctx: &mut NodeContext<'_>, to: NodeIndex, tx: TxId) {
        let interval = ctx.message_interval(self.index, to, ctx.config.transaction_size, 1);
        ctx.schedule(Task::new(
            TaskKind::TransactionRelay {
                from: Some(self.index),
                to,
                tx,
            },
            interval,
        ));
    }

    /// An adversarially held-back send is due.
    fn release_delayed(&mut self, ctx: &mut NodeContext<'_>, send: DelayedSend) {
        match send {
            DelayedSend::Block(outbound) => self.enqueue_block_send(ctx, outbound),
            DelayedSend::Transaction { to, tx } => self.send_transaction(ctx, to, tx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AdversarialDelay, PeerDirectory, PeerInfo, ProtocolKind, RelayConfig, RelayCounters,
    };
    use blocksim_core::{ObservationLedger, ProofOfWork, Scheduler, Topology};
    use blocksim_network_memory::{RegionTable, StaticTopology};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::time::Duration;
    use tracing_test::traced_test;

    const WORK: u128 = 100;

    /// Shared state for driving nodes by hand.
    struct Harness {
        scheduler: Scheduler,
        blocks: BlockArena,
        topology: StaticTopology,
        links: RegionTable,
        chain: ProofOfWork,
        peers: PeerDirectory,
        config: RelayConfig,
        rng: ChaCha8Rng,
        observations: ObservationLedger,
        counters: RelayCounters,
        nodes: Vec<Node>,
    }

    impl Harness {
        fn new(topology: StaticTopology, kind: ProtocolKind, config: RelayConfig) -> Self {
            let mut rng = ChaCha8Rng::seed_from_u64(9);
            let nodes: Vec<Node> = (0..topology.node_count() as NodeIndex)
                .map(|i| {
                    let protocol = PropagationProtocol::new(kind, &config, &mut rng);
                    Node::new(i, topology.region(i), 0, false, protocol)
                })
                .collect();
            let peers = PeerDirectory::new(
                nodes
                    .iter()
                    .map(|n| PeerInfo {
                        uses_compact_relay: n.protocol().uses_compact_relay(),
                        ..PeerInfo::default()
                    })
                    .collect(),
            );
            let mut blocks = BlockArena::new();
            blocks.genesis(0, WORK);
            let links = RegionTable::uniform(1, Duration::from_millis(10), 1_000).unwrap();
            Self {
                scheduler: Scheduler::default(),
                blocks,
                topology,
                links,
                chain: ProofOfWork::new(Duration::from_secs(600)),
                peers,
                config,
                rng,
                observations: ObservationLedger::new(),
                counters: RelayCounters::default(),
                nodes,
            }
        }

        fn mesh(n: usize, kind: ProtocolKind) -> Self {
            Self::new(
                StaticTopology::full_mesh(vec![Region(0); n]),
                kind,
                RelayConfig::default(),
            )
        }

        /// Run `f` against node `i` with a freshly assembled context.
        fn with_node<R>(&mut self, i: NodeIndex, f: impl FnOnce(&mut Node, &mut NodeContext<'_>) -> R) -> R {
            let mut ctx = NodeContext {
                scheduler: &mut self.scheduler,
                blocks: &self.blocks,
                topology: &self.topology,
                links: &self.links,
                chain: &self.chain,
                peers: &self.peers,
                config: &self.config,
                rng: &mut self.rng,
                observations: &mut self.observations,
                counters: &mut self.counters,
            };
            f(&mut self.nodes[i as usize], &mut ctx)
        }

        fn install_genesis(&mut self) {
            for i in 0..self.nodes.len() as NodeIndex {
                self.with_node(i, |node, ctx| node.install_genesis(ctx, BlockId::GENESIS));
            }
        }

        fn mint(&mut self, parent: BlockId, minter: NodeIndex, txs: Vec<TxId>) -> BlockId {
            self.blocks.mint(parent, minter, Duration::ZERO, WORK, txs)
        }

        /// Pop and run one task the way the simulation runner does.
        fn step(&mut self) -> Option<TaskKind> {
            let (_, task) = self.scheduler.advance()?;
            if let Some(sender) = task.kind.uploader() {
                self.with_node(sender, |node, ctx| node.on_transmission_complete(ctx));
            }
            let kind = task.kind.clone();
            self.with_node(task.kind.target(), |node, ctx| node.handle_message(ctx, &task.kind));
            Some(kind)
        }

        fn run(&mut self) -> Vec<TaskKind> {
            std::iter::from_fn(|| self.step()).collect()
        }
    }

    #[test]
    fn test_reconcile_orphans_exactly_the_abandoned_branch() {
        let mut h = Harness::mesh(1, ProtocolKind::Push);
        h.install_genesis();
        let a1 = h.mint(BlockId::GENESIS, 0, vec![]);
        let a2 = h.mint(a1, 0, vec![]);
        let a3 = h.mint(a2, 0, vec![]);
        let b2 = h.mint(a1, 0, vec![]);
        let b3 = h.mint(b2, 0, vec![]);
        let b4 = h.mint(b3, 0, vec![]);

        h.with_node(0, |node, ctx| {
            node.receive_block(ctx, a3);
            node.receive_block(ctx, b2);
        });
        assert_eq!(h.nodes[0].best(), Some(a3));
        assert_eq!(h.nodes[0].orphans(), &HashSet::from([b2]));

        h.with_node(0, |node, ctx| node.receive_block(ctx, b4));
        let node = &h.nodes[0];
        assert_eq!(node.best(), Some(b4));
        assert_eq!(node.orphans(), &HashSet::from([a2, a3]));
        assert_eq!(node.relation(&h.blocks, b3), BlockRelation::AncestorOfBest);
        assert_eq!(node.relation(&h.blocks, a3), BlockRelation::Orphan);
        assert_eq!(node.relation(&h.blocks, b4), BlockRelation::CurrentBest);
        assert_eq!(h.counters.reorgs, 1);
    }

    #[test]
    fn test_best_total_difficulty_never_decreases() {
        let mut h = Harness::mesh(1, ProtocolKind::Push);
        h.install_genesis();
        let mut rng = ChaCha8Rng::seed_from_u64(77);
        let mut tips = vec![BlockId::GENESIS];
        for _ in 0..60 {
            let parent = tips[rng.gen_range(0..tips.len())];
            let minter = rng.gen_range(1..5);
            tips.push(h.mint(parent, minter, vec![]));
        }

        let mut order = tips.clone();
        order.shuffle(&mut rng);
        let mut last = 0;
        for block in order {
            h.with_node(0, |node, ctx| node.receive_block(ctx, block));
            let best = h.nodes[0].best().unwrap();
            let total = h.blocks.get(best).total_difficulty;
            assert!(total >= last);
            last = total;
            assert!(!h.nodes[0].orphans().contains(&best));
        }
    }

    #[test]
    fn test_first_observation_once_per_node() {
        let mut h = Harness::mesh(2, ProtocolKind::Push);
        h.install_genesis();
        let b1 = h.mint(BlockId::GENESIS, 1, vec![]);
        h.with_node(0, |node, ctx| {
            node.receive_block(ctx, b1);
            node.receive_block(ctx, b1);
        });
        assert_eq!(h.observations.len(), 1);

        // The minter never observes its own block.
        h.with_node(1, |node, ctx| node.receive_block(ctx, b1));
        assert_eq!(h.observations.len(), 1);
    }

    #[test]
    fn test_orphan_observed_without_adoption() {
        let mut h = Harness::mesh(1, ProtocolKind::Push);
        h.install_genesis();
        let a1 = h.mint(BlockId::GENESIS, 1, vec![]);
        let b1 = h.mint(BlockId::GENESIS, 2, vec![]);
        h.with_node(0, |node, ctx| {
            node.receive_block(ctx, a1);
            node.receive_block(ctx, b1);
        });
        assert_eq!(h.nodes[0].best(), Some(a1));
        assert!(h.observations.contains(b1, 0));
        assert_eq!(h.nodes[0].relation(&h.blocks, b1), BlockRelation::Orphan);
    }

    #[traced_test]
    #[test]
    fn test_push_serializes_uploads() {
        let mut h = Harness::mesh(4, ProtocolKind::Push);
        h.install_genesis();
        let b1 = h.mint(BlockId::GENESIS, 0, vec![]);
        h.with_node(0, |node, ctx| node.receive_block(ctx, b1));

        // One upload in flight, two queued.
        assert_eq!(h.scheduler.len(), 1);
        assert_eq!(h.nodes[0].send_queue().pending(), 2);

        let executed = h.run();
        let from_minter = executed
            .iter()
            .filter(|k| matches!(k, TaskKind::DirectBlock { from: 0, .. }))
            .count();
        assert_eq!(from_minter, 3);
        for node in &h.nodes {
            assert_eq!(node.best(), Some(b1));
        }
        // Receivers push on to peers that already hold the block; those
        // deliveries are no-ops for the observation ledger.
        assert_eq!(h.observations.len(), 3);
        assert!(logs_contain("Adopted block"));
    }

    #[test]
    fn test_advertisement_requests_once_and_queues_fallbacks() {
        // 0 and 1 both advertise to 2.
        let topology =
            StaticTopology::from_edges(vec![Region(0); 3], &[(0, 2), (1, 2), (0, 1)]).unwrap();
        let mut h = Harness::new(topology, ProtocolKind::Advertisement, RelayConfig::default());
        h.install_genesis();
        let b1 = h.mint(BlockId::GENESIS, 0, vec![]);

        h.with_node(2, |node, ctx| {
            node.handle_inventory(ctx, 0, b1);
            node.handle_inventory(ctx, 1, b1);
        });
        assert!(h.nodes[2].is_downloading(b1));
        assert_eq!(h.scheduler.len(), 1, "second advertisement sends no request");
        assert_eq!(
            h.nodes[2].fallback_advertisers.get(&b1),
            Some(&VecDeque::from([1]))
        );
        assert_eq!(h.nodes[2].relation(&h.blocks, b1), BlockRelation::Downloading);
    }

    #[test]
    fn test_inventory_for_known_blocks_is_ignored() {
        let mut h = Harness::mesh(2, ProtocolKind::Advertisement);
        h.install_genesis();
        let b1 = h.mint(BlockId::GENESIS, 1, vec![]);
        h.with_node(0, |node, ctx| node.receive_block(ctx, b1));
        h.scheduler.reset();

        h.with_node(0, |node, ctx| {
            node.handle_inventory(ctx, 1, b1);
            node.handle_inventory(ctx, 1, BlockId::GENESIS);
        });
        assert!(h.scheduler.is_empty());
    }

    #[test]
    fn test_timeout_falls_back_to_next_advertiser() {
        let topology =
            StaticTopology::from_edges(vec![Region(0); 3], &[(0, 2), (1, 2)]).unwrap();
        let mut h = Harness::new(topology, ProtocolKind::Advertisement, RelayConfig::default());
        h.peers = PeerDirectory::new(vec![
            PeerInfo {
                adversarial: true,
                ..PeerInfo::default()
            },
            PeerInfo::default(),
            PeerInfo::default(),
        ]);
        h.install_genesis();
        let b1 = h.mint(BlockId::GENESIS, 0, vec![]);

        h.with_node(2, |node, ctx| {
            node.handle_inventory(ctx, 0, b1);
            node.handle_inventory(ctx, 1, b1);
        });
        // Request to the adversary plus its timeout.
        assert_eq!(h.scheduler.len(), 2);

        h.with_node(2, |node, ctx| node.handle_timeout(ctx, b1));
        assert_eq!(h.counters.timeout_retries, 1);
        assert!(h.nodes[2].is_downloading(b1));

        // No advertisers left: the next timeout gives up.
        h.with_node(2, |node, ctx| node.handle_timeout(ctx, b1));
        assert!(!h.nodes[2].is_downloading(b1));
        assert_eq!(h.nodes[2].relation(&h.blocks, b1), BlockRelation::Unknown);
    }

    #[test]
    fn test_compact_failure_round_trip() {
        let topology = StaticTopology::from_edges(vec![Region(0); 2], &[(0, 1)]).unwrap();
        let config = RelayConfig::default().with_reconstruction(ReconstructionModel::Transactions);
        let mut h = Harness::new(topology, ProtocolKind::CompactBlockRelay, config);
        h.nodes[0]
            .protocol_mut()
            .as_compact_block_relay_mut()
            .unwrap()
            .register_high_bandwidth_peer(1);
        h.install_genesis();

        let b1 = h.mint(BlockId::GENESIS, 0, vec![TxId(7)]);
        h.with_node(0, |node, ctx| {
            node.handle_transaction(ctx, None, TxId(7));
        });
        h.scheduler.reset();
        h.with_node(0, |node, ctx| node.receive_block(ctx, b1));

        let executed: Vec<&'static str> = h.run().iter().map(TaskKind::name).collect();
        // The receiver has no high-bandwidth peers and only advertises back.
        assert_eq!(
            executed,
            vec!["CompactBlock", "MissingTransactionsRequest", "FullBlock", "Inventory"]
        );
        assert_eq!(h.nodes[1].best(), Some(b1));
        assert_eq!(h.counters.compact_failures, 1);
        assert!(h.nodes[1].knows_transaction(TxId(7)));
        assert!(!h.nodes[1].is_downloading(b1));
    }

    #[test]
    fn test_compact_sibling_recorded_as_orphan() {
        let topology = StaticTopology::from_edges(vec![Region(0); 2], &[(0, 1)]).unwrap();
        let mut h = Harness::new(topology, ProtocolKind::CompactBlockRelay, RelayConfig::default());
        h.nodes[0]
            .protocol_mut()
            .as_compact_block_relay_mut()
            .unwrap()
            .register_high_bandwidth_peer(1);
        h.install_genesis();

        let a1 = h.mint(BlockId::GENESIS, 1, vec![]);
        let b1 = h.mint(BlockId::GENESIS, 0, vec![]);
        h.with_node(1, |node, ctx| node.receive_block(ctx, a1));
        h.scheduler.reset();

        // Equal work: node 1 keeps a1 and files b1 as an orphan.
        h.with_node(0, |node, ctx| node.receive_block(ctx, b1));
        let executed: Vec<&'static str> = h.run().iter().map(TaskKind::name).collect();
        assert_eq!(executed, vec!["CompactBlock"]);

        let node = &h.nodes[1];
        assert_eq!(node.best(), Some(a1));
        assert_eq!(node.relation(&h.blocks, b1), BlockRelation::Orphan);
        assert!(!node.is_downloading(b1));
        assert!(h.observations.contains(b1, 1));
        assert_eq!(h.counters.compact_failures, 0);
    }

    #[test]
    fn test_compact_success_when_transactions_known() {
        let topology = StaticTopology::from_edges(vec![Region(0); 2], &[(0, 1)]).unwrap();
        let config = RelayConfig::default().with_reconstruction(ReconstructionModel::Transactions);
        let mut h = Harness::new(topology, ProtocolKind::CompactBlockRelay, config);
        h.nodes[0]
            .protocol_mut()
            .as_compact_block_relay_mut()
            .unwrap()
            .register_high_bandwidth_peer(1);
        h.install_genesis();
        h.with_node(1, |node, ctx| node.handle_transaction(ctx, None, TxId(3)));
        h.scheduler.reset();

        let b1 = h.mint(BlockId::GENESIS, 0, vec![TxId(3)]);
        h.with_node(0, |node, ctx| node.receive_block(ctx, b1));
        let executed: Vec<&'static str> = h.run().iter().map(TaskKind::name).collect();
        assert_eq!(executed, vec!["CompactBlock", "Inventory"]);
        assert_eq!(h.nodes[1].best(), Some(b1));
        assert!(h.nodes[1].mempool().is_empty());
    }

    #[test]
    fn test_transactions_relayed_once() {
        let mut h = Harness::mesh(3, ProtocolKind::Push);
        h.with_node(0, |node, ctx| node.handle_transaction(ctx, None, TxId(1)));
        assert_eq!(h.scheduler.len(), 2);
        h.run();
        for node in &h.nodes {
            assert!(node.knows_transaction(TxId(1)));
            assert!(node.mempool().contains(&TxId(1)));
        }
        // 2 from the origin, 1 each from the two receivers to each other.
        assert_eq!(h.scheduler.task_count(), 4);
    }

    #[test]
    fn test_mempool_capacity_still_marks_known() {
        let config = RelayConfig {
            mempool_capacity: 1,
            ..RelayConfig::default()
        };
        let mut h = Harness::new(StaticTopology::new(vec![Region(0)]), ProtocolKind::Push, config);
        h.with_node(0, |node, ctx| {
            node.handle_transaction(ctx, None, TxId(1));
            node.handle_transaction(ctx, None, TxId(2));
        });
        assert_eq!(h.nodes[0].mempool().len(), 1);
        assert!(h.nodes[0].knows_transaction(TxId(2)));
    }

    #[test]
    fn test_adversary_delays_and_drops_block_sends() {
        let mut h = Harness::mesh(3, ProtocolKind::Push);
        h.install_genesis();
        h.nodes[0].set_adversary(Some(AdversarialState::new(
            [1].into_iter().collect(),
            AdversarialDelay::Fixed(Duration::from_secs(5)),
        )));
        let b1 = h.mint(BlockId::GENESIS, 0, vec![]);
        h.with_node(0, |node, ctx| node.receive_block(ctx, b1));
        assert_eq!(h.counters.sends_delayed, 1);

        h.run();
        assert_eq!(h.nodes[1].best(), Some(b1));
        assert_eq!(h.nodes[2].best(), Some(b1));

        let mut h = Harness::mesh(2, ProtocolKind::Push);
        h.install_genesis();
        h.nodes[0].set_adversary(Some(AdversarialState::new(
            [1].into_iter().collect(),
            AdversarialDelay::Drop,
        )));
        let b1 = h.mint(BlockId::GENESIS, 0, vec![]);
        h.with_node(0, |node, ctx| node.receive_block(ctx, b1));
        h.run();
        assert_eq!(h.counters.sends_dropped, 1);
        assert_eq!(h.nodes[1].best(), Some(BlockId::GENESIS));
    }

    #[test]
    fn test_parallel_fetch_divides_bandwidth() {
        let mut h = Harness::mesh(3, ProtocolKind::ParallelFetch);
        h.install_genesis();
        let b1 = h.mint(BlockId::GENESIS, 0, vec![]);
        h.nodes[0].best = Some(b1);

        h.with_node(0, |node, ctx| {
            node.handle_block_request(ctx, 1, b1);
            node.handle_block_request(ctx, 2, b1);
        });
        assert_eq!(h.nodes[0].send_queue().in_flight(), 2);

        // 10 ms latency + 1_700_000 B at 1000 B/ms (then 500 B/ms) + 2 ms.
        let (first, _) = h.scheduler.advance().unwrap();
        assert_eq!(first.time, Duration::from_millis(10 + 1_700 + 2));
        let (second, _) = h.scheduler.advance().unwrap();
        assert_eq!(second.time, Duration::from_millis(10 + 3_400 + 2));
    }

    #[test]
    fn test_miner_schedules_cancelable_task_and_cancels_on_adoption() {
        let mut h = Harness::mesh(2, ProtocolKind::Push);
        let protocol = PropagationProtocol::new(ProtocolKind::Push, &h.config, &mut h.rng);
        h.nodes[0] = Node::new(0, Region(0), 10, false, protocol);
        h.install_genesis();
        let first = h.nodes[0].mining_task().unwrap();
        assert!(h.scheduler.is_pending(first));

        let b1 = h.mint(BlockId::GENESIS, 1, vec![]);
        h.with_node(0, |node, ctx| node.receive_block(ctx, b1));
        assert!(!h.scheduler.is_pending(first));
        assert_eq!(h.counters.mining_cancelled, 1);
        assert!(h.nodes[0].mining_task().is_some());
    }
}
