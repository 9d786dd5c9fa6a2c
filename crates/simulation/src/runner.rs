//! Deterministic simulation runner.
//!
//! The runner owns every piece of shared state (scheduler, block arena,
//! observation ledger, RNG) and hands nodes a [`NodeContext`] borrowed from
//! it for the duration of one task. Minting completions are the one task
//! kind it runs itself, because they append to the block arena.

use crate::{MiningAssignment, RunReport, SimulationConfig, SimulationStats};
use blocksim_core::{
    ChainRules, ConfigError, LinkModel, ObservationLedger, ProofOfWork, Scheduler, Task, TaskKey,
    TaskKind, Topology,
};
use blocksim_network_memory::{NetworkConfig, RegionTable, StaticTopology};
use blocksim_node::{
    rank_high_bandwidth_peers, AdversarialState, Node, NodeContext, PeerDirectory, PeerInfo,
    PropagationProtocol, ProtocolKind,
};
use blocksim_types::{BlockArena, BlockId, Difficulty, NodeIndex, Transaction, TxId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Deterministic simulation runner.
///
/// Processes tasks in deterministic order. Given the same configuration,
/// topology and seed, produces identical results every run.
pub struct SimulationRunner {
    /// All nodes in the simulation, indexed by NodeIndex.
    nodes: Vec<Node>,

    /// Future event list and simulated clock.
    scheduler: Scheduler,

    /// Every block minted this run.
    blocks: BlockArena,

    /// Who is connected to whom.
    topology: Arc<dyn Topology>,

    /// Latency and bandwidth between regions.
    links: Arc<dyn LinkModel>,

    chain: ProofOfWork,

    /// Public facts about each node (compact opt-in, adversarial, churn).
    peers: PeerDirectory,

    config: SimulationConfig,

    /// Mining power per node, fixed across resets.
    mining_power: Vec<u64>,

    /// Nodes acting as mining pools.
    pools: Vec<NodeIndex>,

    /// RNG for every random draw of the run (seeded for determinism).
    rng: ChaCha8Rng,

    /// Seed of the current run.
    seed: u64,

    /// First-observation notifications.
    observations: ObservationLedger,

    /// Transactions injected from outside the network.
    transactions: Vec<Transaction>,

    /// Statistics.
    stats: SimulationStats,
}

impl SimulationRunner {
    /// Create a runner over an existing topology and link model.
    ///
    /// Mining power is assigned from `config.mining`. The topology is used
    /// as given, so pools are not interconnected; see
    /// [`generate`](Self::generate).
    pub fn new(
        config: SimulationConfig,
        topology: Arc<dyn Topology>,
        links: Arc<dyn LinkModel>,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let assignment = config
            .mining
            .assign_mining_power(topology.node_count(), &mut mining_rng(seed))?;
        Self::assemble(config, topology, links, assignment, seed)
    }

    /// Create a runner with explicit per-node mining power.
    pub fn with_mining_power(
        config: SimulationConfig,
        topology: Arc<dyn Topology>,
        links: Arc<dyn LinkModel>,
        mining_power: Vec<u64>,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        let assignment = MiningAssignment {
            power: mining_power,
            pools: Vec::new(),
        };
        Self::assemble(config, topology, links, assignment, seed)
    }

    /// Generate a random topology over `links` and build a runner on it.
    ///
    /// The topology and the mining power are drawn from their own streams
    /// of the seed, so they stay the same whatever the run itself consumes.
    /// Interconnected pools get an edge to every other pool.
    pub fn generate(
        config: SimulationConfig,
        network: &NetworkConfig,
        links: RegionTable,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut topology_rng = ChaCha8Rng::seed_from_u64(seed);
        topology_rng.set_stream(1);
        let mut topology = StaticTopology::generate(network, &links, &mut topology_rng)?;

        let assignment = config
            .mining
            .assign_mining_power(topology.node_count(), &mut mining_rng(seed))?;
        if config.mining.interconnects_pools() {
            for (i, &a) in assignment.pools.iter().enumerate() {
                for &b in &assignment.pools[i + 1..] {
                    topology.add_edge(a, b);
                }
            }
            debug!(pools = assignment.pools.len(), "Mining pools interconnected");
        }

        Self::assemble(config, Arc::new(topology), Arc::new(links), assignment, seed)
    }

    fn assemble(
        config: SimulationConfig,
        topology: Arc<dyn Topology>,
        links: Arc<dyn LinkModel>,
        assignment: MiningAssignment,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let MiningAssignment {
            power: mining_power,
            pools,
        } = assignment;
        let node_count = topology.node_count();
        if mining_power.len() != node_count {
            return Err(ConfigError::NodeCountMismatch {
                topology: node_count,
                expected: mining_power.len(),
            });
        }
        for node in 0..node_count {
            if let Some(&neighbor) = topology
                .neighbors(node as NodeIndex)
                .iter()
                .find(|&&n| n as usize >= node_count)
            {
                return Err(ConfigError::NeighborOutOfRange {
                    node,
                    neighbor: neighbor as usize,
                    nodes: node_count,
                });
            }
        }

        let mut runner = Self {
            nodes: Vec::new(),
            scheduler: Scheduler::new(config.mining.admission_ceiling),
            blocks: BlockArena::new(),
            topology,
            links,
            chain: ProofOfWork::new(config.mining.target_interval()),
            peers: PeerDirectory::default(),
            config,
            mining_power,
            pools,
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            observations: ObservationLedger::new(),
            transactions: Vec::new(),
            stats: SimulationStats::default(),
        };
        runner.build_network();
        Ok(runner)
    }

    /// Re-seed and rebuild nodes, queue, arena and ledger for another run.
    ///
    /// The topology and mining power are kept.
    pub fn reset(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.scheduler.reset();
        self.blocks.clear();
        self.observations.clear();
        self.transactions.clear();
        self.stats = SimulationStats::default();
        self.build_network();
        info!(seed, "Simulation reset");
    }

    /// Build nodes, adversaries and compact relay peerings, then install
    /// genesis on every node.
    fn build_network(&mut self) {
        let node_count = self.topology.node_count();
        let protocol = self.config.protocol;

        self.nodes = (0..node_count as NodeIndex)
            .map(|i| {
                let churn = self.rng.gen::<f64>() < self.config.churn_node_rate;
                let relay = PropagationProtocol::new(protocol, &self.config.relay, &mut self.rng);
                Node::new(
                    i,
                    self.topology.region(i),
                    self.mining_power[i as usize],
                    churn,
                    relay,
                )
            })
            .collect();

        let adversarial: Vec<bool> = (0..node_count)
            .map(|_| self.rng.gen::<f64>() < self.config.adversary.node_probability)
            .collect();

        self.peers = PeerDirectory::new(
            self.nodes
                .iter()
                .zip(&adversarial)
                .map(|(node, &adversarial)| PeerInfo {
                    uses_compact_relay: node.protocol().uses_compact_relay(),
                    adversarial,
                    churn: node.is_churn(),
                })
                .collect(),
        );

        for i in (0..node_count).filter(|&i| adversarial[i]) {
            let state = AdversarialState::choose(
                self.topology.neighbors(i as NodeIndex),
                &self.peers,
                self.config.adversary.delayed_link_probability,
                self.config.adversary.delay,
                &mut self.rng,
            );
            debug!(
                node = i,
                delayed_links = state.delayed_links().len(),
                "Adversarial node"
            );
            self.nodes[i].set_adversary(Some(state));
        }

        if protocol == ProtocolKind::CompactBlockRelay {
            self.select_high_bandwidth_peers();
        }

        self.initialize_genesis();
    }

    /// Each node asks its fastest neighbors to push it compact blocks.
    fn select_high_bandwidth_peers(&mut self) {
        for node in 0..self.nodes.len() as NodeIndex {
            let chosen = rank_high_bandwidth_peers(
                node,
                self.topology.as_ref(),
                self.links.as_ref(),
                self.config.relay.compact_block_size,
                self.config.relay.high_bandwidth_peers,
            );
            for peer in chosen {
                if let Some(relay) = self.nodes[peer as usize].protocol_mut().as_compact_block_relay_mut() {
                    relay.register_high_bandwidth_peer(node);
                }
            }
        }
    }

    /// Create genesis, install it on every node and seed transactions.
    fn initialize_genesis(&mut self) {
        let total_power: u64 = self.mining_power.iter().sum();
        let next_difficulty = self.chain.genesis_next_difficulty(total_power);
        let genesis = self.blocks.genesis(0, next_difficulty);

        for node in 0..self.nodes.len() as NodeIndex {
            self.with_node(node, |node, ctx| node.install_genesis(ctx, genesis));
        }

        if self.config.mining.use_transactions {
            for _ in 0..self.config.mining.initial_transactions {
                self.inject_random_transaction();
            }
        }

        info!(
            nodes = self.nodes.len(),
            protocol = %self.config.protocol,
            seed = self.seed,
            next_difficulty = %next_difficulty,
            "Genesis installed"
        );
    }

    // ─── Accessors ───

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index as usize)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn blocks(&self) -> &BlockArena {
        &self.blocks
    }

    pub fn observations(&self) -> &ObservationLedger {
        &self.observations
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn topology(&self) -> &dyn Topology {
        self.topology.as_ref()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Nodes acting as mining pools, in the order of their shares.
    pub fn pools(&self) -> &[NodeIndex] {
        &self.pools
    }

    /// Every `(adversary, honest neighbor)` link that is held back.
    pub fn delayed_links(&self) -> BTreeSet<(NodeIndex, NodeIndex)> {
        self.nodes
            .iter()
            .filter_map(|n| n.adversary().map(|a| (n.index(), a)))
            .flat_map(|(from, a)| a.delayed_links().iter().map(move |&to| (from, to)))
            .collect()
    }

    /// Chain and propagation summary of the run so far.
    pub fn report(&self) -> RunReport {
        RunReport::collect(self.now(), &self.blocks, &self.nodes, &self.observations)
    }

    // ─── Injection ───

    /// Inject a new transaction at `node` after `delay`.
    pub fn inject_transaction(&mut self, node: NodeIndex, delay: Duration) -> TxId {
        let id = TxId(self.transactions.len() as u64);
        self.transactions.push(Transaction::new(id, self.now() + delay));
        self.stats.transactions_injected += 1;
        self.scheduler.schedule(Task::new(
            TaskKind::TransactionRelay {
                from: None,
                to: node,
                tx: id,
            },
            delay,
        ));
        id
    }

    /// Inject a transaction at a uniformly random node and time within one
    /// target interval.
    fn inject_random_transaction(&mut self) {
        if self.nodes.is_empty() {
            return;
        }
        let node = self.rng.gen_range(0..self.nodes.len()) as NodeIndex;
        let delay_ms = self.rng.gen_range(0..self.config.mining.target_interval_ms);
        self.inject_transaction(node, Duration::from_millis(delay_ms));
    }

    /// Mint a block on `minter`'s current best right now, outside the
    /// mining lottery.
    pub fn mint_block(&mut self, minter: NodeIndex) -> Option<BlockId> {
        let parent = self.nodes.get(minter as usize)?.best()?;
        let difficulty = self.blocks.get(parent).next_difficulty;
        Some(self.create_block(minter, parent, difficulty))
    }

    // ─── Run Control ───

    /// Run the next task. Returns its key, or `None` if the queue is empty.
    pub fn step(&mut self) -> Option<TaskKey> {
        let (key, task) = self.scheduler.advance()?;
        self.stats.record(&task.kind);
        trace!(
            time = ?key.time,
            task = task.kind.name(),
            node = task.kind.target(),
            "Processing task"
        );
        self.dispatch(key, task.kind);
        Some(key)
    }

    /// Run every task due at or before `end_time`.
    pub fn run_until(&mut self, end_time: Duration) {
        while let Some((key, _)) = self.scheduler.peek_next() {
            if key.time > end_time {
                debug!(
                    remaining_tasks = self.scheduler.len(),
                    "Time limit reached"
                );
                break;
            }
            self.step();
        }
    }

    /// Run until the next minting completion would extend a chain beyond
    /// `height`.
    pub fn run_until_height(&mut self, height: u64) {
        self.run_until_height_within(height, u64::MAX);
    }

    /// Like [`run_until_height`](Self::run_until_height), but gives up after
    /// `max_tasks` tasks. Returns whether the height was reached.
    pub fn run_until_height_within(&mut self, height: u64, max_tasks: u64) -> bool {
        let mut executed = 0;
        while let Some((_, task)) = self.scheduler.peek_next() {
            if let TaskKind::MiningComplete { parent, .. } = task.kind {
                if self.blocks.height(parent) >= height {
                    info!(height, time = ?self.now(), "Height limit reached");
                    return true;
                }
            }
            if executed == max_tasks {
                debug!(remaining_tasks = self.scheduler.len(), "Task limit reached");
                return false;
            }
            self.step();
            executed += 1;
        }
        false
    }

    /// Run until the queue is empty or `max_tasks` tasks have run. Returns
    /// the number of tasks run.
    pub fn run_to_completion(&mut self, max_tasks: u64) -> u64 {
        let mut executed = 0;
        while executed < max_tasks && self.step().is_some() {
            executed += 1;
        }
        if !self.scheduler.is_empty() {
            debug!(remaining_tasks = self.scheduler.len(), "Task limit reached");
        }
        executed
    }

    // ─── Dispatch ───

    fn dispatch(&mut self, key: TaskKey, kind: TaskKind) {
        if let TaskKind::MiningComplete {
            minter,
            parent,
            difficulty,
        } = kind
        {
            self.nodes[minter as usize].complete_mining(key);
            self.create_block(minter, parent, difficulty);
            return;
        }

        if let Some(sender) = kind.uploader() {
            self.with_node(sender, |node, ctx| node.on_transmission_complete(ctx));
        }
        self.with_node(kind.target(), |node, ctx| node.handle_message(ctx, &kind));
    }

    /// Append a block to the arena and hand it to its minter.
    fn create_block(&mut self, minter: NodeIndex, parent: BlockId, difficulty: Difficulty) -> BlockId {
        let use_transactions = self.config.mining.use_transactions;
        let included = if use_transactions {
            self.nodes[minter as usize]
                .select_block_transactions(self.config.relay.max_block_transactions)
        } else {
            Vec::new()
        };
        let replacements = included.len().max(1);

        let now = self.now();
        let block = self.blocks.mint(parent, minter, now, difficulty, included);
        self.stats.blocks_minted += 1;
        debug!(
            block = %block,
            minter,
            height = self.blocks.height(block),
            time = ?now,
            "Block minted"
        );

        if use_transactions {
            for _ in 0..replacements {
                self.inject_random_transaction();
            }
        }

        self.with_node(minter, |node, ctx| node.receive_block(ctx, block));
        self.retire_mining_windows();
        block
    }

    /// No node mines below the lowest best block, so admission windows of
    /// older parents are dead.
    fn retire_mining_windows(&mut self) {
        let lowest = self
            .nodes
            .iter()
            .filter_map(Node::best)
            .map(|best| self.blocks.height(best))
            .min();
        if let Some(height) = lowest {
            self.scheduler.retire_mining_windows_below(height);
        }
    }

    /// Run `f` against one node with a context borrowed from the runner.
    fn with_node<R>(
        &mut self,
        index: NodeIndex,
        f: impl FnOnce(&mut Node, &mut NodeContext<'_>) -> R,
    ) -> R {
        let mut ctx = NodeContext {
            scheduler: &mut self.scheduler,
            blocks: &self.blocks,
            topology: self.topology.as_ref(),
            links: self.links.as_ref(),
            chain: &self.chain,
            peers: &self.peers,
            config: &self.config.relay,
            rng: &mut self.rng,
            observations: &mut self.observations,
            counters: &mut self.stats.relay,
        };
        f(&mut self.nodes[index as usize], &mut ctx)
    }
}

/// Stream of the seed that places mining pools.
fn mining_rng(seed: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(2);
    rng
}

impl std::fmt::Debug for SimulationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRunner")
            .field("nodes", &self.nodes.len())
            .field("now", &self.now())
            .field("pending", &self.scheduler.len())
            .field("blocks", &self.blocks.len())
            .field("seed", &self.seed)
            .field("pools", &self.pools.len())
            .finish()
    }
}
