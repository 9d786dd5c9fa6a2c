//! blocksim CLI
//!
//! Simulate block propagation on a random proof-of-work network until the
//! main chain reaches a target height, then print a summary.
//!
//! # Example
//!
//! ```bash
//! # Bitcoin defaults, fixed seed
//! blocksim --seed 42 --nodes 300 --end-height 20
//!
//! # Monero preset with a file, 10% adversaries dropping half their links
//! blocksim --chain monero --config sim.toml -p 0.1 -q 0.5 -m -1
//!
//! # Bitcoin pools, per-block propagation curves
//! blocksim --mining-pools --curves --end-height 5
//! ```

use anyhow::Result;
use blocksim_node::{AdversarialDelay, ProtocolKind};
use blocksim_simulation::MiningDistribution;
use blocksim_simulator::{build_runner, ChainPreset, SimulatorConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// blocksim
///
/// Runs deterministic block propagation simulations. Single-threaded,
/// reproducible when the same seed is used.
#[derive(Parser, Debug)]
#[command(name = "blocksim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Chain preset (overrides config)
    #[arg(long, value_enum)]
    chain: Option<ChainPreset>,

    /// Propagation protocol (overrides the chain's default)
    #[arg(long)]
    protocol: Option<ProtocolKind>,

    /// Number of nodes
    #[arg(short = 'n', long)]
    nodes: Option<usize>,

    /// Number of mining nodes. All nodes mine when omitted.
    #[arg(long)]
    miners: Option<usize>,

    /// Give the first N nodes no mining power
    #[arg(long, conflicts_with = "mining_pools")]
    zero_nodes: Option<usize>,

    /// Place Bitcoin's mining pools on random miners and interconnect them
    #[arg(long)]
    mining_pools: bool,

    /// Random seed for reproducible results. When omitted, a random seed is used.
    #[arg(long)]
    seed: Option<u64>,

    /// Stop once the main chain reaches this height
    #[arg(long)]
    end_height: Option<u64>,

    /// Probability a node is adversarial
    #[arg(short = 'p', long)]
    adversarial_nodes: Option<f64>,

    /// Probability an adversary delays a link to an honest neighbor
    #[arg(short = 'q', long)]
    delayed_links: Option<f64>,

    /// Delay in milliseconds on delayed links; -1 drops instead
    #[arg(short = 'm', long, allow_hyphen_values = true)]
    delay_ms: Option<i64>,

    /// Inject, relay and include transactions
    #[arg(long)]
    use_transactions: bool,

    /// Bound competing minting tasks per parent block
    #[arg(long)]
    admission_ceiling: Option<usize>,

    /// Stop after this many tasks even if the height is not reached
    #[arg(long)]
    max_tasks: Option<u64>,

    /// Print each block's propagation curve
    #[arg(long)]
    curves: bool,
}

impl Args {
    /// Apply CLI overrides to the configuration.
    fn apply_overrides(&self, config: &mut SimulatorConfig) -> Result<()> {
        if let Some(chain) = self.chain {
            config.chain = chain;
        }
        if let Some(protocol) = self.protocol {
            config.protocol = Some(protocol);
        }
        if let Some(nodes) = self.nodes {
            config.network.node_count = nodes;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(height) = self.end_height {
            config.end_height = height;
        }
        if let Some(p) = self.adversarial_nodes {
            config.adversary.node_probability = p;
        }
        if let Some(q) = self.delayed_links {
            config.adversary.delayed_link_probability = q;
        }
        if let Some(ms) = self.delay_ms {
            config.adversary.delay = AdversarialDelay::try_from(ms).map_err(anyhow::Error::msg)?;
        }

        let mut mining = config.mining_config();
        if self.miners.is_some() {
            mining.miners = self.miners;
        }
        if self.admission_ceiling.is_some() {
            mining.admission_ceiling = self.admission_ceiling;
        }
        if self.use_transactions {
            mining.use_transactions = true;
        }
        if let Some(zero_nodes) = self.zero_nodes {
            mining.distribution = MiningDistribution::ZeroNodes { zero_nodes };
        }
        if self.mining_pools {
            mining.distribution = MiningDistribution::btc_pools();
        }
        config.mining = Some(mining);
        Ok(())
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("warn,blocksim_simulator=info,blocksim_simulation=info")
        }))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimulatorConfig::load(path)?,
        None => SimulatorConfig::default(),
    };
    args.apply_overrides(&mut config)?;

    let seed = config.seed.unwrap_or_else(rand::random);

    info!(
        chain = %config.chain,
        protocol = %config.protocol(),
        nodes = config.network.node_count,
        end_height = config.end_height,
        seed,
        "Starting simulation"
    );

    let mut runner = build_runner(&config, seed)?;
    let started = Instant::now();

    let max_tasks = args.max_tasks.unwrap_or(u64::MAX);
    let reached = runner.run_until_height_within(config.end_height, max_tasks);
    if !reached {
        warn!(end_height = config.end_height, "Stopped before reaching the end height");
    }

    let stats = runner.stats();
    info!(
        tasks = stats.tasks_executed,
        blocks = stats.blocks_minted,
        wall_ms = started.elapsed().as_millis() as u64,
        "Simulation finished"
    );

    let report = runner.report();
    println!("\n=== Run Summary (seed {seed}) ===");
    println!("{report}");

    if args.curves {
        println!("\n=== Propagation (delay ms, nodes, mining power, power reached) ===");
        for curve in &report.curves {
            let chain = if curve.main_chain { "main" } else { "stale" };
            println!("block {} ({chain})", curve.block);
            for bucket in &curve.buckets {
                println!(
                    "  {:>8} {:>5} {:>10} {:>6.1}%",
                    bucket.delay.as_millis(),
                    bucket.nodes,
                    bucket.mining_power,
                    bucket.reached_power_share * 100.0
                );
            }
        }
    }

    println!("\n=== Tasks ===");
    for (kind, count) in &stats.tasks_by_kind {
        println!("{kind:<28} {count}");
    }

    let relay = &stats.relay;
    println!("\n=== Relay ===");
    println!("mining cancelled:    {}", relay.mining_cancelled);
    println!("mining filtered:     {}", relay.mining_filtered);
    println!("compact failures:    {}", relay.compact_failures);
    println!("reorgs:              {}", relay.reorgs);
    println!("timeout retries:     {}", relay.timeout_retries);
    println!("sends delayed:       {}", relay.sends_delayed);
    println!("sends dropped:       {}", relay.sends_dropped);

    Ok(())
}
