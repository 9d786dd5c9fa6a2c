//! Mining power distributions and how far blocks reach into it.

use blocksim_core::Topology;
use blocksim_network_memory::{NetworkConfig, RegionTable, StaticTopology};
use blocksim_simulation::{
    MiningConfig, MiningDistribution, ProtocolKind, RelayConfig, SimulationConfig,
    SimulationRunner, BTC_POOL_SHARES_WITH_UNKNOWN,
};
use blocksim_types::{BlockId, Region};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

fn generated(config: SimulationConfig, nodes: usize, seed: u64) -> SimulationRunner {
    let network = NetworkConfig::default().with_node_count(nodes);
    SimulationRunner::generate(config, &network, RegionTable::fitted_2022(), seed).unwrap()
}

/// A block pushed over a small mesh: every bucket adds the power of the
/// nodes it reached, and the curve ends with the whole network.
#[test]
fn test_power_curve_covers_the_mesh() {
    let config = SimulationConfig::new(ProtocolKind::Push)
        .with_churn_node_rate(0.0)
        .with_relay(RelayConfig::default().with_sizes(1_000, 100, 50));
    let topology = Arc::new(StaticTopology::full_mesh(vec![Region(0); 4]));
    let links = Arc::new(RegionTable::uniform(1, Duration::from_millis(10), 1_000).unwrap());
    let mut runner = SimulationRunner::with_mining_power(
        config,
        topology,
        links,
        vec![1_000, 2_000, 3_000, 4_000],
        3,
    )
    .unwrap();

    let b1 = runner.mint_block(0).unwrap();
    runner.run_until(Duration::from_secs(1));

    let report = runner.report();
    let curve = report.curves.iter().find(|c| c.block == b1).unwrap();
    assert!(curve.main_chain);
    assert_eq!(curve.minter_power_share, 0.1);

    let reached: usize = curve.buckets.iter().map(|b| b.nodes).sum();
    let power: u64 = curve.buckets.iter().map(|b| b.mining_power).sum();
    assert_eq!(reached, 3);
    assert_eq!(power, 9_000);

    let last = curve.buckets.last().unwrap();
    assert_eq!(last.reached_nodes, 4);
    assert_eq!(last.reached_power_share, 1.0);
    for pair in curve.buckets.windows(2) {
        assert!(pair[0].delay < pair[1].delay);
        assert!(pair[0].reached_power_share < pair[1].reached_power_share);
    }

    assert_eq!(curve.time_to_power_share(0.1), Some(Duration::ZERO));
    let half = curve.time_to_power_share(0.5).unwrap();
    assert!(half > Duration::ZERO);
    assert!(half <= curve.time_to_power_share(1.0).unwrap());
}

/// Pools get their published share, sit among the miners and are linked to
/// each other on a generated topology.
#[traced_test]
#[test]
fn test_pools_are_interconnected() {
    let config = SimulationConfig::new(ProtocolKind::CompactBlockRelay).with_mining(
        MiningConfig::default().with_distribution(MiningDistribution::btc_pools()),
    );
    let mut runner = generated(config, 60, 11);

    let pools = runner.pools().to_vec();
    assert_eq!(pools.len(), BTC_POOL_SHARES_WITH_UNKNOWN.len());
    for (&pool, share) in pools.iter().zip(BTC_POOL_SHARES_WITH_UNKNOWN) {
        let expected = (10_000_000.0 / 100.0 * share).round() as u64;
        assert_eq!(runner.node(pool).unwrap().mining_power(), expected);
    }
    for (i, &a) in pools.iter().enumerate() {
        for &b in &pools[i + 1..] {
            assert!(runner.topology().neighbors(a).contains(&b), "{a} - {b}");
        }
    }

    runner.run_until_height(3);
    let report = runner.report();
    assert_eq!(report.main_chain_length, 3);
    assert!(report.curves.iter().any(|c| c.main_chain));
    assert!(report.mean_time_to_power_share(0.5).is_some());
}

/// Same seed, same pools.
#[test]
fn test_pool_placement_is_seeded() {
    let config = SimulationConfig::default().with_mining(
        MiningConfig::default().with_distribution(MiningDistribution::Pools {
            shares: vec![40.0, 30.0],
            interconnect: false,
        }),
    );
    let a = generated(config.clone(), 20, 4);
    let b = generated(config, 20, 4);
    assert_eq!(a.pools(), b.pools());
    assert_eq!(a.pools().len(), 2);
}

/// Zero-power nodes relay but never mint.
#[test]
fn test_zero_nodes_never_mint() {
    let config = SimulationConfig::new(ProtocolKind::Hybrid).with_mining(
        MiningConfig::default().with_distribution(MiningDistribution::ZeroNodes { zero_nodes: 10 }),
    );
    let mut runner = generated(config, 20, 6);
    assert!(runner.nodes()[..10].iter().all(|n| n.mining_power() == 0));
    assert!(runner.nodes()[10..].iter().all(|n| n.mining_power() == 1_000_000));

    runner.run_until_height(3);
    assert!(runner
        .blocks()
        .iter()
        .filter(|b| !b.is_genesis())
        .all(|b| b.minter >= 10));
}

#[test]
fn test_too_many_pools_is_rejected() {
    let config = SimulationConfig::default().with_mining(
        MiningConfig::default()
            .with_miners(Some(3))
            .with_distribution(MiningDistribution::btc_pools()),
    );
    let network = NetworkConfig::default().with_node_count(30);
    let result = SimulationRunner::generate(config, &network, RegionTable::fitted_2022(), 1);
    assert!(result.is_err());
}

/// Admission windows for parents every node has moved past are dropped as
/// the chain grows.
#[test]
fn test_admission_windows_follow_the_chain() {
    let config = SimulationConfig::new(ProtocolKind::CompactBlockRelay)
        .with_mining(MiningConfig::default().with_admission_ceiling(Some(2)));
    let mut runner = generated(config, 24, 9);
    assert!(runner.scheduler().admission().admitted(BlockId::GENESIS) > 0);

    runner.run_until_height(6);
    let admission = runner.scheduler().admission();
    assert_eq!(admission.admitted(BlockId::GENESIS), 0);
    assert!(admission.window_count() < runner.blocks().len());
}
