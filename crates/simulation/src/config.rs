//! Simulation configuration.

use blocksim_core::ConfigError;
use blocksim_node::{AdversaryConfig, ProtocolKind, RelayConfig};
use blocksim_types::NodeIndex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// Percent of the network's hash power held by the largest public Bitcoin
/// pools, largest first.
pub const BTC_POOL_SHARES: [f64; 22] = [
    23.002, 19.702, 15.072, 8.859, 8.687, 2.418, 1.946, 1.755, 1.207, 1.061, 1.046, 0.997, 0.641,
    0.296, 0.146, 0.109, 0.071, 0.041, 0.022, 0.022, 0.004, 0.004,
];

/// [`BTC_POOL_SHARES`] with the unattributed remainder counted as one more
/// pool.
pub const BTC_POOL_SHARES_WITH_UNKNOWN: [f64; 23] = [
    23.002, 19.702, 15.072, 12.890, 8.859, 8.687, 2.418, 1.946, 1.755, 1.207, 1.061, 1.046, 0.997,
    0.641, 0.296, 0.146, 0.109, 0.071, 0.041, 0.022, 0.022, 0.004, 0.004,
];

/// How hash power is spread over the nodes.
///
/// In a file: `distribution = { kind = "zero_nodes", zero_nodes = 100 }`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MiningDistribution {
    /// Miners split the total power evenly.
    #[default]
    Even,

    /// The first `zero_nodes` nodes hold no power and never mine; the
    /// miners after them split the total evenly.
    ZeroNodes { zero_nodes: usize },

    /// Pools holding `shares` percent of the total each, placed on random
    /// miners. The other miners split what is left evenly. With
    /// `interconnect`, generated topologies link every pool to every other.
    Pools {
        shares: Vec<f64>,
        #[serde(default)]
        interconnect: bool,
    },
}

impl MiningDistribution {
    /// Bitcoin's pool landscape, the unattributed remainder as one pool,
    /// pools interconnected.
    pub fn btc_pools() -> Self {
        MiningDistribution::Pools {
            shares: BTC_POOL_SHARES_WITH_UNKNOWN.to_vec(),
            interconnect: true,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let MiningDistribution::Pools { shares, .. } = self else {
            return Ok(());
        };
        if shares.is_empty() {
            return Err(ConfigError::EmptyDistribution("pool shares"));
        }
        if let Some(&share) = shares.iter().find(|&&s| !(s > 0.0 && s <= 100.0)) {
            return Err(ConfigError::InvalidFraction {
                name: "pool share (percent / 100)",
                value: share / 100.0,
            });
        }
        let total: f64 = shares.iter().sum();
        // Published shares are rounded, so allow a little slack.
        if total > 100.0 + 1e-6 {
            return Err(ConfigError::PoolSharesExceedTotal { total });
        }
        Ok(())
    }
}

/// Hash power per node and which nodes are pools.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MiningAssignment {
    pub power: Vec<u64>,
    /// Pool nodes, in the order of their shares.
    pub pools: Vec<NodeIndex>,
}

/// Minting and transaction-injection tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Expected time between blocks across the whole network.
    pub target_interval_ms: u64,

    /// Minting tasks admitted per parent before only strict improvements
    /// are kept. `None` disables the filter.
    pub admission_ceiling: Option<usize>,

    /// Hash power shared by all miners.
    pub total_mining_power: u64,

    /// Number of nodes that mine, starting from node 0 (or from the first
    /// node after the zero-power ones). `None` makes every node a miner.
    pub miners: Option<usize>,

    pub distribution: MiningDistribution,

    /// Transactions injected at genesis.
    pub initial_transactions: usize,

    /// Whether transactions are injected, relayed and included in blocks.
    pub use_transactions: bool,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            target_interval_ms: 600_000,
            admission_ceiling: None,
            total_mining_power: 10_000_000,
            miners: None,
            distribution: MiningDistribution::Even,
            initial_transactions: 100,
            use_transactions: false,
        }
    }
}

impl MiningConfig {
    pub fn with_target_interval(mut self, interval: Duration) -> Self {
        self.target_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_admission_ceiling(mut self, ceiling: Option<usize>) -> Self {
        self.admission_ceiling = ceiling;
        self
    }

    pub fn with_miners(mut self, miners: Option<usize>) -> Self {
        self.miners = miners;
        self
    }

    pub fn with_distribution(mut self, distribution: MiningDistribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_transactions(mut self, initial: usize) -> Self {
        self.use_transactions = true;
        self.initial_transactions = initial;
        self
    }

    pub fn target_interval(&self) -> Duration {
        Duration::from_millis(self.target_interval_ms)
    }

    /// Whether generated topologies should link pools to each other.
    pub fn interconnects_pools(&self) -> bool {
        matches!(
            self.distribution,
            MiningDistribution::Pools {
                interconnect: true,
                ..
            }
        )
    }

    /// Spread the total power over `node_count` nodes.
    ///
    /// Miners are a contiguous run of nodes, after the zero-power ones for
    /// [`MiningDistribution::ZeroNodes`]. Pools are drawn from the miners
    /// with `rng`; the other distributions draw nothing.
    pub fn assign_mining_power(
        &self,
        node_count: usize,
        rng: &mut impl Rng,
    ) -> Result<MiningAssignment, ConfigError> {
        let first = match self.distribution {
            MiningDistribution::ZeroNodes { zero_nodes } => zero_nodes.min(node_count),
            _ => 0,
        };
        let miners = self
            .miners
            .unwrap_or(node_count - first)
            .min(node_count - first);
        let mut power = vec![0; node_count];

        let MiningDistribution::Pools { shares, .. } = &self.distribution else {
            if miners > 0 {
                let share = self.total_mining_power / miners as u64;
                power[first..first + miners].fill(share);
            }
            return Ok(MiningAssignment {
                power,
                pools: Vec::new(),
            });
        };

        if shares.len() > miners {
            return Err(ConfigError::TooFewMiners {
                pools: shares.len(),
                miners,
            });
        }
        let candidates: Vec<NodeIndex> = (first..first + miners).map(|i| i as NodeIndex).collect();
        let pools: Vec<NodeIndex> = candidates
            .choose_multiple(rng, shares.len())
            .copied()
            .collect();

        let pool_power: Vec<u64> = shares
            .iter()
            .map(|share| (self.total_mining_power as f64 / 100.0 * share).round() as u64)
            .collect();
        let solo_miners = miners - pools.len();
        if solo_miners > 0 {
            let remainder = self
                .total_mining_power
                .saturating_sub(pool_power.iter().sum());
            power[first..first + miners].fill(remainder / solo_miners as u64);
        }
        for (&pool, &share) in pools.iter().zip(&pool_power) {
            power[pool as usize] = share;
        }
        Ok(MiningAssignment { power, pools })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_interval_ms == 0 {
            return Err(ConfigError::Zero("target_interval_ms"));
        }
        if self.admission_ceiling == Some(0) {
            return Err(ConfigError::Zero("admission_ceiling"));
        }
        self.distribution.validate()
    }
}

/// Everything a [`SimulationRunner`](crate::SimulationRunner) needs besides
/// the topology, link model and seed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Propagation protocol every node runs.
    pub protocol: ProtocolKind,

    /// Probability a node is a churn node.
    pub churn_node_rate: f64,

    pub relay: RelayConfig,
    pub adversary: AdversaryConfig,
    pub mining: MiningConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolKind::CompactBlockRelay,
            churn_node_rate: 0.976,
            relay: RelayConfig::default(),
            adversary: AdversaryConfig::default(),
            mining: MiningConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn new(protocol: ProtocolKind) -> Self {
        Self {
            protocol,
            ..Self::default()
        }
    }

    pub fn with_churn_node_rate(mut self, rate: f64) -> Self {
        self.churn_node_rate = rate;
        self
    }

    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_adversary(mut self, adversary: AdversaryConfig) -> Self {
        self.adversary = adversary;
        self
    }

    pub fn with_mining(mut self, mining: MiningConfig) -> Self {
        self.mining = mining;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_probability("churn_node_rate", self.churn_node_rate)?;
        self.relay.validate()?;
        self.adversary.validate()?;
        self.mining.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_default_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(5)
    }

    fn power(mining: &MiningConfig, nodes: usize) -> Vec<u64> {
        mining.assign_mining_power(nodes, &mut rng()).unwrap().power
    }

    #[test]
    fn test_mining_power_split_among_miners() {
        let mining = MiningConfig::default().with_miners(Some(4));
        assert_eq!(
            power(&mining, 6),
            vec![2_500_000, 2_500_000, 2_500_000, 2_500_000, 0, 0]
        );

        let everyone = power(&MiningConfig::default(), 5);
        assert!(everyone.iter().all(|&p| p == 2_000_000));

        let nobody = power(&MiningConfig::default().with_miners(Some(0)), 3);
        assert_eq!(nobody, vec![0, 0, 0]);
    }

    #[test]
    fn test_zero_nodes_come_first() {
        let mining = MiningConfig::default()
            .with_distribution(MiningDistribution::ZeroNodes { zero_nodes: 3 });
        assert_eq!(
            power(&mining, 5),
            vec![0, 0, 0, 5_000_000, 5_000_000]
        );

        let capped = mining.with_miners(Some(1));
        assert_eq!(power(&capped, 5), vec![0, 0, 0, 10_000_000, 0]);
    }

    #[test]
    fn test_pools_take_their_share_and_the_rest_is_split() {
        let mining = MiningConfig::default()
            .with_miners(Some(5))
            .with_distribution(MiningDistribution::Pools {
                shares: vec![50.0, 20.0],
                interconnect: false,
            });
        let assignment = mining.assign_mining_power(8, &mut rng()).unwrap();

        assert_eq!(assignment.pools.len(), 2);
        assert!(assignment.pools.iter().all(|&p| p < 5));
        assert_ne!(assignment.pools[0], assignment.pools[1]);
        assert_eq!(assignment.power[assignment.pools[0] as usize], 5_000_000);
        assert_eq!(assignment.power[assignment.pools[1] as usize], 2_000_000);

        let solo: Vec<u64> = (0..5)
            .filter(|i| !assignment.pools.contains(&(*i as NodeIndex)))
            .map(|i| assignment.power[i])
            .collect();
        assert_eq!(solo, vec![1_000_000; 3]);
        assert_eq!(&assignment.power[5..], &[0, 0, 0]);
        assert_eq!(assignment.power.iter().sum::<u64>(), 10_000_000);

        // Same seed, same placement.
        assert_eq!(mining.assign_mining_power(8, &mut rng()).unwrap(), assignment);
    }

    #[test]
    fn test_btc_pools_cover_the_network() {
        let mining = MiningConfig::default().with_distribution(MiningDistribution::btc_pools());
        assert!(mining.validate().is_ok());
        assert!(mining.interconnects_pools());

        let assignment = mining.assign_mining_power(23, &mut rng()).unwrap();
        assert_eq!(assignment.pools.len(), 23);
        assert_eq!(assignment.power.iter().sum::<u64>(), 9_999_800);

        let result = mining.assign_mining_power(10, &mut rng());
        assert_eq!(
            result,
            Err(ConfigError::TooFewMiners {
                pools: 23,
                miners: 10
            })
        );
    }

    #[test]
    fn test_rejects_bad_pool_shares() {
        let overfull = MiningConfig::default().with_distribution(MiningDistribution::Pools {
            shares: vec![60.0, 50.0],
            interconnect: false,
        });
        assert!(matches!(
            overfull.validate(),
            Err(ConfigError::PoolSharesExceedTotal { .. })
        ));

        let empty = MiningConfig::default().with_distribution(MiningDistribution::Pools {
            shares: Vec::new(),
            interconnect: false,
        });
        assert_eq!(
            empty.validate(),
            Err(ConfigError::EmptyDistribution("pool shares"))
        );

        let negative = MiningConfig::default().with_distribution(MiningDistribution::Pools {
            shares: vec![-1.0],
            interconnect: false,
        });
        assert!(matches!(
            negative.validate(),
            Err(ConfigError::InvalidFraction { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = SimulationConfig::default().with_churn_node_rate(1.2);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProbability { .. })
        ));

        let config = SimulationConfig::default()
            .with_mining(MiningConfig::default().with_target_interval(Duration::ZERO));
        assert_eq!(config.validate(), Err(ConfigError::Zero("target_interval_ms")));
    }
}
