//! Simulator configuration file.
//!
//! Example TOML:
//!
//! ```toml
//! chain = "monero"
//! seed = 42
//! end_height = 20
//!
//! [network]
//! node_count = 500
//!
//! [adversary]
//! node_probability = 0.1
//! delayed_link_probability = 0.5
//! delay = -1
//! ```
//!
//! The chain preset supplies relay sizes, timeouts, block interval and
//! protocol. A `[relay]` or `[mining]` table replaces the preset's section
//! as a whole; fields it leaves out take their built-in defaults.

use crate::ChainPreset;
use anyhow::{Context, Result};
use blocksim_network_memory::NetworkConfig;
use blocksim_node::{AdversaryConfig, ProtocolKind, RelayConfig};
use blocksim_simulation::{MiningConfig, SimulationConfig};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level simulator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Chain whose parameters seed every section.
    #[serde(default)]
    pub chain: ChainPreset,

    /// Random seed. A random one is drawn when omitted.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Stop once the main chain reaches this height.
    #[serde(default = "default_end_height")]
    pub end_height: u64,

    /// Overrides the chain's default protocol.
    #[serde(default)]
    pub protocol: Option<ProtocolKind>,

    /// Probability a node is a churn node.
    #[serde(default = "default_churn_node_rate")]
    pub churn_node_rate: f64,

    /// Random topology settings.
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub adversary: AdversaryConfig,

    /// Replaces the chain's relay settings.
    #[serde(default)]
    pub relay: Option<RelayConfig>,

    /// Replaces the chain's mining settings.
    #[serde(default)]
    pub mining: Option<MiningConfig>,
}

fn default_end_height() -> u64 {
    10
}

fn default_churn_node_rate() -> f64 {
    SimulationConfig::default().churn_node_rate
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            chain: ChainPreset::default(),
            seed: None,
            end_height: default_end_height(),
            protocol: None,
            churn_node_rate: default_churn_node_rate(),
            network: NetworkConfig::default(),
            adversary: AdversaryConfig::default(),
            relay: None,
            mining: None,
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol.unwrap_or_else(|| self.chain.default_protocol())
    }

    /// Relay settings: the file's `[relay]` table, else the chain preset.
    pub fn relay_config(&self) -> RelayConfig {
        self.relay
            .clone()
            .unwrap_or_else(|| self.chain.relay_config())
    }

    /// Mining settings: the file's `[mining]` table, else the chain preset.
    pub fn mining_config(&self) -> MiningConfig {
        self.mining
            .clone()
            .unwrap_or_else(|| self.chain.mining_config())
    }

    /// The runner configuration this file describes.
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig::new(self.protocol())
            .with_churn_node_rate(self.churn_node_rate)
            .with_relay(self.relay_config())
            .with_adversary(self.adversary.clone())
            .with_mining(self.mining_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksim_node::AdversarialDelay;
    use blocksim_simulation::MiningDistribution;
    use std::time::Duration;

    #[test]
    fn test_empty_file_is_bitcoin() {
        let config = SimulatorConfig::parse("").unwrap();
        assert_eq!(config.chain, ChainPreset::Btc);
        assert_eq!(config.end_height, 10);
        assert_eq!(config.protocol(), ProtocolKind::CompactBlockRelay);
        assert_eq!(config.network.node_count, 300);
        assert!(config.simulation_config().validate().is_ok());
    }

    #[test]
    fn test_preset_fills_unset_sections() {
        let config = SimulatorConfig::parse(
            r#"
            chain = "monero"
            seed = 7

            [network]
            node_count = 50

            [adversary]
            node_probability = 0.1
            delayed_link_probability = 0.5
            delay = -1
            "#,
        )
        .unwrap();

        let simulation = config.simulation_config();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.network.node_count, 50);
        assert_eq!(simulation.protocol, ProtocolKind::Fluffy);
        assert_eq!(simulation.relay.block_size, 79_900);
        assert_eq!(simulation.mining.target_interval(), Duration::from_secs(120));
        assert_eq!(simulation.adversary.delay, AdversarialDelay::Drop);
    }

    #[test]
    fn test_explicit_sections_win() {
        let config = SimulatorConfig::parse(
            r#"
            chain = "eth"
            protocol = "push"

            [relay]
            block_size = 5000

            [mining]
            target_interval_ms = 1000
            admission_ceiling = 8
            "#,
        )
        .unwrap();

        let simulation = config.simulation_config();
        assert_eq!(simulation.protocol, ProtocolKind::Push);
        assert_eq!(simulation.relay.block_size, 5_000);
        assert_eq!(simulation.mining.target_interval_ms, 1_000);
        assert_eq!(simulation.mining.admission_ceiling, Some(8));
    }

    #[test]
    fn test_mining_distribution_from_file() {
        let config = SimulatorConfig::parse(
            r#"
            [mining]
            miners = 40

            [mining.distribution]
            kind = "pools"
            shares = [30.0, 20.0]
            interconnect = true
            "#,
        )
        .unwrap();
        let mining = config.simulation_config().mining;
        assert_eq!(mining.miners, Some(40));
        assert_eq!(
            mining.distribution,
            MiningDistribution::Pools {
                shares: vec![30.0, 20.0],
                interconnect: true
            }
        );
        assert!(mining.interconnects_pools());

        let config = SimulatorConfig::parse(
            r#"
            [mining]
            distribution = { kind = "zero_nodes", zero_nodes = 5 }
            "#,
        )
        .unwrap();
        assert_eq!(
            config.mining_config().distribution,
            MiningDistribution::ZeroNodes { zero_nodes: 5 }
        );
        assert!(SimulatorConfig::parse("[mining.distribution]\nkind = \"lottery\"").is_err());
    }

    #[test]
    fn test_rejects_unknown_protocol() {
        assert!(SimulatorConfig::parse(r#"protocol = "gossip""#).is_err());
    }

    #[test]
    fn test_rejects_bad_adversarial_delay() {
        let result = SimulatorConfig::parse(
            r#"
            [adversary]
            delay = -5
            "#,
        );
        assert!(result.is_err());
    }
}
