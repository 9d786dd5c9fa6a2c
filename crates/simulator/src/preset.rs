//! Chain presets.
//!
//! Payload sizes, block interval, download timeout and the relay protocol
//! each modeled chain uses in practice.

use blocksim_node::{ProtocolKind, RelayConfig};
use blocksim_simulation::MiningConfig;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// A modeled proof-of-work chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ChainPreset {
    #[default]
    #[serde(alias = "bitcoin")]
    #[value(alias = "bitcoin")]
    Btc,
    #[serde(alias = "ethereum")]
    #[value(alias = "ethereum")]
    Eth,
    #[serde(alias = "dogecoin")]
    #[value(alias = "dogecoin")]
    Doge,
    Monero,
    Cardano,
}

impl ChainPreset {
    /// Full block, compact block and transaction size in bytes.
    pub fn sizes(self) -> (u64, u64, u64) {
        match self {
            ChainPreset::Btc => (1_700_000, 17_807, 60_000),
            ChainPreset::Eth => (1_200, 1_200, 40),
            ChainPreset::Doge => (15_000, 15_000, 30),
            ChainPreset::Monero => (79_900, 1_266, 390),
            ChainPreset::Cardano => (31_000, 31_000, 101),
        }
    }

    pub fn target_interval(self) -> Duration {
        Duration::from_millis(match self {
            ChainPreset::Btc => 600_000,
            ChainPreset::Eth => 13_000,
            ChainPreset::Doge => 60_000,
            ChainPreset::Monero => 120_000,
            ChainPreset::Cardano => 20_000,
        })
    }

    /// How long a node waits on an adversarial advertiser.
    pub fn inventory_timeout(self) -> Duration {
        Duration::from_millis(match self {
            ChainPreset::Btc => 600_000,
            ChainPreset::Eth => 5_000,
            ChainPreset::Doge => 60_000,
            ChainPreset::Monero => 0,
            ChainPreset::Cardano => 20_000,
        })
    }

    pub fn default_protocol(self) -> ProtocolKind {
        match self {
            ChainPreset::Btc | ChainPreset::Doge => ProtocolKind::CompactBlockRelay,
            ChainPreset::Eth => ProtocolKind::Hybrid,
            ChainPreset::Monero => ProtocolKind::Fluffy,
            ChainPreset::Cardano => ProtocolKind::ParallelFetch,
        }
    }

    pub fn relay_config(self) -> RelayConfig {
        let (block, compact, transaction) = self.sizes();
        RelayConfig::default()
            .with_sizes(block, compact, transaction)
            .with_inventory_timeout(self.inventory_timeout())
    }

    pub fn mining_config(self) -> MiningConfig {
        MiningConfig::default().with_target_interval(self.target_interval())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChainPreset::Btc => "btc",
            ChainPreset::Eth => "eth",
            ChainPreset::Doge => "doge",
            ChainPreset::Monero => "monero",
            ChainPreset::Cardano => "cardano",
        }
    }
}

impl fmt::Display for ChainPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
