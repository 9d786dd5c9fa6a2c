//! Relay and adversary configuration.

use blocksim_core::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// How a compact block is judged reconstructible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionModel {
    /// Succeeds iff every included transaction is already known locally.
    Transactions,
    /// Fails with the configured churn/control failure rate.
    #[default]
    Probabilistic,
}

/// Payload sizes and tunables shared by every node in a run.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Full block size in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: u64,

    /// Compact block size in bytes.
    #[serde(default = "default_compact_block_size")]
    pub compact_block_size: u64,

    /// Transaction size in bytes.
    #[serde(default = "default_transaction_size")]
    pub transaction_size: u64,

    /// Fixed per-message processing time.
    #[serde(default = "default_processing_time_ms")]
    pub processing_time_ms: u64,

    /// How long a node waits on an adversarial advertiser before asking the
    /// next one.
    #[serde(default = "default_inventory_timeout_ms")]
    pub inventory_timeout_ms: u64,

    /// Mempool capacity per node.
    #[serde(default = "default_mempool_capacity")]
    pub mempool_capacity: usize,

    /// Number of neighbors each compact-relay node asks for high-bandwidth
    /// delivery.
    #[serde(default = "default_high_bandwidth_peers")]
    pub high_bandwidth_peers: usize,

    /// Probability a fluffy node opts into compact relay.
    #[serde(default = "default_compact_adoption_probability")]
    pub compact_adoption_probability: f64,

    /// Compact reconstruction failure rate for control nodes.
    #[serde(default = "default_compact_failure_rate_control")]
    pub compact_failure_rate_control: f64,

    /// Compact reconstruction failure rate for churn nodes.
    #[serde(default = "default_compact_failure_rate_churn")]
    pub compact_failure_rate_churn: f64,

    /// Size of the block remainder sent after a failed reconstruction, as
    /// fractions of `block_size`, for control nodes. One is drawn uniformly.
    #[serde(default = "default_failed_size_distribution_control")]
    pub failed_size_distribution_control: Vec<f64>,

    /// As above, for churn nodes.
    #[serde(default = "default_failed_size_distribution_churn")]
    pub failed_size_distribution_churn: Vec<f64>,

    #[serde(default)]
    pub reconstruction: ReconstructionModel,

    /// Upper bound on transactions included in a minted block.
    #[serde(default = "default_max_block_transactions")]
    pub max_block_transactions: usize,
}

fn default_block_size() -> u64 {
    1_700_000
}

fn default_compact_block_size() -> u64 {
    17_807
}

fn default_transaction_size() -> u64 {
    60_000
}

fn default_processing_time_ms() -> u64 {
    2
}

fn default_inventory_timeout_ms() -> u64 {
    600_000
}

fn default_mempool_capacity() -> usize {
    600
}

fn default_high_bandwidth_peers() -> usize {
    3
}

fn default_compact_adoption_probability() -> f64 {
    0.5
}

fn default_compact_failure_rate_control() -> f64 {
    0.13
}

fn default_compact_failure_rate_churn() -> f64 {
    0.27
}

fn default_failed_size_distribution_control() -> Vec<f64> {
    vec![0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.0]
}

fn default_failed_size_distribution_churn() -> Vec<f64> {
    vec![0.04, 0.08, 0.16, 0.32, 0.64, 1.0]
}

fn default_max_block_transactions() -> usize {
    10
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            compact_block_size: default_compact_block_size(),
            transaction_size: default_transaction_size(),
            processing_time_ms: default_processing_time_ms(),
            inventory_timeout_ms: default_inventory_timeout_ms(),
            mempool_capacity: default_mempool_capacity(),
            high_bandwidth_peers: default_high_bandwidth_peers(),
            compact_adoption_probability: default_compact_adoption_probability(),
            compact_failure_rate_control: default_compact_failure_rate_control(),
            compact_failure_rate_churn: default_compact_failure_rate_churn(),
            failed_size_distribution_control: default_failed_size_distribution_control(),
            failed_size_distribution_churn: default_failed_size_distribution_churn(),
            reconstruction: ReconstructionModel::default(),
            max_block_transactions: default_max_block_transactions(),
        }
    }
}

impl RelayConfig {
    pub fn with_sizes(mut self, block: u64, compact_block: u64, transaction: u64) -> Self {
        self.block_size = block;
        self.compact_block_size = compact_block;
        self.transaction_size = transaction;
        self
    }

    pub fn with_inventory_timeout(mut self, timeout: Duration) -> Self {
        self.inventory_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_reconstruction(mut self, model: ReconstructionModel) -> Self {
        self.reconstruction = model;
        self
    }

    pub fn with_compact_failure_rates(mut self, control: f64, churn: f64) -> Self {
        self.compact_failure_rate_control = control;
        self.compact_failure_rate_churn = churn;
        self
    }

    pub fn with_compact_adoption_probability(mut self, probability: f64) -> Self {
        self.compact_adoption_probability = probability;
        self
    }

    pub fn with_high_bandwidth_peers(mut self, peers: usize) -> Self {
        self.high_bandwidth_peers = peers;
        self
    }

    pub fn processing_time(&self) -> Duration {
        Duration::from_millis(self.processing_time_ms)
    }

    pub fn inventory_timeout(&self) -> Duration {
        Duration::from_millis(self.inventory_timeout_ms)
    }

    /// Compact reconstruction failure rate for a node.
    pub fn compact_failure_rate(&self, churn: bool) -> f64 {
        if churn {
            self.compact_failure_rate_churn
        } else {
            self.compact_failure_rate_control
        }
    }

    /// Candidate remainder sizes (fractions of a full block) for a node.
    pub fn failed_size_distribution(&self, churn: bool) -> &[f64] {
        if churn {
            &self.failed_size_distribution_churn
        } else {
            &self.failed_size_distribution_control
        }
    }

    /// Reject configurations the relay logic cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_probability(
            "compact_adoption_probability",
            self.compact_adoption_probability,
        )?;
        ConfigError::check_probability(
            "compact_failure_rate_control",
            self.compact_failure_rate_control,
        )?;
        ConfigError::check_probability("compact_failure_rate_churn", self.compact_failure_rate_churn)?;

        for (name, distribution) in [
            ("failed_size_distribution_control", &self.failed_size_distribution_control),
            ("failed_size_distribution_churn", &self.failed_size_distribution_churn),
        ] {
            if distribution.is_empty() {
                return Err(ConfigError::EmptyDistribution(name));
            }
            if let Some(&value) = distribution.iter().find(|&&f| !(f > 0.0 && f <= 1.0)) {
                return Err(ConfigError::InvalidFraction { name, value });
            }
        }
        if self.block_size == 0 {
            return Err(ConfigError::Zero("block_size"));
        }
        if self.compact_block_size == 0 {
            return Err(ConfigError::Zero("compact_block_size"));
        }
        Ok(())
    }
}

/// Extra delay an adversarial node applies over a delayed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "i64")]
pub enum AdversarialDelay {
    /// Hold the send back by this long.
    Fixed(Duration),
    /// Never send it. Written as `-1` in configuration files.
    Drop,
}

impl TryFrom<i64> for AdversarialDelay {
    type Error = String;

    fn try_from(ms: i64) -> Result<Self, Self::Error> {
        match ms {
            -1 => Ok(AdversarialDelay::Drop),
            ms if ms >= 0 => Ok(AdversarialDelay::Fixed(Duration::from_millis(ms as u64))),
            ms => Err(format!("adversarial delay must be -1 or non-negative, got {ms}")),
        }
    }
}

impl Default for AdversarialDelay {
    fn default() -> Self {
        AdversarialDelay::Fixed(Duration::ZERO)
    }
}

/// Adversary placement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdversaryConfig {
    /// Probability a node is adversarial (P).
    #[serde(default)]
    pub node_probability: f64,

    /// Probability an adversary delays a given link to an honest neighbor (Q).
    #[serde(default)]
    pub delayed_link_probability: f64,

    /// Delay applied over delayed links (M).
    #[serde(default)]
    pub delay: AdversarialDelay,
}

impl AdversaryConfig {
    pub fn new(node_probability: f64, delayed_link_probability: f64, delay: AdversarialDelay) -> Self {
        Self {
            node_probability,
            delayed_link_probability,
            delay,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_probability("adversary node_probability", self.node_probability)?;
        ConfigError::check_probability(
            "adversary delayed_link_probability",
            self.delayed_link_probability,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RelayConfig::default().validate().is_ok());
        assert!(AdversaryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_probability() {
        let config = RelayConfig::default().with_compact_failure_rates(1.5, 0.2);
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::InvalidProbability {
                name: "compact_failure_rate_control",
                value: 1.5
            }
        );
    }

    #[test]
    fn test_rejects_empty_failed_size_distribution() {
        let config = RelayConfig {
            failed_size_distribution_churn: vec![],
            ..RelayConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyDistribution(_))));
    }

    #[test]
    fn test_delay_sentinel_parses_as_drop() {
        assert_eq!(AdversarialDelay::try_from(-1), Ok(AdversarialDelay::Drop));
        assert_eq!(
            AdversarialDelay::try_from(250),
            Ok(AdversarialDelay::Fixed(Duration::from_millis(250)))
        );
        assert!(AdversarialDelay::try_from(-7).is_err());
    }
}
