//! Construction-time configuration errors.

use thiserror::Error;

/// A configuration the simulation refuses to start with.
///
/// Raised only while building a run; once the scheduler starts, no operation
/// fails.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown propagation protocol: {0}")]
    UnknownProtocol(String),

    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("region index {index} out of range for {regions} regions")]
    RegionOutOfRange { index: usize, regions: usize },

    #[error("zero bandwidth between regions {from} and {to}")]
    ZeroBandwidth { from: usize, to: usize },

    #[error("{name} must be a probability in [0, 1], got {value}")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("{0} must not be empty")]
    EmptyDistribution(&'static str),

    #[error("{name} must be in (0, 1], got {value}")]
    InvalidFraction { name: &'static str, value: f64 },

    #[error("node {node} lists neighbor {neighbor} outside 0..{nodes}")]
    NeighborOutOfRange {
        node: usize,
        neighbor: usize,
        nodes: usize,
    },

    #[error("topology has {topology} nodes but {expected} were configured")]
    NodeCountMismatch { topology: usize, expected: usize },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("mining pool shares add up to {total}%, more than 100%")]
    PoolSharesExceedTotal { total: f64 },

    #[error("{pools} mining pools need as many miners, got {miners}")]
    TooFewMiners { pools: usize, miners: usize },
}

impl ConfigError {
    /// Check that `value` is a probability.
    pub fn check_probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
        if (0.0..=1.0).contains(&value) {
            Ok(())
        } else {
            Err(ConfigError::InvalidProbability { name, value })
        }
    }
}
