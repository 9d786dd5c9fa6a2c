//! Network construction settings.

use crate::regions::{BITCOIN_2015_DEGREE_CDF, BITCOIN_2022_REGION_DISTRIBUTION};
use serde::Deserialize;

/// How many outbound connections each node dials.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegreeModel {
    /// Every node dials exactly this many peers.
    Fixed(usize),
    /// Sample from a cumulative distribution where entry `i` is
    /// `P(degree <= i + 1)`.
    Cumulative(Vec<f64>),
}

impl Default for DegreeModel {
    fn default() -> Self {
        DegreeModel::Cumulative(BITCOIN_2015_DEGREE_CDF.to_vec())
    }
}

/// Configuration for building a random topology.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Number of nodes in the network.
    #[serde(default = "default_node_count")]
    pub node_count: usize,

    /// Fraction of nodes placed in each region, indexed like
    /// [`REGION_NAMES`](crate::REGION_NAMES). Need not sum to exactly one.
    #[serde(default = "default_region_distribution")]
    pub region_distribution: Vec<f64>,

    /// Outbound connections per node.
    #[serde(default)]
    pub degree: DegreeModel,
}

fn default_node_count() -> usize {
    300
}

fn default_region_distribution() -> Vec<f64> {
    BITCOIN_2022_REGION_DISTRIBUTION.to_vec()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            node_count: default_node_count(),
            region_distribution: default_region_distribution(),
            degree: DegreeModel::default(),
        }
    }
}

impl NetworkConfig {
    pub fn with_node_count(mut self, node_count: usize) -> Self {
        self.node_count = node_count;
        self
    }

    pub fn with_fixed_degree(mut self, degree: usize) -> Self {
        self.degree = DegreeModel::Fixed(degree);
        self
    }

    pub fn with_region_distribution(mut self, distribution: Vec<f64>) -> Self {
        self.region_distribution = distribution;
        self
    }
}
