//! Static undirected topology.

use crate::{DegreeModel, NetworkConfig, RegionTable};
use blocksim_core::{ConfigError, Topology};
use blocksim_types::{NodeIndex, Region};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// Adjacency lists plus a region per node.
///
/// Edges are undirected: adding `(a, b)` makes each a neighbor of the other.
/// Neighbor lists keep insertion order, which makes iteration over them
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    neighbors: Vec<Vec<NodeIndex>>,
    regions: Vec<Region>,
}

impl StaticTopology {
    /// Nodes placed in the given regions, with no edges yet.
    pub fn new(regions: Vec<Region>) -> Self {
        Self {
            neighbors: vec![Vec::new(); regions.len()],
            regions,
        }
    }

    /// Every node connected to every other node.
    pub fn full_mesh(regions: Vec<Region>) -> Self {
        let mut topology = Self::new(regions);
        let n = topology.node_count() as NodeIndex;
        for a in 0..n {
            for b in (a + 1)..n {
                topology.add_edge(a, b);
            }
        }
        topology
    }

    /// Nodes in the given regions connected by an explicit edge list.
    pub fn from_edges(
        regions: Vec<Region>,
        edges: &[(NodeIndex, NodeIndex)],
    ) -> Result<Self, ConfigError> {
        let mut topology = Self::new(regions);
        let nodes = topology.node_count();
        for &(a, b) in edges {
            for (node, neighbor) in [(a, b), (b, a)] {
                if neighbor as usize >= nodes {
                    return Err(ConfigError::NeighborOutOfRange {
                        node: node as usize,
                        neighbor: neighbor as usize,
                        nodes,
                    });
                }
            }
            topology.add_edge(a, b);
        }
        Ok(topology)
    }

    /// Random topology following `config`.
    ///
    /// Regions are sampled from the configured distribution, then each node
    /// dials its sampled number of distinct random peers it is not already
    /// connected to.
    pub fn generate(
        config: &NetworkConfig,
        table: &RegionTable,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, ConfigError> {
        if config.region_distribution.is_empty() {
            return Err(ConfigError::EmptyDistribution("region distribution"));
        }
        if config.region_distribution.len() > table.region_count() {
            return Err(ConfigError::RegionOutOfRange {
                index: config.region_distribution.len() - 1,
                regions: table.region_count(),
            });
        }
        if let DegreeModel::Cumulative(cdf) = &config.degree {
            if cdf.is_empty() {
                return Err(ConfigError::EmptyDistribution("degree distribution"));
            }
        }

        let regions = (0..config.node_count)
            .map(|_| sample_region(&config.region_distribution, rng))
            .collect();
        let mut topology = Self::new(regions);

        let n = config.node_count as NodeIndex;
        for node in 0..n {
            let degree = sample_degree(&config.degree, rng);
            let mut candidates: Vec<NodeIndex> = (0..n)
                .filter(|&peer| peer != node && !topology.is_connected(node, peer))
                .collect();
            candidates.shuffle(rng);
            for peer in candidates.into_iter().take(degree) {
                topology.add_edge(node, peer);
            }
        }

        debug!(
            nodes = topology.node_count(),
            edges = topology.edge_count(),
            "Generated topology"
        );
        Ok(topology)
    }

    /// Connect two nodes. Returns `false` for self-loops and existing edges.
    pub fn add_edge(&mut self, a: NodeIndex, b: NodeIndex) -> bool {
        if a == b || self.is_connected(a, b) {
            return false;
        }
        self.neighbors[a as usize].push(b);
        self.neighbors[b as usize].push(a);
        true
    }

    pub fn is_connected(&self, a: NodeIndex, b: NodeIndex) -> bool {
        self.neighbors[a as usize].contains(&b)
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.neighbors.iter().map(Vec::len).sum::<usize>() / 2
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

impl Topology for StaticTopology {
    fn node_count(&self) -> usize {
        self.regions.len()
    }

    fn neighbors(&self, node: NodeIndex) -> &[NodeIndex] {
        &self.neighbors[node as usize]
    }

    fn region(&self, node: NodeIndex) -> Region {
        self.regions[node as usize]
    }
}

fn sample_region(distribution: &[f64], rng: &mut ChaCha8Rng) -> Region {
    let total: f64 = distribution.iter().sum();
    let mut roll = rng.gen::<f64>() * total;
    for (index, share) in distribution.iter().enumerate() {
        if roll < *share {
            return Region(index as u16);
        }
        roll -= share;
    }
    Region((distribution.len() - 1) as u16)
}

fn sample_degree(model: &DegreeModel, rng: &mut ChaCha8Rng) -> usize {
    match model {
        DegreeModel::Fixed(degree) => *degree,
        DegreeModel::Cumulative(cdf) => {
            let roll = rng.gen::<f64>();
            cdf.iter().position(|&p| roll < p).unwrap_or(cdf.len() - 1) + 1
        }
    }
}
