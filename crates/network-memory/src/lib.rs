//! In-memory network model for simulation.
//!
//! Provides [`StaticTopology`] (who is connected to whom, and where each node
//! lives) and [`RegionTable`] (latency and bandwidth between regions), the two
//! network collaborators the kernel queries. Both are plain data built once
//! per run, so the same seed always yields the same network.

mod config;
mod regions;
mod topology;

pub use config::{DegreeModel, NetworkConfig};
pub use regions::{
    RegionTable, BITCOIN_2015_DEGREE_CDF, BITCOIN_2022_REGION_DISTRIBUTION, REGION_NAMES,
};
pub use topology::StaticTopology;
