//! blocksim simulator
//!
//! A command-line front end over `blocksim-simulation`. It provides:
//!
//! - **Chain presets**: payload sizes, block interval, timeout and protocol
//!   for Bitcoin, Ethereum, Dogecoin, Monero and Cardano
//! - **Configuration**: an optional TOML file, overridden by CLI flags
//! - **Network construction**: random topology over the 2022 region tables
//!
//! # Example
//!
//! ```ignore
//! use blocksim_simulator::{build_runner, ChainPreset, SimulatorConfig};
//!
//! let config = SimulatorConfig {
//!     chain: ChainPreset::Monero,
//!     ..SimulatorConfig::default()
//! };
//! let mut runner = build_runner(&config, 42)?;
//! runner.run_until_height(config.end_height);
//! println!("{}", runner.report());
//! ```

mod config;
mod preset;

pub use config::SimulatorConfig;
pub use preset::ChainPreset;

use anyhow::{Context, Result};
use blocksim_network_memory::RegionTable;
use blocksim_simulation::SimulationRunner;

/// Generate a network from `config` and build a runner on it.
pub fn build_runner(config: &SimulatorConfig, seed: u64) -> Result<SimulationRunner> {
    SimulationRunner::generate(
        config.simulation_config(),
        &config.network,
        RegionTable::fitted_2022(),
        seed,
    )
    .context("Invalid simulation configuration")
}
