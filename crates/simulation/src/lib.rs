//! Deterministic simulation runner.
//!
//! This crate wires nodes, the scheduler and the collaborator models into one
//! runnable network. Given the same configuration, topology and seed, it
//! produces identical results every run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulationRunner                       │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Scheduler (BTreeMap<TaskKey, Task>)            │ │
//! │  │     Ordered by: time, insertion sequence           │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     nodes: Vec<Node>                               │ │
//! │  │     Each handles its tasks through a NodeContext   │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Follow-up tasks → Scheduler                    │ │
//! │  │     Minted blocks → BlockArena                     │ │
//! │  │     First observations → ObservationLedger         │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod config;
mod report;
mod runner;
mod stats;

pub use config::{
    MiningAssignment, MiningConfig, MiningDistribution, SimulationConfig, BTC_POOL_SHARES,
    BTC_POOL_SHARES_WITH_UNKNOWN,
};
pub use report::{PropagationBucket, PropagationCurve, PropagationSummary, RunReport};
pub use runner::SimulationRunner;
pub use stats::SimulationStats;

pub use blocksim_core::{ConfigError, TaskClass};
pub use blocksim_node::{AdversarialDelay, AdversaryConfig, ProtocolKind, RelayConfig};
