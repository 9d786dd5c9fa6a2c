//! Per-node propagation state machine.
//!
//! This crate models one peer of a proof-of-work network: its chain view
//! (best block, orphans, in-flight downloads), its mempool, its upload slot,
//! and the propagation protocol it runs. Nodes never call each other; every
//! interaction is a [`Task`](blocksim_core::Task) scheduled through the
//! [`NodeContext`] the runner hands to each handler.

mod adversary;
mod config;
mod context;
mod protocol;
mod send_queue;
mod state;

pub use adversary::{AdversarialState, Routing};
pub use config::{AdversarialDelay, AdversaryConfig, ReconstructionModel, RelayConfig};
pub use context::{NodeContext, PeerDirectory, PeerInfo, RelayCounters};
pub use protocol::{
    rank_high_bandwidth_peers, Advertisement, CompactBlockRelay, Fanout, Fluffy, Hybrid,
    ParallelFetch, PropagationProtocol, ProtocolKind, Push, RelayStrategy, SendConcurrency,
};
pub use send_queue::SendQueue;
pub use state::{BlockRelation, Node};
