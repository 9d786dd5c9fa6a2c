//! Core types for the blocksim discrete-event kernel.
//!
//! This crate provides the foundational pieces every other crate builds on:
//!
//! - [`Task`] / [`TaskKind`]: every event the simulation can schedule
//! - [`Scheduler`]: the future event list, owning simulated time
//! - [`MiningAdmission`]: bounds concurrent minting tasks per parent block
//! - [`Topology`], [`LinkModel`], [`ChainRules`]: collaborator interfaces
//! - [`ProofOfWork`]: the chain rules used by the simulator
//! - [`ObservationLedger`]: first-observation notifications for reporting
//!
//! # Architecture
//!
//! ```text
//! Scheduler::advance() → Task → runner dispatch → Node handler
//!        ▲                                            │
//!        └──────────── Scheduler::schedule(Task) ◄────┘
//! ```
//!
//! Everything runs on one logical timeline:
//! - **Sequential**: one task runs to completion at a time
//! - **Deterministic**: equal-time tasks run in insertion order
//! - **No blocking**: all waiting is a future task (timeout, delayed send)

mod admission;
mod error;
mod observation;
mod pow;
mod scheduler;
mod task;
mod traits;

pub use admission::MiningAdmission;
pub use error::ConfigError;
pub use observation::{BlockObservation, ObservationLedger};
pub use pow::ProofOfWork;
pub use scheduler::{Scheduler, TaskKey};
pub use task::{
    delivery_interval, BlockSendKind, DelayedSend, OutboundBlock, Task, TaskClass, TaskKind,
};
pub use traits::{ChainRules, LinkModel, Topology};
