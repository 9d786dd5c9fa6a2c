//! Core types for blocksim.
//!
//! This crate provides the foundational types used throughout the
//! propagation simulator:
//!
//! - **Identifiers**: [`NodeIndex`], [`BlockId`], [`TxId`], [`Region`]
//! - **Chain types**: [`Block`], [`Transaction`]
//! - **Storage**: [`BlockArena`], the append-only block tree every node
//!   shares by identity
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

mod arena;
mod block;
mod identifiers;
mod transaction;

pub use arena::{Ancestors, BlockArena};
pub use block::{Block, Difficulty};
pub use identifiers::{BlockId, NodeIndex, Region, TxId};
pub use transaction::Transaction;
