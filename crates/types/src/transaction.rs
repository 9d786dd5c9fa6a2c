//! Transaction type.

use crate::TxId;
use std::time::Duration;

/// An opaque transaction.
///
/// Content is irrelevant to propagation; only identity matters. Transactions
/// are never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transaction {
    /// Unique identity.
    pub id: TxId,
    /// Simulation time at which the transaction was created.
    pub created_at: Duration,
}

impl Transaction {
    pub fn new(id: TxId, created_at: Duration) -> Self {
        Self { id, created_at }
    }
}
