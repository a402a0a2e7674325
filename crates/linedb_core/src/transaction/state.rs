//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::lock::CollectionWriteGuard;
use crate::record::Record;
use crate::types::TransactionId;
use std::collections::HashMap;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

/// One buffered mutation awaiting commit.
#[derive(Debug, Clone)]
pub enum PendingOp {
    /// Insert a record (its id is already resolved).
    Insert {
        /// Target collection.
        collection: String,
        /// String-coerced record id.
        id: String,
        /// The record to insert.
        record: Record,
    },
    /// Merge a patch into an existing record.
    Update {
        /// Target collection.
        collection: String,
        /// String-coerced record id.
        id: String,
        /// Fields to merge.
        patch: Record,
    },
    /// Delete a record.
    Delete {
        /// Target collection.
        collection: String,
        /// String-coerced record id.
        id: String,
    },
}

impl PendingOp {
    /// Returns the collection this operation targets.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Insert { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }

    /// Short human-readable description for commit reports.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Insert { collection, id, .. } => format!("insert {id} into {collection}"),
            Self::Update { collection, id, .. } => format!("update {id} in {collection}"),
            Self::Delete { collection, id } => format!("delete {id} from {collection}"),
        }
    }
}

/// An active transaction: its ordered pending operations and the
/// collection locks it currently holds.
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    ops: Vec<PendingOp>,
    guards: HashMap<String, CollectionWriteGuard>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            ops: Vec::new(),
            guards: HashMap::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the buffered operations in performed order.
    #[must_use]
    pub fn ops(&self) -> &[PendingOp] {
        &self.ops
    }

    /// Returns the number of buffered operations.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if this transaction holds `collection`'s lock.
    #[must_use]
    pub fn holds_lock(&self, collection: &str) -> bool {
        self.guards.contains_key(collection)
    }

    pub(crate) fn push_op(&mut self, op: PendingOp) -> CoreResult<()> {
        self.ensure_active()?;
        self.ops.push(op);
        Ok(())
    }

    pub(crate) fn store_lock(&mut self, collection: &str, guard: CollectionWriteGuard) {
        self.guards.insert(collection.to_string(), guard);
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        self.state = TransactionState::RolledBack;
    }

    pub(crate) fn take_ops(&mut self) -> Vec<PendingOp> {
        std::mem::take(&mut self.ops)
    }

    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::RolledBack => Err(CoreError::invalid_operation(
                "transaction already rolled back",
            )),
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("ops", &self.ops.len())
            .field("locked_collections", &self.guards.len())
            .finish()
    }
}
