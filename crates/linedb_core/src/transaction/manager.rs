//! Transaction manager.

use crate::collection::CollectionStore;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockTable;
use crate::record::Record;
use crate::transaction::state::{PendingOp, Transaction};
use crate::types::TransactionId;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts before giving up on a colliding id generator.
const MAX_ID_ATTEMPTS: usize = 16;

/// Outcome of one buffered operation at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpStatus {
    /// The operation was flushed to its partition file.
    Committed,
    /// The flush failed; earlier flushed operations remain flushed.
    Failed(String),
    /// Not attempted because an earlier operation failed.
    Skipped,
}

/// Per-operation entry in a commit report.
#[derive(Debug, Clone)]
pub struct OpReport {
    /// Short description of the operation.
    pub operation: String,
    /// Collection the operation targeted.
    pub collection: String,
    /// What happened to it.
    pub status: OpStatus,
}

/// Structured result of a commit.
///
/// There is no cross-partition atomicity: if a flush fails partway, earlier
/// flushed operations remain flushed. The report enumerates exactly which
/// operations committed versus which failed so the caller can compensate -
/// it never claims more than what happened.
#[derive(Debug)]
pub struct CommitReport {
    transaction: TransactionId,
    outcomes: Vec<OpReport>,
}

impl CommitReport {
    /// Returns the committed transaction's id.
    #[must_use]
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    /// Returns the per-operation outcomes in performed order.
    #[must_use]
    pub fn outcomes(&self) -> &[OpReport] {
        &self.outcomes
    }

    /// Returns true if every operation committed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == OpStatus::Committed)
    }

    /// Returns the number of committed operations.
    #[must_use]
    pub fn committed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OpStatus::Committed)
            .count()
    }

    /// Iterates the operations that did not commit.
    pub fn failures(&self) -> impl Iterator<Item = &OpReport> {
        self.outcomes
            .iter()
            .filter(|o| o.status != OpStatus::Committed)
    }
}

/// Groups multiple collection operations under held locks, with
/// commit/rollback.
///
/// Operations tagged with a transaction id acquire their collection's
/// exclusive lock on first touch and hold it until `commit` or `rollback`.
/// Mutations are buffered in performed order and flushed at commit.
pub struct TransactionManager {
    next_txid: AtomicU64,
    active: Mutex<HashMap<u64, Transaction>>,
    locks: Arc<LockTable>,
}

impl TransactionManager {
    /// Creates a transaction manager over the instance's lock table.
    pub(crate) fn new(locks: Arc<LockTable>) -> Self {
        Self {
            next_txid: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
            locks,
        }
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> TransactionId {
        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        self.active.lock().insert(id.as_u64(), Transaction::new(id));
        debug!(%id, "transaction begun");
        id
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Buffers an insert. The record's id is resolved (and generated if
    /// absent) immediately, so the caller gets it back before commit.
    pub fn insert(
        &self,
        id: TransactionId,
        store: &CollectionStore,
        mut record: Record,
    ) -> CoreResult<Record> {
        self.with_txn(id, |mgr, txn| {
            mgr.touch(txn, store)?;
            let id_field = store.config().id_field.clone();

            let rid = if record.contains(&id_field) {
                let rid = record.id_string(&id_field).ok_or_else(|| {
                    CoreError::configuration(format!(
                        "id field {id_field:?} must hold a scalar value"
                    ))
                })?;
                if mgr.effective_get(txn, store, &rid)?.is_some() {
                    return Err(CoreError::duplicate_id(store.name(), rid));
                }
                rid
            } else {
                let rid = mgr.generate_unique_id(txn, store, &record)?;
                record.set(id_field, Value::String(rid.clone()));
                rid
            };

            txn.push_op(PendingOp::Insert {
                collection: store.name().to_string(),
                id: rid,
                record: record.clone(),
            })?;
            Ok(record)
        })
    }

    /// Buffers an update. Returns a preview of the merged record as the
    /// transaction currently sees it.
    pub fn update(
        &self,
        id: TransactionId,
        store: &CollectionStore,
        record_id: &str,
        patch: &Record,
    ) -> CoreResult<Record> {
        self.with_txn(id, |mgr, txn| {
            mgr.touch(txn, store)?;
            if let Some(patched_id) = patch.id_string(&store.config().id_field) {
                if patched_id != record_id {
                    return Err(CoreError::invalid_operation(
                        "update may not change the id field",
                    ));
                }
            }
            let mut base = mgr
                .effective_get(txn, store, record_id)?
                .ok_or_else(|| CoreError::record_not_found(store.name(), record_id))?;
            base.merge(patch);

            txn.push_op(PendingOp::Update {
                collection: store.name().to_string(),
                id: record_id.to_string(),
                patch: patch.clone(),
            })?;
            Ok(base)
        })
    }

    /// Buffers a delete. Returns the record as the transaction saw it.
    pub fn delete(
        &self,
        id: TransactionId,
        store: &CollectionStore,
        record_id: &str,
    ) -> CoreResult<Record> {
        self.with_txn(id, |mgr, txn| {
            mgr.touch(txn, store)?;
            let base = mgr
                .effective_get(txn, store, record_id)?
                .ok_or_else(|| CoreError::record_not_found(store.name(), record_id))?;

            txn.push_op(PendingOp::Delete {
                collection: store.name().to_string(),
                id: record_id.to_string(),
            })?;
            Ok(base)
        })
    }

    /// Reads a record as the transaction sees it: file state with the
    /// transaction's buffered mutations applied on top.
    pub fn get(
        &self,
        id: TransactionId,
        store: &CollectionStore,
        record_id: &str,
    ) -> CoreResult<Option<Record>> {
        self.with_txn(id, |mgr, txn| {
            mgr.touch(txn, store)?;
            mgr.effective_get(txn, store, record_id)
        })
    }

    /// Materializes a collection snapshot through the transaction's held
    /// lock, including its uncommitted state. Used by joins scoped to a
    /// transaction.
    pub fn snapshot(
        &self,
        id: TransactionId,
        store: &CollectionStore,
    ) -> CoreResult<Vec<Record>> {
        self.with_txn(id, |mgr, txn| {
            mgr.touch(txn, store)?;
            let id_field = store.config().id_field.clone();
            let mut records = store.read_all_unlocked()?;

            for op in txn.ops().iter().filter(|o| o.collection() == store.name()) {
                match op {
                    PendingOp::Insert { record, .. } => records.push(record.clone()),
                    PendingOp::Update { id, patch, .. } => {
                        if let Some(r) = records
                            .iter_mut()
                            .find(|r| r.id_string(&id_field).as_deref() == Some(id))
                        {
                            r.merge(patch);
                        }
                    }
                    PendingOp::Delete { id, .. } => {
                        records.retain(|r| r.id_string(&id_field).as_deref() != Some(id));
                    }
                }
            }
            Ok(records)
        })
    }

    /// Commits: flushes buffered operations in performed order, then
    /// releases the held locks.
    ///
    /// Cache invalidation happens per flushed operation, before the locks
    /// are released.
    pub fn commit(
        &self,
        id: TransactionId,
        resolve: impl Fn(&str) -> CoreResult<Arc<CollectionStore>>,
    ) -> CoreResult<CommitReport> {
        let mut txn = self.take(id)?;
        let ops = txn.take_ops();
        let mut outcomes = Vec::with_capacity(ops.len());
        let mut failed = false;

        for op in ops {
            let operation = op.describe();
            let collection = op.collection().to_string();

            if failed {
                outcomes.push(OpReport {
                    operation,
                    collection,
                    status: OpStatus::Skipped,
                });
                continue;
            }

            let result = resolve(&collection).and_then(|store| match &op {
                PendingOp::Insert { record, .. } => {
                    store.insert_unlocked(record.clone()).map(|_| ())
                }
                PendingOp::Update { id, patch, .. } => {
                    store.update_unlocked(id, patch).map(|_| ())
                }
                PendingOp::Delete { id, .. } => store.delete_unlocked(id).map(|_| ()),
            });

            match result {
                Ok(()) => outcomes.push(OpReport {
                    operation,
                    collection,
                    status: OpStatus::Committed,
                }),
                Err(err) => {
                    failed = true;
                    warn!(%id, operation = %operation, error = %err, "commit flush failed; remaining operations skipped");
                    outcomes.push(OpReport {
                        operation,
                        collection,
                        status: OpStatus::Failed(err.to_string()),
                    });
                }
            }
        }

        txn.mark_committed();
        drop(txn); // releases the held collection locks
        debug!(%id, "transaction committed");
        Ok(CommitReport {
            transaction: id,
            outcomes,
        })
    }

    /// Rolls back: discards buffered mutations and releases the held
    /// locks. Anything already flushed by a prior partial commit is not
    /// undone.
    pub fn rollback(&self, id: TransactionId) -> CoreResult<()> {
        let mut txn = self.take(id)?;
        txn.mark_rolled_back();
        drop(txn);
        debug!(%id, "transaction rolled back");
        Ok(())
    }

    /// Removes the transaction from the active table. The map mutex is
    /// never held while blocking on collection locks, so concurrent
    /// transactions cannot deadlock through the manager itself.
    fn take(&self, id: TransactionId) -> CoreResult<Transaction> {
        self.active
            .lock()
            .remove(&id.as_u64())
            .ok_or_else(|| CoreError::invalid_operation(format!("unknown or finished transaction {id}")))
    }

    fn with_txn<T>(
        &self,
        id: TransactionId,
        f: impl FnOnce(&Self, &mut Transaction) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut txn = self.take(id)?;
        let result = f(self, &mut txn);
        self.active.lock().insert(id.as_u64(), txn);
        result
    }

    /// Acquires the collection's exclusive lock on first touch.
    fn touch(&self, txn: &mut Transaction, store: &CollectionStore) -> CoreResult<()> {
        if !txn.holds_lock(store.name()) {
            let guard = self.locks.lock_collection(store.name())?;
            txn.store_lock(store.name(), guard);
            debug!(id = %txn.id(), collection = store.name(), "transaction locked collection");
        }
        Ok(())
    }

    /// File state with the transaction's buffered ops replayed on top.
    fn effective_get(
        &self,
        txn: &Transaction,
        store: &CollectionStore,
        record_id: &str,
    ) -> CoreResult<Option<Record>> {
        let mut base = store.read_unlocked(record_id)?;

        for op in txn.ops().iter().filter(|o| o.collection() == store.name()) {
            match op {
                PendingOp::Insert { id, record, .. } => {
                    if id == record_id {
                        base = Some(record.clone());
                    }
                }
                PendingOp::Update { id, patch, .. } => {
                    if id == record_id {
                        if let Some(ref mut r) = base {
                            r.merge(patch);
                        }
                    }
                }
                PendingOp::Delete { id, .. } => {
                    if id == record_id {
                        base = None;
                    }
                }
            }
        }
        Ok(base)
    }

    fn generate_unique_id(
        &self,
        txn: &Transaction,
        store: &CollectionStore,
        record: &Record,
    ) -> CoreResult<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = store.config().id_rule.generate(record);
            if self.effective_get(txn, store, &candidate)?.is_none() {
                return Ok(candidate);
            }
        }
        Err(CoreError::configuration(
            "id rule failed to produce a unique id",
        ))
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}
