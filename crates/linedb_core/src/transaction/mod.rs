//! Coarse-grained transactions.
//!
//! A transaction groups operations across collections under held
//! collection-exclusive locks: the first operation touching a collection
//! acquires its lock, and it is held until commit or rollback. The whole
//! collection is serialized for the transaction's lifetime - intentionally
//! coarse, correctness over concurrency.

mod manager;
mod state;

pub use manager::{CommitReport, OpReport, OpStatus, TransactionManager};
pub use state::{PendingOp, Transaction, TransactionState};
