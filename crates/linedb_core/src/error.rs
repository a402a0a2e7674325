//! Error types for LineDb core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in LineDb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Adapter (storage collaborator) error.
    #[error("adapter error: {0}")]
    Adapter(#[from] linedb_storage::AdapterError),

    /// A partition line or metadata document failed to parse as JSON.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid partition rule, id rule, or option combination.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// No record with the given id exists in the collection.
    #[error("record not found: {id} in collection {collection}")]
    RecordNotFound {
        /// The collection searched.
        collection: String,
        /// The record id that was not found.
        id: String,
    },

    /// A record with the given id already exists in its partition.
    #[error("duplicate id: {id} in collection {collection}")]
    DuplicateId {
        /// The collection written to.
        collection: String,
        /// The conflicting record id.
        id: String,
    },

    /// The named collection has not been registered.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// The database folder is already open in another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// A lock was not acquired within the configured timeout.
    #[error("lock timeout on collection {collection} (partition {partition:?})")]
    LockTimeout {
        /// The collection whose lock timed out.
        collection: String,
        /// The partition, if the lock was partition-scoped.
        partition: Option<String>,
    },

    /// The cipher collaborator returned an error while encrypting.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// The cipher collaborator returned an error while decrypting.
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// A backup artifact's framing is inconsistent.
    #[error("backup corrupt: {message}")]
    BackupCorrupt {
        /// Description of the corruption.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a record-not-found error.
    pub fn record_not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a duplicate-id error.
    pub fn duplicate_id(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::DuplicateId {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a collection-not-found error.
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    /// Creates a lock-timeout error.
    pub fn lock_timeout(collection: impl Into<String>, partition: Option<&str>) -> Self {
        Self::LockTimeout {
            collection: collection.into(),
            partition: partition.map(str::to_string),
        }
    }

    /// Creates an encryption-failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption-failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a backup-corrupt error.
    pub fn backup_corrupt(message: impl Into<String>) -> Self {
        Self::BackupCorrupt {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
