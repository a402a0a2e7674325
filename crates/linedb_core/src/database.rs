//! LineDb facade.

use crate::backup::{BackupManager, BackupMetadata, BackupOptions};
use crate::cache::RecordCache;
use crate::collection::CollectionStore;
use crate::config::{CollectionConfig, LineDbConfig};
use crate::crypto::{AesGcmCipher, Cipher};
use crate::dir::DbDir;
use crate::error::{CoreError, CoreResult};
use crate::join::{JoinEngine, JoinOptions};
use crate::lock::LockTable;
use crate::manifest::ManifestStore;
use crate::partition::PartitionRouter;
use crate::record::Record;
use crate::transaction::{CommitReport, TransactionManager};
use crate::types::TransactionId;
use linedb_storage::{Adapter, FileAdapter, MemoryAdapter};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// The main store handle.
///
/// `LineDb` is the primary entry point. It owns the cache, lock table, and
/// collection registry - all private to this instance - and delegates to
/// the collection stores, join engine, transaction manager, and backup
/// manager.
///
/// # Opening a store
///
/// ```rust,ignore
/// use linedb_core::{CollectionConfig, LineDb, LineDbConfig, Record};
///
/// let db = LineDb::open(LineDbConfig::new("data/mydb"))?;
/// let users = db.collection(CollectionConfig::new("users"))?;
///
/// let alice = Record::from_value(serde_json::json!({"id": "u1", "name": "Alice"}))?;
/// users.insert(alice)?;
/// assert!(users.read("u1")?.is_some());
/// ```
///
/// # In-memory stores
///
/// For testing, use [`LineDb::open_in_memory`]: same behavior, no files.
pub struct LineDb {
    config: LineDbConfig,
    _dir: Option<DbDir>,
    adapter: Arc<dyn Adapter>,
    cache: Arc<RecordCache>,
    locks: Arc<LockTable>,
    manifest: Arc<ManifestStore>,
    collections: RwLock<HashMap<String, Arc<CollectionStore>>>,
    transactions: TransactionManager,
    backups: BackupManager,
}

impl LineDb {
    /// Opens a file-backed store.
    ///
    /// Acquires an exclusive folder lock: the lock table and cache are
    /// private to one instance, so a second process is refused with
    /// `DatabaseLocked`.
    pub fn open(config: LineDbConfig) -> CoreResult<Self> {
        let dir = DbDir::open(&config.db_folder, config.create_if_missing)?;
        let adapter: Arc<dyn Adapter> = Arc::new(FileAdapter::new());
        Self::build(config, adapter, Some(dir), Arc::new(AesGcmCipher::new()))
    }

    /// Opens an in-memory store. Nothing touches the filesystem.
    pub fn open_in_memory(config: LineDbConfig) -> CoreResult<Self> {
        let adapter: Arc<dyn Adapter> = Arc::new(MemoryAdapter::new());
        Self::build(config, adapter, None, Arc::new(AesGcmCipher::new()))
    }

    /// Opens a store over a caller-supplied adapter and cipher.
    ///
    /// No folder lock is taken - the adapter's storage semantics are the
    /// caller's business.
    pub fn open_with_adapter(
        config: LineDbConfig,
        adapter: Arc<dyn Adapter>,
        cipher: Arc<dyn Cipher>,
    ) -> CoreResult<Self> {
        Self::build(config, adapter, None, cipher)
    }

    fn build(
        config: LineDbConfig,
        adapter: Arc<dyn Adapter>,
        dir: Option<DbDir>,
        cipher: Arc<dyn Cipher>,
    ) -> CoreResult<Self> {
        let router = PartitionRouter::new(&config.db_folder);
        let cache = Arc::new(RecordCache::new(config.cache_capacity, config.cache_ttl));
        let locks = Arc::new(LockTable::new(config.lock_timeout));
        let manifest = Arc::new(ManifestStore::load(adapter.clone(), &config.db_folder)?);

        let transactions = TransactionManager::new(locks.clone());
        let backups = BackupManager::new(
            adapter.clone(),
            router,
            locks.clone(),
            manifest.clone(),
            cache.clone(),
            cipher,
        );

        Ok(Self {
            config,
            _dir: dir,
            adapter,
            cache,
            locks,
            manifest,
            collections: RwLock::new(HashMap::new()),
            transactions,
            backups,
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &LineDbConfig {
        &self.config
    }

    /// Registers a collection (or returns the already-registered store for
    /// its name).
    pub fn collection(&self, config: CollectionConfig) -> CoreResult<Arc<CollectionStore>> {
        if let Some(existing) = self.collections.read().get(&config.name) {
            return Ok(existing.clone());
        }

        self.manifest.ensure_collection(&config.name)?;
        let store = Arc::new(CollectionStore::new(
            config,
            PartitionRouter::new(&self.config.db_folder),
            self.adapter.clone(),
            self.cache.clone(),
            self.locks.clone(),
            self.manifest.clone(),
        ));
        let mut map = self.collections.write();
        let entry = map
            .entry(store.name().to_string())
            .or_insert_with(|| store.clone());
        Ok(entry.clone())
    }

    /// Returns a registered collection by name.
    ///
    /// # Errors
    ///
    /// Fails with `CollectionNotFound` if the name was never registered.
    pub fn get_collection(&self, name: &str) -> CoreResult<Arc<CollectionStore>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::collection_not_found(name))
    }

    /// Returns the registered collection names, in no particular order.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Joins two collections.
    ///
    /// Snapshots are taken per collection without nesting locks. With a
    /// transaction scope in `options`, both snapshots go through that
    /// transaction's held locks and include its uncommitted state.
    pub fn join(&self, left: &str, right: &str, options: &JoinOptions) -> CoreResult<Vec<Record>> {
        options.validate()?;
        let left_store = self.get_collection(left)?;
        let right_store = self.get_collection(right)?;

        let (left_snapshot, right_snapshot) = match options.transaction {
            Some(tx) => (
                self.transactions.snapshot(tx, &left_store)?,
                self.transactions.snapshot(tx, &right_store)?,
            ),
            None => (
                left_store.read_all(None)?,
                right_store.read_all(None)?,
            ),
        };
        JoinEngine::join(&left_snapshot, &right_snapshot, options)
    }

    /// Begins a transaction.
    pub fn begin(&self) -> TransactionId {
        self.transactions.begin()
    }

    /// Buffers an insert in a transaction. Returns the record with its
    /// resolved id.
    pub fn tx_insert(
        &self,
        tx: TransactionId,
        collection: &str,
        record: Record,
    ) -> CoreResult<Record> {
        let store = self.get_collection(collection)?;
        self.transactions.insert(tx, &store, record)
    }

    /// Buffers an update in a transaction. Returns the merged preview.
    pub fn tx_update(
        &self,
        tx: TransactionId,
        collection: &str,
        id: &str,
        patch: &Record,
    ) -> CoreResult<Record> {
        let store = self.get_collection(collection)?;
        self.transactions.update(tx, &store, id, patch)
    }

    /// Buffers a delete in a transaction.
    pub fn tx_delete(&self, tx: TransactionId, collection: &str, id: &str) -> CoreResult<Record> {
        let store = self.get_collection(collection)?;
        self.transactions.delete(tx, &store, id)
    }

    /// Reads a record as the transaction sees it (uncommitted state
    /// included).
    pub fn tx_read(
        &self,
        tx: TransactionId,
        collection: &str,
        id: &str,
    ) -> CoreResult<Option<Record>> {
        let store = self.get_collection(collection)?;
        self.transactions.get(tx, &store, id)
    }

    /// Reads a whole collection as the transaction sees it.
    pub fn tx_read_all(&self, tx: TransactionId, collection: &str) -> CoreResult<Vec<Record>> {
        let store = self.get_collection(collection)?;
        self.transactions.snapshot(tx, &store)
    }

    /// Commits a transaction, returning the structured per-operation
    /// result.
    pub fn commit(&self, tx: TransactionId) -> CoreResult<CommitReport> {
        self.transactions.commit(tx, |name| self.get_collection(name))
    }

    /// Rolls back a transaction, discarding its buffered mutations.
    pub fn rollback(&self, tx: TransactionId) -> CoreResult<()> {
        self.transactions.rollback(tx)
    }

    /// Captures the named collections into artifact bytes.
    pub fn backup(&self, collections: &[&str], options: &BackupOptions) -> CoreResult<Vec<u8>> {
        self.backups.backup(collections, options)
    }

    /// Restores an artifact into this store, rewriting partition files.
    pub fn restore(
        &self,
        artifact: &[u8],
        encrypt_key: Option<&str>,
    ) -> CoreResult<BackupMetadata> {
        self.backups.restore(artifact, encrypt_key)
    }

    /// Reads an artifact's metadata without restoring it.
    pub fn backup_metadata(
        &self,
        artifact: &[u8],
        encrypt_key: Option<&str>,
    ) -> CoreResult<BackupMetadata> {
        self.backups.read_metadata(artifact, encrypt_key)
    }
}

impl std::fmt::Debug for LineDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineDb")
            .field("db_folder", &self.config.db_folder)
            .field("collections", &self.collection_names())
            .field("active_transactions", &self.transactions.active_count())
            .finish_non_exhaustive()
    }
}
