//! Collection store: CRUD over one collection's partitions.
//!
//! Every mutating call follows the same shape: acquire the writer lock,
//! read the current partition file, apply the change, write the full file
//! back through the adapter, invalidate the affected cache entries, release
//! the lock. Partition rewrites are whole-file by design - the line-file
//! model keeps rewrite simple and readers never see a torn file.

use crate::cache::{CacheKey, CacheValue, RecordCache};
use crate::config::CollectionConfig;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockTable;
use crate::manifest::ManifestStore;
use crate::partition::PartitionRouter;
use crate::record::{decode_lines, encode_lines, Record};
use linedb_storage::Adapter;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Query signature for an unfiltered full scan.
const SCAN_SIGNATURE: &str = "scan";

/// Attempts before giving up on a colliding id generator.
const MAX_ID_ATTEMPTS: usize = 16;

/// CRUD over one collection's partitions.
///
/// Uses the Adapter for I/O, the [`RecordCache`] for speed, and the
/// [`LockTable`] for safety. All four collaborators are owned by the
/// `LineDb` instance and shared by reference.
pub struct CollectionStore {
    config: CollectionConfig,
    router: PartitionRouter,
    adapter: Arc<dyn Adapter>,
    cache: Arc<RecordCache>,
    locks: Arc<LockTable>,
    manifest: Arc<ManifestStore>,
}

impl CollectionStore {
    pub(crate) fn new(
        config: CollectionConfig,
        router: PartitionRouter,
        adapter: Arc<dyn Adapter>,
        cache: Arc<RecordCache>,
        locks: Arc<LockTable>,
        manifest: Arc<ManifestStore>,
    ) -> Self {
        Self {
            config,
            router,
            adapter,
            cache,
            locks,
            manifest,
        }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the collection configuration.
    #[must_use]
    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    fn id_field(&self) -> &str {
        &self.config.id_field
    }

    /// Partitions to enumerate, in fixed lexical order.
    ///
    /// An unpartitioned collection is a single `None` partition.
    pub(crate) fn partitions(&self) -> Vec<Option<String>> {
        match self.config.partition_rule {
            None => vec![None],
            Some(_) => self
                .manifest
                .partitions(self.name())
                .into_iter()
                .map(Some)
                .collect(),
        }
    }

    fn resolve_partition(&self, record: &Record) -> CoreResult<Option<String>> {
        match &self.config.partition_rule {
            None => Ok(None),
            Some(rule) => self.router.resolve(record, rule).map(Some),
        }
    }

    fn load(&self, partition: Option<&str>) -> CoreResult<Vec<Record>> {
        let path = self.router.path_for(self.name(), partition);
        match self.adapter.read(&path)? {
            Some(text) => decode_lines(&text),
            None => Ok(Vec::new()),
        }
    }

    fn store(&self, partition: Option<&str>, records: &[Record]) -> CoreResult<()> {
        let path = self.router.path_for(self.name(), partition);
        let text = encode_lines(records)?;
        self.adapter.write(&path, &text)?;
        Ok(())
    }

    fn matches_id(&self, record: &Record, id: &str) -> bool {
        record.id_string(self.id_field()).as_deref() == Some(id)
    }

    /// Reads a record by id.
    ///
    /// Tries the cache first (subject to TTL); on a miss, scans partitions
    /// in lexical order under their reader locks and populates the cache
    /// before releasing the lock of the partition that held the record.
    pub fn read(&self, id: &str) -> CoreResult<Option<Record>> {
        self.read_inner(id, true, true)
    }

    /// Read variant for callers already holding the collection-exclusive
    /// lock (transactions). Bypasses both locks and cache.
    pub(crate) fn read_unlocked(&self, id: &str) -> CoreResult<Option<Record>> {
        self.read_inner(id, false, false)
    }

    fn read_inner(&self, id: &str, take_locks: bool, use_cache: bool) -> CoreResult<Option<Record>> {
        let key = CacheKey::record(self.name(), id);
        if use_cache {
            if let Some(CacheValue::Record(record)) = self.cache.get(&key) {
                return Ok(Some(record));
            }
        }

        for partition in self.partitions() {
            let _guard = if take_locks {
                Some(self.locks.read(self.name(), partition.as_deref())?)
            } else {
                None
            };
            let records = self.load(partition.as_deref())?;
            if let Some(record) = records.into_iter().find(|r| self.matches_id(r, id)) {
                if use_cache {
                    self.cache.put(key, CacheValue::Record(record.clone()));
                }
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Reads every record, optionally filtered.
    ///
    /// Ordering is file line order per partition, partitions enumerated in
    /// lexical order - not a global temporal order. Unfiltered scans are
    /// cached under a query signature.
    pub fn read_all(&self, filter: Option<&dyn Fn(&Record) -> bool>) -> CoreResult<Vec<Record>> {
        self.read_all_inner(filter, true, true)
    }

    /// Full-scan variant for callers holding the collection-exclusive lock.
    pub(crate) fn read_all_unlocked(&self) -> CoreResult<Vec<Record>> {
        self.read_all_inner(None, false, false)
    }

    fn read_all_inner(
        &self,
        filter: Option<&dyn Fn(&Record) -> bool>,
        take_locks: bool,
        use_cache: bool,
    ) -> CoreResult<Vec<Record>> {
        let cacheable = filter.is_none() && use_cache;
        let key = CacheKey::query(self.name(), SCAN_SIGNATURE);
        if cacheable {
            if let Some(CacheValue::Records(records)) = self.cache.get(&key) {
                return Ok(records);
            }
        }

        let mut out = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for partition in self.partitions() {
            let _guard = if take_locks {
                Some(self.locks.read(self.name(), partition.as_deref())?)
            } else {
                None
            };
            for record in self.load(partition.as_deref())? {
                if let Some(id) = record.id_string(self.id_field()) {
                    if !seen.insert(id.clone()) {
                        // Detected, not repaired: the raw file contents are
                        // returned as-is so the caller can see the conflict.
                        warn!(
                            collection = self.name(),
                            id = %id,
                            "duplicate record id observed; partition rule may not be deterministic"
                        );
                    }
                }
                if filter.map_or(true, |f| f(&record)) {
                    out.push(record);
                }
            }
        }

        if cacheable {
            self.cache.put(key, CacheValue::Records(out.clone()));
        }
        Ok(out)
    }

    /// Inserts a record.
    ///
    /// If the record has no id, the collection's id rule generates one,
    /// collision-checked against the cache and the partition file. An
    /// explicit id that already exists fails with `DuplicateId`.
    ///
    /// Returns the record as stored (with its id).
    pub fn insert(&self, record: Record) -> CoreResult<Record> {
        self.insert_inner(record, true)
    }

    /// Insert variant for callers holding the collection-exclusive lock.
    pub(crate) fn insert_unlocked(&self, record: Record) -> CoreResult<Record> {
        self.insert_inner(record, false)
    }

    fn insert_inner(&self, mut record: Record, take_locks: bool) -> CoreResult<Record> {
        if record.contains(self.id_field()) {
            let id = record.id_string(self.id_field()).ok_or_else(|| {
                CoreError::configuration(format!(
                    "id field {:?} must hold a scalar value",
                    self.id_field()
                ))
            })?;
            if self.cache.get(&CacheKey::record(self.name(), &id)).is_some() {
                return Err(CoreError::duplicate_id(self.name(), id));
            }
            return self.insert_record(record, &id, take_locks);
        }

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.config.id_rule.generate(&record);
            if self.cache.get(&CacheKey::record(self.name(), &id)).is_some() {
                continue;
            }
            record.set(self.id_field().to_string(), Value::String(id.clone()));
            match self.insert_record(record.clone(), &id, take_locks) {
                Err(CoreError::DuplicateId { .. }) => continue,
                other => return other,
            }
        }
        Err(CoreError::configuration(
            "id rule failed to produce a unique id",
        ))
    }

    fn insert_record(&self, record: Record, id: &str, take_locks: bool) -> CoreResult<Record> {
        let partition = self.resolve_partition(&record)?;
        let _guard = if take_locks {
            Some(self.locks.write(self.name(), partition.as_deref())?)
        } else {
            None
        };

        let mut records = self.load(partition.as_deref())?;
        if records.iter().any(|r| self.matches_id(r, id)) {
            return Err(CoreError::duplicate_id(self.name(), id));
        }
        records.push(record.clone());

        if let Some(pid) = partition.as_deref() {
            self.manifest.ensure_partition(self.name(), pid)?;
        }
        self.store(partition.as_deref(), &records)?;

        self.cache.invalidate_queries(self.name());
        self.cache
            .put(CacheKey::record(self.name(), id), CacheValue::Record(record.clone()));
        debug!(collection = self.name(), id = %id, "inserted record");
        Ok(record)
    }

    /// Updates a record by merging `patch` into it.
    ///
    /// Read-modify-write under the partition's writer lock. Fails with
    /// `RecordNotFound` if the id is absent, and rejects patches that would
    /// change the id field. Returns the updated record.
    pub fn update(&self, id: &str, patch: &Record) -> CoreResult<Record> {
        self.update_inner(id, patch, true)
    }

    /// Update variant for callers holding the collection-exclusive lock.
    pub(crate) fn update_unlocked(&self, id: &str, patch: &Record) -> CoreResult<Record> {
        self.update_inner(id, patch, false)
    }

    fn update_inner(&self, id: &str, patch: &Record, take_locks: bool) -> CoreResult<Record> {
        if let Some(patched_id) = patch.id_string(self.id_field()) {
            if patched_id != id {
                return Err(CoreError::invalid_operation(
                    "update may not change the id field",
                ));
            }
        }

        for partition in self.partitions() {
            let _guard = if take_locks {
                Some(self.locks.write(self.name(), partition.as_deref())?)
            } else {
                None
            };
            let mut records = self.load(partition.as_deref())?;
            let Some(pos) = records.iter().position(|r| self.matches_id(r, id)) else {
                continue;
            };

            records[pos].merge(patch);
            let updated = records[pos].clone();
            self.warn_on_routing_drift(&updated, partition.as_deref());
            self.store(partition.as_deref(), &records)?;

            self.cache.invalidate_queries(self.name());
            self.cache
                .put(CacheKey::record(self.name(), id), CacheValue::Record(updated.clone()));
            debug!(collection = self.name(), id = %id, "updated record");
            return Ok(updated);
        }
        Err(CoreError::record_not_found(self.name(), id))
    }

    /// Deletes a record, rewriting its partition file in full.
    ///
    /// Fails with `RecordNotFound` if the id is absent. Returns the
    /// removed record.
    pub fn delete(&self, id: &str) -> CoreResult<Record> {
        self.delete_inner(id, true)
    }

    /// Delete variant for callers holding the collection-exclusive lock.
    pub(crate) fn delete_unlocked(&self, id: &str) -> CoreResult<Record> {
        self.delete_inner(id, false)
    }

    fn delete_inner(&self, id: &str, take_locks: bool) -> CoreResult<Record> {
        for partition in self.partitions() {
            let _guard = if take_locks {
                Some(self.locks.write(self.name(), partition.as_deref())?)
            } else {
                None
            };
            let mut records = self.load(partition.as_deref())?;
            let Some(pos) = records.iter().position(|r| self.matches_id(r, id)) else {
                continue;
            };

            let removed = records.remove(pos);
            self.store(partition.as_deref(), &records)?;

            self.cache.invalidate(&CacheKey::record(self.name(), id));
            self.cache.invalidate_queries(self.name());
            debug!(collection = self.name(), id = %id, "deleted record");
            return Ok(removed);
        }
        Err(CoreError::record_not_found(self.name(), id))
    }

    fn warn_on_routing_drift(&self, updated: &Record, current: Option<&str>) {
        if self.config.partition_rule.is_none() {
            return;
        }
        match self.resolve_partition(updated) {
            Ok(target) if target.as_deref() != current => warn!(
                collection = self.name(),
                current = current.unwrap_or(""),
                target = target.as_deref().unwrap_or(""),
                "updated record no longer routes to its partition; it stays in place"
            ),
            Err(_) => warn!(
                collection = self.name(),
                "updated record's routing field no longer resolves; it stays in place"
            ),
            Ok(_) => {}
        }
    }
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("name", &self.config.name)
            .field("id_field", &self.config.id_field)
            .field("partitioned", &self.config.partition_rule.is_some())
            .finish_non_exhaustive()
    }
}
