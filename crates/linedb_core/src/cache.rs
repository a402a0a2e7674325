//! Bounded, TTL-aware record cache.
//!
//! Cache state is soft: it is never authoritative. Writers invalidate the
//! affected entries before releasing their writer lock, so a reader that
//! acquires the lock afterwards observes file contents and cache entries
//! consistently.

use crate::record::Record;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Key of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A single record, addressed by collection and string-coerced id.
    Record {
        /// Collection name.
        collection: String,
        /// String-coerced record id.
        id: String,
    },
    /// A query result, addressed by collection and query signature.
    Query {
        /// Collection name.
        collection: String,
        /// Signature of the query (e.g. `"scan"` for a full scan).
        signature: String,
    },
}

impl CacheKey {
    /// Creates a record key.
    #[must_use]
    pub fn record(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Record {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a query key.
    #[must_use]
    pub fn query(collection: impl Into<String>, signature: impl Into<String>) -> Self {
        Self::Query {
            collection: collection.into(),
            signature: signature.into(),
        }
    }

    /// Returns the collection this key belongs to.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Record { collection, .. } | Self::Query { collection, .. } => collection,
        }
    }

    fn is_query(&self) -> bool {
        matches!(self, Self::Query { .. })
    }
}

/// Value of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// A single record.
    Record(Record),
    /// An ordered query result.
    Records(Vec<Record>),
}

struct CacheSlot {
    value: CacheValue,
    inserted_at: Instant,
    last_used: u64,
}

struct CacheInner {
    entries: HashMap<CacheKey, CacheSlot>,
    tick: u64,
}

/// Bounded key/value cache for single records and query results.
///
/// Two independent eviction triggers:
/// - **TTL**: an entry older than the configured TTL behaves as a miss and
///   is evicted lazily on access. The TTL is measured from insertion and is
///   never refreshed by `get`.
/// - **Capacity**: `put` at capacity evicts the least-recently-used entry.
///
/// Whichever trigger fires first wins.
pub struct RecordCache {
    capacity: usize,
    ttl: Option<Duration>,
    inner: Mutex<CacheInner>,
}

impl RecordCache {
    /// Creates a cache with the given capacity and optional TTL.
    ///
    /// A capacity of zero disables caching entirely.
    #[must_use]
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Returns the stored value for `key`, unless it has expired.
    ///
    /// An expired entry is evicted and reported as a miss.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(slot) => match self.ttl {
                Some(ttl) => slot.inserted_at.elapsed() > ttl,
                None => false,
            },
            None => return None,
        };

        if expired {
            inner.entries.remove(key);
            return None;
        }

        inner.tick += 1;
        let tick = inner.tick;
        let slot = inner.entries.get_mut(key)?;
        slot.last_used = tick;
        Some(slot.value.clone())
    }

    /// Stores `value` under `key`, evicting the LRU entry at capacity.
    pub fn put(&self, key: CacheKey, value: CacheValue) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            if let Some(lru) = inner
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&lru);
            }
        }

        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(
            key,
            CacheSlot {
                value,
                inserted_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    /// Removes the entry for `key`, if present.
    pub fn invalidate(&self, key: &CacheKey) {
        self.inner.lock().entries.remove(key);
    }

    /// Removes every entry belonging to `collection`.
    pub fn invalidate_collection(&self, collection: &str) {
        self.inner
            .lock()
            .entries
            .retain(|key, _| key.collection() != collection);
    }

    /// Removes every query entry belonging to `collection`.
    ///
    /// Called by writers post-commit: a single-record write invalidates its
    /// own record entry plus every query result that might include it.
    pub fn invalidate_queries(&self, collection: &str) {
        self.inner
            .lock()
            .entries
            .retain(|key, _| !(key.is_query() && key.collection() == collection));
    }

    /// Returns the number of live entries (including not-yet-evicted
    /// expired ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the cache has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RecordCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}
