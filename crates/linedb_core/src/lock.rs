//! Reader/writer lock table.
//!
//! Two-level locks owned by one store instance:
//!
//! - Each **collection** has an outer `RwLock`. Plain operations hold it
//!   shared; a transaction holds it exclusive for its whole lifetime, which
//!   serializes the collection.
//! - Each **(collection, partition)** has an inner `RwLock`. Readers hold
//!   it shared and run concurrently; a writer holds it exclusive and
//!   excludes all readers and other writers on that partition.
//!
//! parking_lot's task-fair queueing orders contending writers FIFO and
//! prevents both reader and writer starvation. With a configured timeout,
//! an acquisition that waits longer fails with `LockTimeout` instead of
//! blocking forever.

use crate::error::{CoreError, CoreResult};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type Shared = Arc<RwLock<()>>;
type ArcReadGuard = ArcRwLockReadGuard<RawRwLock, ()>;
type ArcWriteGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Shared (reader) hold on one partition.
///
/// Holds the collection lock shared and the partition lock shared.
pub struct PartitionReadGuard {
    _partition: ArcReadGuard,
    _collection: ArcReadGuard,
}

/// Exclusive (writer) hold on one partition.
///
/// Holds the collection lock shared and the partition lock exclusive, so
/// writers on different partitions of the same collection can proceed
/// concurrently while a transaction (collection-exclusive) excludes both.
#[derive(Debug)]
pub struct PartitionWriteGuard {
    _partition: ArcWriteGuard,
    _collection: ArcReadGuard,
}

/// Exclusive hold on a whole collection.
///
/// Taken by transactions on first touch and held until commit or rollback,
/// and by restore while rewriting a collection's partition files.
pub struct CollectionWriteGuard {
    _collection: ArcWriteGuard,
}

/// One reader/writer lock per (collection, partition), owned by the store
/// instance. Never process-global.
pub struct LockTable {
    collections: Mutex<HashMap<String, Shared>>,
    partitions: Mutex<HashMap<(String, Option<String>), Shared>>,
    timeout: Option<Duration>,
}

impl LockTable {
    /// Creates a lock table with an optional acquisition timeout.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            partitions: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Acquires a reader hold on `(collection, partition)`.
    ///
    /// # Errors
    ///
    /// Fails with `LockTimeout` if a timeout is configured and expires.
    pub fn read(
        &self,
        collection: &str,
        partition: Option<&str>,
    ) -> CoreResult<PartitionReadGuard> {
        let coll_lock = self.collection_lock(collection);
        let part_lock = self.partition_lock(collection, partition);

        let _collection = self.acquire_read(&coll_lock, collection, None)?;
        let _partition = self.acquire_read(&part_lock, collection, partition)?;
        Ok(PartitionReadGuard {
            _partition,
            _collection,
        })
    }

    /// Acquires a writer hold on `(collection, partition)`.
    ///
    /// # Errors
    ///
    /// Fails with `LockTimeout` if a timeout is configured and expires.
    pub fn write(
        &self,
        collection: &str,
        partition: Option<&str>,
    ) -> CoreResult<PartitionWriteGuard> {
        let coll_lock = self.collection_lock(collection);
        let part_lock = self.partition_lock(collection, partition);

        let _collection = self.acquire_read(&coll_lock, collection, None)?;
        let _partition = self.acquire_write(&part_lock, collection, partition)?;
        Ok(PartitionWriteGuard {
            _partition,
            _collection,
        })
    }

    /// Acquires an exclusive hold on the whole collection.
    ///
    /// # Errors
    ///
    /// Fails with `LockTimeout` if a timeout is configured and expires.
    pub fn lock_collection(&self, collection: &str) -> CoreResult<CollectionWriteGuard> {
        let coll_lock = self.collection_lock(collection);
        let _collection = self.acquire_write(&coll_lock, collection, None)?;
        Ok(CollectionWriteGuard { _collection })
    }

    fn collection_lock(&self, collection: &str) -> Shared {
        let mut map = self.collections.lock();
        map.entry(collection.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn partition_lock(&self, collection: &str, partition: Option<&str>) -> Shared {
        let key = (collection.to_string(), partition.map(str::to_string));
        let mut map = self.partitions.lock();
        map.entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn acquire_read(
        &self,
        lock: &Shared,
        collection: &str,
        partition: Option<&str>,
    ) -> CoreResult<ArcReadGuard> {
        match self.timeout {
            None => Ok(lock.read_arc()),
            Some(timeout) => lock
                .try_read_arc_for(timeout)
                .ok_or_else(|| CoreError::lock_timeout(collection, partition)),
        }
    }

    fn acquire_write(
        &self,
        lock: &Shared,
        collection: &str,
        partition: Option<&str>,
    ) -> CoreResult<ArcWriteGuard> {
        match self.timeout {
            None => Ok(lock.write_arc()),
            Some(timeout) => lock
                .try_write_arc_for(timeout)
                .ok_or_else(|| CoreError::lock_timeout(collection, partition)),
        }
    }
}

impl std::fmt::Debug for LockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockTable")
            .field("timeout", &self.timeout)
            .field("collections", &self.collections.lock().len())
            .field("partitions", &self.partitions.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed_table() -> LockTable {
        LockTable::new(Some(Duration::from_millis(30)))
    }

    #[test]
    fn readers_run_concurrently() {
        let table = timed_table();
        let _r1 = table.read("users", None).unwrap();
        let _r2 = table.read("users", None).unwrap();
    }

    #[test]
    fn writer_excludes_reader() {
        let table = timed_table();
        let _w = table.write("users", None).unwrap();
        let result = table.read("users", None);
        assert!(matches!(result, Err(CoreError::LockTimeout { .. })));
    }

    #[test]
    fn writer_excludes_writer() {
        let table = timed_table();
        let _w = table.write("users", None).unwrap();
        assert!(table.write("users", None).is_err());
    }

    #[test]
    fn writers_on_different_partitions_coexist() {
        let table = timed_table();
        let _w1 = table.write("users", Some("east")).unwrap();
        let _w2 = table.write("users", Some("west")).unwrap();
    }

    #[test]
    fn writers_on_different_collections_coexist() {
        let table = timed_table();
        let _w1 = table.write("users", None).unwrap();
        let _w2 = table.write("posts", None).unwrap();
    }

    #[test]
    fn collection_lock_excludes_partition_ops() {
        let table = timed_table();
        let _c = table.lock_collection("users").unwrap();
        assert!(table.read("users", Some("east")).is_err());
        assert!(table.write("users", Some("east")).is_err());
    }

    #[test]
    fn partition_writer_blocks_collection_lock() {
        let table = timed_table();
        let _w = table.write("users", Some("east")).unwrap();
        assert!(table.lock_collection("users").is_err());
    }

    #[test]
    fn released_lock_can_be_reacquired() {
        let table = timed_table();
        {
            let _w = table.write("users", None).unwrap();
        }
        assert!(table.write("users", None).is_ok());
    }

    #[test]
    fn timeout_error_names_the_partition() {
        let table = timed_table();
        let _w = table.write("users", Some("east")).unwrap();
        match table.write("users", Some("east")) {
            Err(CoreError::LockTimeout {
                collection,
                partition,
            }) => {
                assert_eq!(collection, "users");
                assert_eq!(partition.as_deref(), Some("east"));
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }
    }

    #[test]
    fn writer_queue_is_fifo() {
        use std::sync::mpsc;
        use std::thread;

        let table = Arc::new(LockTable::new(None));
        let (tx, rx) = mpsc::channel();

        let first = table.write("users", None).unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let table = Arc::clone(&table);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let _w = table.write("users", None).unwrap();
                tx.send(i).unwrap();
            }));
            // Give each thread time to enqueue before spawning the next.
            thread::sleep(Duration::from_millis(20));
        }

        drop(first);
        let order: Vec<_> = (0..4).map(|_| rx.recv().unwrap()).collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
