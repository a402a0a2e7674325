//! Collection and partition registry.
//!
//! The Adapter contract has no directory listing, so the store keeps its
//! own registry of collections and the partition ids it has created. The
//! registry is persisted as a JSON document through the same Adapter that
//! stores partitions, which keeps in-memory databases fully in-memory.

use crate::error::CoreResult;
use linedb_storage::Adapter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the registry document inside the database folder.
pub const MANIFEST_FILE: &str = "MANIFEST";

/// Registry of collections and their known partition ids.
///
/// `BTreeMap`/`BTreeSet` keep enumeration order lexical, which is the fixed
/// partition ordering `read_all` and backup rely on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Collection name to set of known partition ids. An unpartitioned
    /// collection has an empty set.
    pub collections: BTreeMap<String, BTreeSet<String>>,
}

impl Manifest {
    /// Registers a collection. Returns true if it was new.
    pub fn ensure_collection(&mut self, name: &str) -> bool {
        if self.collections.contains_key(name) {
            return false;
        }
        self.collections.insert(name.to_string(), BTreeSet::new());
        true
    }

    /// Registers a partition id for a collection. Returns true if anything
    /// changed.
    pub fn ensure_partition(&mut self, name: &str, partition: &str) -> bool {
        self.collections
            .entry(name.to_string())
            .or_default()
            .insert(partition.to_string())
    }

    /// Returns a collection's partition ids in lexical order.
    #[must_use]
    pub fn partitions(&self, name: &str) -> Vec<String> {
        self.collections
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns all registered collection names in lexical order.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Returns true if the collection is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }
}

/// Shared, persisted manifest handle.
pub struct ManifestStore {
    adapter: Arc<dyn Adapter>,
    path: PathBuf,
    inner: Mutex<Manifest>,
}

impl ManifestStore {
    /// Loads the manifest from the database folder, or starts empty.
    pub fn load(adapter: Arc<dyn Adapter>, db_folder: &Path) -> CoreResult<Self> {
        let path = db_folder.join(MANIFEST_FILE);
        let manifest = match adapter.read(&path)? {
            Some(text) if !text.trim().is_empty() => serde_json::from_str(&text)?,
            _ => Manifest::default(),
        };
        Ok(Self {
            adapter,
            path,
            inner: Mutex::new(manifest),
        })
    }

    /// Registers a collection, persisting the registry if it changed.
    pub fn ensure_collection(&self, name: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.ensure_collection(name) {
            self.persist(&inner)?;
        }
        Ok(())
    }

    /// Registers a partition, persisting the registry if it changed.
    pub fn ensure_partition(&self, name: &str, partition: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.ensure_partition(name, partition) {
            self.persist(&inner)?;
        }
        Ok(())
    }

    /// Returns a collection's partition ids in lexical order.
    #[must_use]
    pub fn partitions(&self, name: &str) -> Vec<String> {
        self.inner.lock().partitions(name)
    }

    /// Returns all registered collection names in lexical order.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.inner.lock().collection_names()
    }

    /// Returns true if the collection is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().contains(name)
    }

    fn persist(&self, manifest: &Manifest) -> CoreResult<()> {
        let text = serde_json::to_string(manifest)?;
        self.adapter.write(&self.path, &text)?;
        Ok(())
    }
}

impl std::fmt::Debug for ManifestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestStore")
            .field("path", &self.path)
            .field("manifest", &*self.inner.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linedb_storage::MemoryAdapter;

    #[test]
    fn ensure_collection_is_idempotent() {
        let mut manifest = Manifest::default();
        assert!(manifest.ensure_collection("users"));
        assert!(!manifest.ensure_collection("users"));
        assert_eq!(manifest.collection_names(), vec!["users"]);
    }

    #[test]
    fn partitions_are_lexically_ordered() {
        let mut manifest = Manifest::default();
        manifest.ensure_partition("users", "west");
        manifest.ensure_partition("users", "east");
        manifest.ensure_partition("users", "north");

        assert_eq!(manifest.partitions("users"), vec!["east", "north", "west"]);
    }

    #[test]
    fn unknown_collection_has_no_partitions() {
        let manifest = Manifest::default();
        assert!(manifest.partitions("nope").is_empty());
    }

    #[test]
    fn store_persists_changes() {
        let adapter = Arc::new(MemoryAdapter::new());
        let folder = Path::new("db");

        {
            let store = ManifestStore::load(adapter.clone(), folder).unwrap();
            store.ensure_collection("users").unwrap();
            store.ensure_partition("orders", "2024").unwrap();
        }

        let reloaded = ManifestStore::load(adapter, folder).unwrap();
        assert!(reloaded.contains("users"));
        assert_eq!(reloaded.partitions("orders"), vec!["2024"]);
    }

    #[test]
    fn load_tolerates_missing_file() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = ManifestStore::load(adapter, Path::new("db")).unwrap();
        assert!(store.collection_names().is_empty());
    }
}
