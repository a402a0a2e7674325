//! In-memory adapter for testing.

use crate::adapter::Adapter;
use crate::error::AdapterResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// An in-memory adapter.
///
/// Stores every path's text in a map. Suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral databases that don't need persistence
///
/// # Thread Safety
///
/// This adapter is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use linedb_storage::{Adapter, MemoryAdapter};
/// use std::path::Path;
///
/// let adapter = MemoryAdapter::new();
/// adapter.write(Path::new("db/users"), "{}\n").unwrap();
/// assert!(adapter.read(Path::new("db/users")).unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    files: RwLock<HashMap<PathBuf, String>>,
}

impl MemoryAdapter {
    /// Creates a new empty in-memory adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the paths currently stored, in sorted order.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.files.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Returns true if `path` has been written.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    /// Removes all stored files.
    pub fn clear(&self) {
        self.files.write().clear();
    }
}

impl Adapter for MemoryAdapter {
    fn read(&self, path: &Path) -> AdapterResult<Option<String>> {
        Ok(self.files.read().get(path).cloned())
    }

    fn write(&self, path: &Path, text: &str) -> AdapterResult<()> {
        self.files
            .write()
            .insert(path.to_path_buf(), text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_empty() {
        let adapter = MemoryAdapter::new();
        assert!(adapter.paths().is_empty());
    }

    #[test]
    fn read_missing_is_none() {
        let adapter = MemoryAdapter::new();
        assert!(adapter.read(Path::new("nope")).unwrap().is_none());
    }

    #[test]
    fn write_then_read_roundtrip() {
        let adapter = MemoryAdapter::new();
        adapter.write(Path::new("db/users"), "a\nb\n").unwrap();
        assert_eq!(
            adapter.read(Path::new("db/users")).unwrap().as_deref(),
            Some("a\nb\n")
        );
    }

    #[test]
    fn write_replaces_contents() {
        let adapter = MemoryAdapter::new();
        adapter.write(Path::new("p"), "old").unwrap();
        adapter.write(Path::new("p"), "new").unwrap();
        assert_eq!(adapter.read(Path::new("p")).unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn paths_are_sorted() {
        let adapter = MemoryAdapter::new();
        adapter.write(Path::new("b"), "").unwrap();
        adapter.write(Path::new("a"), "").unwrap();
        assert_eq!(adapter.paths(), vec![PathBuf::from("a"), PathBuf::from("b")]);
    }

    #[test]
    fn clear_removes_everything() {
        let adapter = MemoryAdapter::new();
        adapter.write(Path::new("p"), "x").unwrap();
        adapter.clear();
        assert!(!adapter.contains(Path::new("p")));
    }
}
