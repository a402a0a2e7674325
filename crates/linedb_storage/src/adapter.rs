//! Adapter trait definition.

use crate::error::AdapterResult;
use std::path::Path;

/// A low-level storage adapter for LineDb.
///
/// Adapters are **opaque text stores** keyed by path. They provide whole-file
/// read and write operations. LineDb owns all file format interpretation -
/// adapters do not understand records, partitions, or collections.
///
/// # Invariants
///
/// - `read` returns `Ok(None)` for a path that has never been written
/// - `read` after `write` returns exactly the text previously written
/// - `write` replaces the full contents; partial writes are never observable
///   through this trait
/// - Adapters must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::MemoryAdapter`] - For testing
/// - [`super::FileAdapter`] - For persistent storage
pub trait Adapter: Send + Sync {
    /// Reads the full text stored at `path`.
    ///
    /// Returns `Ok(None)` if nothing has been stored at `path`. An empty
    /// string and an absent file are distinct results, though LineDb treats
    /// both as an empty partition.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs or the contents are not
    /// valid UTF-8.
    fn read(&self, path: &Path) -> AdapterResult<Option<String>>;

    /// Replaces the contents stored at `path` with `text`.
    ///
    /// Creates the path (including parent directories, where that concept
    /// applies) if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write(&self, path: &Path, text: &str) -> AdapterResult<()>;
}
