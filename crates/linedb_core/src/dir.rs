//! Database folder management.
//!
//! ```text
//! <db_folder>/
//! ├─ MANIFEST             # Collection/partition registry
//! ├─ LOCK                 # Advisory lock, one process at a time
//! ├─ users                # Unpartitioned collection
//! └─ orders.2024          # Partition "2024" of collection "orders"
//! ```
//!
//! The LOCK file ensures the lock table and cache stay private to one
//! process: multi-process coordination is out of scope, so a second
//! instance on the same folder is refused outright.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// Holds the database folder and its advisory lock.
///
/// The lock is released when the `DbDir` is dropped.
#[derive(Debug)]
pub struct DbDir {
    path: PathBuf,
    _lock_file: File,
}

impl DbDir {
    /// Opens or creates a database folder and acquires its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The folder doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (`DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::configuration(format!(
                    "database folder does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::configuration(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the folder path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
