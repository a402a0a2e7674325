//! File-based adapter for persistent storage.

use crate::adapter::Adapter;
use crate::error::{AdapterError, AdapterResult};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

/// A file-based adapter.
///
/// Each partition path maps to one regular file. Writes are atomic at the
/// file level: the new contents are written to a sibling temporary file,
/// synced, then renamed over the target, so a crash mid-write never leaves
/// a half-rewritten partition behind.
///
/// # Thread Safety
///
/// The adapter itself holds no state; concurrent access to *different*
/// paths is always safe. LineDb serializes access to the *same* path
/// through its lock table, so the adapter does not lock.
///
/// # Example
///
/// ```no_run
/// use linedb_storage::{Adapter, FileAdapter};
/// use std::path::Path;
///
/// let adapter = FileAdapter::new();
/// adapter.write(Path::new("db/users"), "{\"id\":\"1\"}\n").unwrap();
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct FileAdapter;

impl FileAdapter {
    /// Creates a new file adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Adapter for FileAdapter {
    fn read(&self, path: &Path) -> AdapterResult<Option<String>> {
        match fs::read(path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Ok(Some(text)),
                Err(_) => Err(AdapterError::not_utf8(path)),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AdapterError::io(path, err)),
        }
    }

    fn write(&self, path: &Path, text: &str) -> AdapterResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| AdapterError::io(parent, e))?;
            }
        }

        // Write-then-rename so readers never observe a torn file.
        let tmp_path = match path.file_name() {
            Some(name) => {
                let mut tmp = name.to_os_string();
                tmp.push(".tmp");
                path.with_file_name(tmp)
            }
            None => {
                return Err(AdapterError::io(
                    path,
                    std::io::Error::new(ErrorKind::InvalidInput, "path has no file name"),
                ))
            }
        };

        let mut file = File::create(&tmp_path).map_err(|e| AdapterError::io(&tmp_path, e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| AdapterError::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| AdapterError::io(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, path).map_err(|e| AdapterError::io(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let adapter = FileAdapter::new();

        let result = adapter.read(&dir.path().join("missing")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users");
        let adapter = FileAdapter::new();

        adapter.write(&path, "line one\nline two\n").unwrap();
        let text = adapter.read(&path).unwrap();
        assert_eq!(text.as_deref(), Some("line one\nline two\n"));
    }

    #[test]
    fn write_replaces_previous_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users");
        let adapter = FileAdapter::new();

        adapter.write(&path, "old\n").unwrap();
        adapter.write(&path, "new\n").unwrap();

        assert_eq!(adapter.read(&path).unwrap().as_deref(), Some("new\n"));
    }

    #[test]
    fn write_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("users");
        let adapter = FileAdapter::new();

        adapter.write(&path, "x\n").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn write_empty_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        let adapter = FileAdapter::new();

        adapter.write(&path, "").unwrap();
        assert_eq!(adapter.read(&path).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users");
        let adapter = FileAdapter::new();

        adapter.write(&path, "data\n").unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn non_utf8_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("binary");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let adapter = FileAdapter::new();
        let result = adapter.read(&path);
        assert!(matches!(result, Err(AdapterError::NotUtf8 { .. })));
    }
}
