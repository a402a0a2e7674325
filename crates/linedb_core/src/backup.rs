//! Backup and restore.
//!
//! ## Artifact format
//!
//! ```text
//! metadata line (JSON, newline-terminated)
//! body, per collection:
//!   | name_len (u16 LE) | name | partition_count (u32 LE) |
//!   per partition:
//!     | pid_len (u16 LE) | pid | data_len (u32 LE) | raw partition bytes |
//! ```
//!
//! The body is optionally gzip-compressed (the metadata line stays plain so
//! restore can learn the gzip flag), then the whole artifact is optionally
//! encrypted through the cipher capability. An unpartitioned collection
//! stores its single file with an empty partition id.
//!
//! Capture never holds two locks at once: partitions are read one reader
//! lock at a time, so a backup can never deadlock against writers - though
//! a long capture can make writers wait, which `no_lock` trades away
//! against consistency.

use crate::cache::RecordCache;
use crate::crypto::Cipher;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockTable;
use crate::manifest::ManifestStore;
use crate::partition::PartitionRouter;
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use linedb_storage::Adapter;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Options for one backup capture.
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Gzip-compress the framed body.
    pub gzip: bool,
    /// Encrypt the whole artifact with this key.
    pub encrypt_key: Option<String>,
    /// Skip reader locks during capture, trading consistency for
    /// availability.
    pub no_lock: bool,
}

impl BackupOptions {
    /// Creates default options: no compression, no encryption, with locks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables gzip compression.
    #[must_use]
    pub fn gzip(mut self, value: bool) -> Self {
        self.gzip = value;
        self
    }

    /// Encrypts the artifact with `key`.
    #[must_use]
    pub fn encrypt_key(mut self, key: impl Into<String>) -> Self {
        self.encrypt_key = Some(key.into());
        self
    }

    /// Skips reader locks during capture.
    #[must_use]
    pub fn no_lock(mut self, value: bool) -> Self {
        self.no_lock = value;
        self
    }
}

/// Metadata embedded at the head of every artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Collection names included, in capture order.
    pub collections: Vec<String>,
    /// Whether the body is gzip-compressed.
    pub gzip: bool,
    /// Whether an encryption key was applied.
    pub encrypted: bool,
    /// Whether locks were skipped during capture.
    pub no_lock: bool,
    /// Capture time, Unix milliseconds.
    pub timestamp_ms: u64,
    /// Capture time, human-readable (RFC 3339).
    pub date: String,
}

/// Serializes selected collections into one artifact and restores it.
pub struct BackupManager {
    adapter: Arc<dyn Adapter>,
    router: PartitionRouter,
    locks: Arc<LockTable>,
    manifest: Arc<ManifestStore>,
    cache: Arc<RecordCache>,
    cipher: Arc<dyn Cipher>,
}

impl BackupManager {
    pub(crate) fn new(
        adapter: Arc<dyn Adapter>,
        router: PartitionRouter,
        locks: Arc<LockTable>,
        manifest: Arc<ManifestStore>,
        cache: Arc<RecordCache>,
        cipher: Arc<dyn Cipher>,
    ) -> Self {
        Self {
            adapter,
            router,
            locks,
            manifest,
            cache,
            cipher,
        }
    }

    /// Captures the named collections into artifact bytes.
    ///
    /// # Errors
    ///
    /// Fails with `CollectionNotFound` for an unregistered name,
    /// `LockTimeout` if capture locks time out, and `EncryptionFailed` if
    /// the cipher rejects the key.
    pub fn backup(&self, collections: &[&str], options: &BackupOptions) -> CoreResult<Vec<u8>> {
        for name in collections {
            if !self.manifest.contains(name) {
                return Err(CoreError::collection_not_found(*name));
            }
        }

        let mut body = Vec::new();
        for name in collections {
            self.frame_collection(&mut body, name, options.no_lock)?;
        }

        if options.gzip {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body)?;
            body = encoder.finish()?;
        }

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let metadata = BackupMetadata {
            collections: collections.iter().map(|s| (*s).to_string()).collect(),
            gzip: options.gzip,
            encrypted: options.encrypt_key.is_some(),
            no_lock: options.no_lock,
            timestamp_ms,
            date: Utc::now().to_rfc3339(),
        };

        let mut artifact = serde_json::to_string(&metadata)?.into_bytes();
        artifact.push(b'\n');
        artifact.extend_from_slice(&body);

        if let Some(key) = &options.encrypt_key {
            artifact = self
                .cipher
                .encrypt(&artifact, key)
                .map_err(|e| CoreError::encryption_failed(e.message()))?;
        }

        debug!(
            collections = collections.len(),
            bytes = artifact.len(),
            gzip = options.gzip,
            encrypted = options.encrypt_key.is_some(),
            "backup captured"
        );
        Ok(artifact)
    }

    /// Restores an artifact, rewriting each contained partition file.
    ///
    /// Returns the embedded metadata.
    ///
    /// # Errors
    ///
    /// Fails with `DecryptionFailed` for a wrong key and `BackupCorrupt`
    /// if any length prefix or section boundary is inconsistent with the
    /// remaining bytes.
    pub fn restore(
        &self,
        artifact: &[u8],
        encrypt_key: Option<&str>,
    ) -> CoreResult<BackupMetadata> {
        let (metadata, body) = self.open_artifact(artifact, encrypt_key)?;

        let mut cursor = 0usize;
        while cursor < body.len() {
            let name_bytes = take_prefixed_u16(&body, &mut cursor, "collection name")?;
            let name = String::from_utf8(name_bytes.to_vec())
                .map_err(|_| CoreError::backup_corrupt("collection name is not UTF-8"))?;
            let partition_count = take_u32(&body, &mut cursor, "partition count")?;

            // One collection at a time; the exclusive lock covers all of
            // its partition rewrites.
            let _guard = self.locks.lock_collection(&name)?;
            self.manifest.ensure_collection(&name)?;

            for _ in 0..partition_count {
                let pid_bytes = take_prefixed_u16(&body, &mut cursor, "partition id")?;
                let pid = String::from_utf8(pid_bytes.to_vec())
                    .map_err(|_| CoreError::backup_corrupt("partition id is not UTF-8"))?;
                let data = take_prefixed_u32(&body, &mut cursor, "partition data")?;
                let text = std::str::from_utf8(data)
                    .map_err(|_| CoreError::backup_corrupt("partition data is not UTF-8"))?;

                let partition = if pid.is_empty() { None } else { Some(pid.as_str()) };
                let path = self.router.path_for(&name, partition);
                self.adapter.write(&path, text)?;
                if let Some(pid) = partition {
                    self.manifest.ensure_partition(&name, pid)?;
                }
            }

            self.cache.invalidate_collection(&name);
            debug!(collection = %name, "collection restored");
        }

        Ok(metadata)
    }

    /// Reads an artifact's metadata without unframing the body.
    pub fn read_metadata(
        &self,
        artifact: &[u8],
        encrypt_key: Option<&str>,
    ) -> CoreResult<BackupMetadata> {
        let (metadata, _) = self.open_artifact(artifact, encrypt_key)?;
        Ok(metadata)
    }

    fn frame_collection(&self, body: &mut Vec<u8>, name: &str, no_lock: bool) -> CoreResult<()> {
        if no_lock {
            warn!(collection = name, "backup capturing without locks");
        }

        let pids = self.manifest.partitions(name);
        let partitions: Vec<Option<String>> = if pids.is_empty() {
            vec![None]
        } else {
            pids.into_iter().map(Some).collect()
        };

        let mut sections: Vec<(String, Vec<u8>)> = Vec::new();
        for partition in &partitions {
            // One reader lock at a time, released before the next
            // partition is touched.
            let _guard = if no_lock {
                None
            } else {
                Some(self.locks.read(name, partition.as_deref())?)
            };
            let path = self.router.path_for(name, partition.as_deref());
            if let Some(text) = self.adapter.read(&path)? {
                sections.push((partition.clone().unwrap_or_default(), text.into_bytes()));
            }
        }

        write_u16_prefixed(body, name.as_bytes());
        body.extend_from_slice(&(sections.len() as u32).to_le_bytes());
        for (pid, data) in &sections {
            write_u16_prefixed(body, pid.as_bytes());
            body.extend_from_slice(&(data.len() as u32).to_le_bytes());
            body.extend_from_slice(data);
        }
        Ok(())
    }

    fn open_artifact(
        &self,
        artifact: &[u8],
        encrypt_key: Option<&str>,
    ) -> CoreResult<(BackupMetadata, Vec<u8>)> {
        let plain = match encrypt_key {
            Some(key) => self
                .cipher
                .decrypt(artifact, key)
                .map_err(|e| CoreError::decryption_failed(e.message()))?,
            None => artifact.to_vec(),
        };

        let newline = plain
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| CoreError::backup_corrupt("missing metadata line"))?;
        let metadata: BackupMetadata = serde_json::from_slice(&plain[..newline])
            .map_err(|_| CoreError::backup_corrupt("malformed metadata line"))?;

        let mut body = plain[newline + 1..].to_vec();
        if metadata.gzip {
            let mut decoder = GzDecoder::new(&body[..]);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|_| CoreError::backup_corrupt("gzip body failed to decompress"))?;
            body = decompressed;
        }
        Ok((metadata, body))
    }
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("db_folder", &self.router.db_folder())
            .finish_non_exhaustive()
    }
}

fn write_u16_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn take_u32(body: &[u8], cursor: &mut usize, what: &str) -> CoreResult<u32> {
    if *cursor + 4 > body.len() {
        return Err(CoreError::backup_corrupt(format!("{what} truncated")));
    }
    let value = u32::from_le_bytes([
        body[*cursor],
        body[*cursor + 1],
        body[*cursor + 2],
        body[*cursor + 3],
    ]);
    *cursor += 4;
    Ok(value)
}

fn take_prefixed_u16<'a>(body: &'a [u8], cursor: &mut usize, what: &str) -> CoreResult<&'a [u8]> {
    if *cursor + 2 > body.len() {
        return Err(CoreError::backup_corrupt(format!("{what} length truncated")));
    }
    let len = u16::from_le_bytes([body[*cursor], body[*cursor + 1]]) as usize;
    *cursor += 2;
    if *cursor + len > body.len() {
        return Err(CoreError::backup_corrupt(format!(
            "{what} extends beyond artifact"
        )));
    }
    let slice = &body[*cursor..*cursor + len];
    *cursor += len;
    Ok(slice)
}

fn take_prefixed_u32<'a>(body: &'a [u8], cursor: &mut usize, what: &str) -> CoreResult<&'a [u8]> {
    let len = take_u32(body, cursor, what)? as usize;
    if *cursor + len > body.len() {
        return Err(CoreError::backup_corrupt(format!(
            "{what} extends beyond artifact"
        )));
    }
    let slice = &body[*cursor..*cursor + len];
    *cursor += len;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesGcmCipher;
    use linedb_storage::MemoryAdapter;
    use std::path::Path;

    struct Fixture {
        adapter: Arc<MemoryAdapter>,
        manifest: Arc<ManifestStore>,
        manager: BackupManager,
    }

    impl Fixture {
        fn new() -> Self {
            let adapter = Arc::new(MemoryAdapter::new());
            let manifest =
                Arc::new(ManifestStore::load(adapter.clone(), Path::new("db")).unwrap());
            let manager = BackupManager::new(
                adapter.clone(),
                PartitionRouter::new("db"),
                Arc::new(LockTable::new(None)),
                manifest.clone(),
                Arc::new(RecordCache::new(16, None)),
                Arc::new(AesGcmCipher::new()),
            );
            Self {
                adapter,
                manifest,
                manager,
            }
        }

        fn seed_unpartitioned(&self) {
            self.manifest.ensure_collection("users").unwrap();
            self.adapter
                .write(Path::new("db/users"), "{\"id\":\"u1\"}\n{\"id\":\"u2\"}\n")
                .unwrap();
        }

        fn seed_partitioned(&self) {
            self.manifest.ensure_collection("events").unwrap();
            self.manifest.ensure_partition("events", "east").unwrap();
            self.manifest.ensure_partition("events", "west").unwrap();
            self.adapter
                .write(Path::new("db/events.east"), "{\"id\":\"e1\"}\n")
                .unwrap();
            self.adapter
                .write(Path::new("db/events.west"), "{\"id\":\"e2\"}\n")
                .unwrap();
        }

        fn wipe_files(&self) {
            self.adapter.clear();
        }
    }

    #[test]
    fn backup_restore_roundtrip_plain() {
        let fx = Fixture::new();
        fx.seed_unpartitioned();
        fx.seed_partitioned();

        let artifact = fx
            .manager
            .backup(&["users", "events"], &BackupOptions::new())
            .unwrap();

        let before_users = fx.adapter.read(Path::new("db/users")).unwrap().unwrap();
        let before_east = fx.adapter.read(Path::new("db/events.east")).unwrap().unwrap();
        fx.wipe_files();

        let metadata = fx.manager.restore(&artifact, None).unwrap();
        assert_eq!(metadata.collections, vec!["users", "events"]);
        assert!(!metadata.gzip);
        assert!(!metadata.encrypted);

        assert_eq!(
            fx.adapter.read(Path::new("db/users")).unwrap().unwrap(),
            before_users
        );
        assert_eq!(
            fx.adapter.read(Path::new("db/events.east")).unwrap().unwrap(),
            before_east
        );
        assert!(fx.adapter.contains(Path::new("db/events.west")));
    }

    #[test]
    fn backup_restore_roundtrip_gzip() {
        let fx = Fixture::new();
        fx.seed_unpartitioned();

        let artifact = fx
            .manager
            .backup(&["users"], &BackupOptions::new().gzip(true))
            .unwrap();
        let before = fx.adapter.read(Path::new("db/users")).unwrap().unwrap();
        fx.wipe_files();

        let metadata = fx.manager.restore(&artifact, None).unwrap();
        assert!(metadata.gzip);
        assert_eq!(
            fx.adapter.read(Path::new("db/users")).unwrap().unwrap(),
            before
        );
    }

    #[test]
    fn backup_restore_roundtrip_encrypted_and_gzip() {
        let fx = Fixture::new();
        fx.seed_unpartitioned();

        let options = BackupOptions::new().gzip(true).encrypt_key("secret");
        let artifact = fx.manager.backup(&["users"], &options).unwrap();

        // Ciphertext is opaque: restoring without the key cannot even
        // read the metadata line.
        assert!(matches!(
            fx.manager.restore(&artifact, None),
            Err(CoreError::BackupCorrupt { .. })
        ));

        let before = fx.adapter.read(Path::new("db/users")).unwrap().unwrap();
        fx.wipe_files();

        let metadata = fx.manager.restore(&artifact, Some("secret")).unwrap();
        assert!(metadata.encrypted);
        assert_eq!(
            fx.adapter.read(Path::new("db/users")).unwrap().unwrap(),
            before
        );
    }

    #[test]
    fn restore_with_wrong_key_fails() {
        let fx = Fixture::new();
        fx.seed_unpartitioned();

        let artifact = fx
            .manager
            .backup(&["users"], &BackupOptions::new().encrypt_key("right"))
            .unwrap();

        let result = fx.manager.restore(&artifact, Some("wrong"));
        assert!(matches!(result, Err(CoreError::DecryptionFailed { .. })));
    }

    #[test]
    fn truncated_artifact_is_corrupt() {
        let fx = Fixture::new();
        fx.seed_unpartitioned();

        let artifact = fx.manager.backup(&["users"], &BackupOptions::new()).unwrap();
        let truncated = &artifact[..artifact.len() - 3];

        let result = fx.manager.restore(truncated, None);
        assert!(matches!(result, Err(CoreError::BackupCorrupt { .. })));
    }

    #[test]
    fn missing_metadata_line_is_corrupt() {
        let fx = Fixture::new();
        let result = fx.manager.restore(b"no newline here", None);
        assert!(matches!(result, Err(CoreError::BackupCorrupt { .. })));
    }

    #[test]
    fn malformed_metadata_is_corrupt() {
        let fx = Fixture::new();
        let result = fx.manager.restore(b"not-json\n", None);
        assert!(matches!(result, Err(CoreError::BackupCorrupt { .. })));
    }

    #[test]
    fn unknown_collection_is_rejected() {
        let fx = Fixture::new();
        let result = fx.manager.backup(&["ghost"], &BackupOptions::new());
        assert!(matches!(result, Err(CoreError::CollectionNotFound { .. })));
    }

    #[test]
    fn no_lock_capture_succeeds_under_held_writer_lock() {
        let adapter = Arc::new(MemoryAdapter::new());
        let manifest = Arc::new(ManifestStore::load(adapter.clone(), Path::new("db")).unwrap());
        let locks = Arc::new(LockTable::new(Some(std::time::Duration::from_millis(30))));
        let manager = BackupManager::new(
            adapter.clone(),
            PartitionRouter::new("db"),
            locks.clone(),
            manifest.clone(),
            Arc::new(RecordCache::new(16, None)),
            Arc::new(AesGcmCipher::new()),
        );
        manifest.ensure_collection("users").unwrap();
        adapter.write(Path::new("db/users"), "{\"id\":\"u1\"}\n").unwrap();

        let _writer = locks.write("users", None).unwrap();

        // With locks the capture times out; with no_lock it proceeds.
        assert!(matches!(
            manager.backup(&["users"], &BackupOptions::new()),
            Err(CoreError::LockTimeout { .. })
        ));
        assert!(manager
            .backup(&["users"], &BackupOptions::new().no_lock(true))
            .is_ok());
    }

    #[test]
    fn restore_registers_partitions_in_manifest() {
        let fx = Fixture::new();
        fx.seed_partitioned();

        let artifact = fx.manager.backup(&["events"], &BackupOptions::new()).unwrap();

        let fresh_adapter = Arc::new(MemoryAdapter::new());
        let fresh_manifest =
            Arc::new(ManifestStore::load(fresh_adapter.clone(), Path::new("db")).unwrap());
        let fresh = BackupManager::new(
            fresh_adapter.clone(),
            PartitionRouter::new("db"),
            Arc::new(LockTable::new(None)),
            fresh_manifest.clone(),
            Arc::new(RecordCache::new(16, None)),
            Arc::new(AesGcmCipher::new()),
        );

        fresh.restore(&artifact, None).unwrap();
        assert_eq!(fresh_manifest.partitions("events"), vec!["east", "west"]);
        assert!(fresh_adapter.contains(Path::new("db/events.east")));
    }

    #[test]
    fn read_metadata_does_not_touch_files() {
        let fx = Fixture::new();
        fx.seed_unpartitioned();

        let artifact = fx.manager.backup(&["users"], &BackupOptions::new()).unwrap();
        fx.wipe_files();

        let metadata = fx.manager.read_metadata(&artifact, None).unwrap();
        assert_eq!(metadata.collections, vec!["users"]);
        assert!(fx.adapter.paths().is_empty());
    }
}
