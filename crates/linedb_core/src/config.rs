//! Store and collection configuration.

use crate::partition::PartitionRule;
use crate::record::Record;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Configuration for opening a LineDb instance.
///
/// Every recognized option is an explicit field with an explicit default;
/// there are no loosely-typed option bags.
#[derive(Debug, Clone)]
pub struct LineDbConfig {
    /// Folder holding every partition file (and the MANIFEST / LOCK files).
    pub db_folder: PathBuf,

    /// Whether to create the folder if it doesn't exist.
    pub create_if_missing: bool,

    /// Maximum number of cache entries before LRU eviction.
    pub cache_capacity: usize,

    /// Time-to-live for cache entries. `None` disables expiry; entries then
    /// only leave the cache through invalidation or LRU eviction.
    pub cache_ttl: Option<Duration>,

    /// Maximum time to wait for a contended lock. `None` blocks forever.
    pub lock_timeout: Option<Duration>,
}

impl Default for LineDbConfig {
    fn default() -> Self {
        Self {
            db_folder: PathBuf::from("linedb"),
            create_if_missing: true,
            cache_capacity: 1024,
            cache_ttl: None,
            lock_timeout: None,
        }
    }
}

impl LineDbConfig {
    /// Creates a configuration for the given database folder.
    #[must_use]
    pub fn new(db_folder: impl Into<PathBuf>) -> Self {
        Self {
            db_folder: db_folder.into(),
            ..Self::default()
        }
    }

    /// Sets whether to create the folder if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the cache capacity.
    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the cache TTL.
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the lock acquisition timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

/// Rule for generating an id when an inserted record carries none.
#[derive(Clone)]
pub enum IdRule {
    /// Random UUID v4 (default).
    Uuid,
    /// Caller-supplied generator, invoked with the partial record.
    ///
    /// The generator may collide; generated ids are collision-checked
    /// against the cache and the partition file, and the insert fails if
    /// no unique id is produced after a bounded number of attempts.
    Generator(Arc<dyn Fn(&Record) -> String + Send + Sync>),
}

impl IdRule {
    /// Produces a candidate id for `record`.
    pub(crate) fn generate(&self, record: &Record) -> String {
        match self {
            Self::Uuid => Uuid::new_v4().to_string(),
            Self::Generator(f) => f(record),
        }
    }
}

impl fmt::Debug for IdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid => f.write_str("IdRule::Uuid"),
            Self::Generator(_) => f.write_str("IdRule::Generator(..)"),
        }
    }
}

/// Configuration for one collection.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Collection name; also the base file name of its partitions.
    pub name: String,

    /// Field holding the record id. Defaults to `"id"`.
    pub id_field: String,

    /// Partition routing rule. `None` stores the whole collection in a
    /// single file.
    pub partition_rule: Option<PartitionRule>,

    /// Id generation rule for inserts without an id.
    pub id_rule: IdRule,
}

impl CollectionConfig {
    /// Creates a configuration for the named collection with defaults.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_field: "id".to_string(),
            partition_rule: None,
            id_rule: IdRule::Uuid,
        }
    }

    /// Sets the id field name.
    #[must_use]
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Partitions the collection by the value of `field`.
    #[must_use]
    pub fn partition_by_field(mut self, field: impl Into<String>) -> Self {
        self.partition_rule = Some(PartitionRule::by_field(field));
        self
    }

    /// Partitions the collection by a pure function of the record.
    ///
    /// The function must be deterministic: identical records must always
    /// route identically. Callers violating this get inconsistent reads,
    /// which the store detects but does not repair.
    #[must_use]
    pub fn partition_by<F>(mut self, rule: F) -> Self
    where
        F: Fn(&Record) -> String + Send + Sync + 'static,
    {
        self.partition_rule = Some(PartitionRule::by_function(rule));
        self
    }

    /// Sets the id generation rule.
    #[must_use]
    pub fn id_rule(mut self, rule: IdRule) -> Self {
        self.id_rule = rule;
        self
    }

    /// Sets a caller-supplied id generator.
    #[must_use]
    pub fn id_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Record) -> String + Send + Sync + 'static,
    {
        self.id_rule = IdRule::Generator(Arc::new(generator));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LineDbConfig::default();
        assert!(config.create_if_missing);
        assert_eq!(config.cache_capacity, 1024);
        assert!(config.cache_ttl.is_none());
        assert!(config.lock_timeout.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = LineDbConfig::new("data/db")
            .create_if_missing(false)
            .cache_capacity(16)
            .cache_ttl(Duration::from_millis(100))
            .lock_timeout(Duration::from_secs(5));

        assert_eq!(config.db_folder, PathBuf::from("data/db"));
        assert!(!config.create_if_missing);
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.cache_ttl, Some(Duration::from_millis(100)));
        assert_eq!(config.lock_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn collection_defaults() {
        let config = CollectionConfig::new("users");
        assert_eq!(config.name, "users");
        assert_eq!(config.id_field, "id");
        assert!(config.partition_rule.is_none());
        assert!(matches!(config.id_rule, IdRule::Uuid));
    }

    #[test]
    fn uuid_rule_generates_distinct_ids() {
        let rule = IdRule::Uuid;
        let record = Record::new();
        assert_ne!(rule.generate(&record), rule.generate(&record));
    }

    #[test]
    fn custom_generator_sees_record() {
        let config = CollectionConfig::new("users")
            .id_generator(|r| format!("gen-{}", r.len()));
        let mut record = Record::new();
        record.set("a", serde_json::json!(1));

        let id = config.id_rule.generate(&record);
        assert_eq!(id, "gen-1");
    }
}
