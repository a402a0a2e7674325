//! Partition routing.
//!
//! A partitioned collection spreads its records over multiple files, one
//! per partition id. The routing rule is either a field name (the field's
//! value, coerced to a string, is the partition id) or a pure function of
//! the record.

use crate::error::{CoreError, CoreResult};
use crate::record::{scalar_to_string, Record};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How records are routed to partitions.
///
/// The rule must be pure and deterministic: identical records always route
/// identically. The store detects violations (the same id surfacing in more
/// than one partition) but does not repair them.
#[derive(Clone)]
pub enum PartitionRule {
    /// Route by the string-coerced value of the named field.
    ByField(String),
    /// Route by a pure function of the (possibly partial) record.
    ByFunction(Arc<dyn Fn(&Record) -> String + Send + Sync>),
}

impl PartitionRule {
    /// Creates a field-name rule.
    #[must_use]
    pub fn by_field(field: impl Into<String>) -> Self {
        Self::ByField(field.into())
    }

    /// Creates a function rule.
    #[must_use]
    pub fn by_function<F>(rule: F) -> Self
    where
        F: Fn(&Record) -> String + Send + Sync + 'static,
    {
        Self::ByFunction(Arc::new(rule))
    }
}

impl fmt::Debug for PartitionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByField(field) => write!(f, "PartitionRule::ByField({field:?})"),
            Self::ByFunction(_) => f.write_str("PartitionRule::ByFunction(..)"),
        }
    }
}

/// Maps records to partition ids and partitions to file paths.
#[derive(Debug, Clone)]
pub struct PartitionRouter {
    db_folder: PathBuf,
}

impl PartitionRouter {
    /// Creates a router rooted at the database folder.
    #[must_use]
    pub fn new(db_folder: impl Into<PathBuf>) -> Self {
        Self {
            db_folder: db_folder.into(),
        }
    }

    /// Returns the database folder.
    #[must_use]
    pub fn db_folder(&self) -> &Path {
        &self.db_folder
    }

    /// Resolves the partition id for `record` under `rule`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the routing field is missing or not
    /// a scalar, or if the resolved partition id is empty or would escape
    /// the database folder.
    pub fn resolve(&self, record: &Record, rule: &PartitionRule) -> CoreResult<String> {
        let id = match rule {
            PartitionRule::ByField(field) => {
                record.get(field).and_then(scalar_to_string).ok_or_else(|| {
                    CoreError::configuration(format!(
                        "partition field {field:?} is missing or not a scalar"
                    ))
                })?
            }
            PartitionRule::ByFunction(f) => f(record),
        };
        validate_partition_id(&id)?;
        Ok(id)
    }

    /// Builds the file path for a collection's partition.
    ///
    /// Unpartitioned collections live at `<db_folder>/<collection>`;
    /// partitions at `<db_folder>/<collection>.<partition_id>`.
    #[must_use]
    pub fn path_for(&self, collection: &str, partition: Option<&str>) -> PathBuf {
        match partition {
            Some(id) => self.db_folder.join(format!("{collection}.{id}")),
            None => self.db_folder.join(collection),
        }
    }
}

fn validate_partition_id(id: &str) -> CoreResult<()> {
    if id.is_empty() {
        return Err(CoreError::configuration("partition id is empty"));
    }
    if id.contains('/') || id.contains('\\') || id == "." || id == ".." {
        return Err(CoreError::configuration(format!(
            "partition id {id:?} contains path separators"
        )));
    }
    Ok(())
}
