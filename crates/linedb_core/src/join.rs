//! Joins between two materialized record snapshots.
//!
//! Classic hash join: build a hash index over one side's key tuples, probe
//! with the other side. Snapshots are immutable - the engine never touches
//! locks, so joins can never deadlock against writers.

use crate::error::{CoreError, CoreResult};
use crate::record::{scalar_to_string, Record};
use crate::types::TransactionId;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Join kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Matched rows only.
    Inner,
    /// All left rows; unmatched ones padded with nulls on the right.
    Left,
    /// All right rows; unmatched ones padded with nulls on the left.
    Right,
    /// All rows of both sides.
    Full,
}

/// Predicate applied to one side of a join before matching.
pub type RecordPredicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Options describing one join.
///
/// The predicate is positional: `left_fields[i]` is compared against
/// `right_fields[i]`, and a row pair matches when every position matches.
#[derive(Clone)]
pub struct JoinOptions {
    /// Join kind.
    pub kind: JoinKind,
    /// Key fields read from left rows.
    pub left_fields: Vec<String>,
    /// Key fields read from right rows, positionally paired with
    /// `left_fields`.
    pub right_fields: Vec<String>,
    /// Strict comparison matches type and value exactly; loose comparison
    /// coerces both sides to strings first (so `10` matches `"10"`).
    pub strict_compare: bool,
    /// Filter applied to the left snapshot before joining.
    pub left_filter: Option<RecordPredicate>,
    /// Filter applied to the right snapshot before joining.
    pub right_filter: Option<RecordPredicate>,
    /// Pair each driving row with at most the first match (no row
    /// duplication).
    pub only_one_from_right: bool,
    /// Take both snapshots through this transaction's already-held locks,
    /// so the join sees the transaction's uncommitted state.
    pub transaction: Option<TransactionId>,
}

impl JoinOptions {
    /// Creates options for the given kind with strict comparison and no
    /// key fields; add pairs with [`JoinOptions::on`].
    #[must_use]
    pub fn new(kind: JoinKind) -> Self {
        Self {
            kind,
            left_fields: Vec::new(),
            right_fields: Vec::new(),
            strict_compare: true,
            left_filter: None,
            right_filter: None,
            only_one_from_right: false,
            transaction: None,
        }
    }

    /// Adds a positional key field pair.
    #[must_use]
    pub fn on(mut self, left_field: impl Into<String>, right_field: impl Into<String>) -> Self {
        self.left_fields.push(left_field.into());
        self.right_fields.push(right_field.into());
        self
    }

    /// Sets strict (type and value) vs. loose (string-coerced) comparison.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_compare = strict;
        self
    }

    /// Sets the left-side pre-join filter.
    #[must_use]
    pub fn left_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.left_filter = Some(Arc::new(filter));
        self
    }

    /// Sets the right-side pre-join filter.
    #[must_use]
    pub fn right_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.right_filter = Some(Arc::new(filter));
        self
    }

    /// Limits each driving row to its first match.
    #[must_use]
    pub fn first_match_only(mut self, value: bool) -> Self {
        self.only_one_from_right = value;
        self
    }

    /// Scopes the join's snapshots to a transaction.
    #[must_use]
    pub fn in_transaction(mut self, id: TransactionId) -> Self {
        self.transaction = Some(id);
        self
    }

    pub(crate) fn validate(&self) -> CoreResult<()> {
        if self.left_fields.is_empty() {
            return Err(CoreError::configuration("join requires at least one key field pair"));
        }
        if self.left_fields.len() != self.right_fields.len() {
            return Err(CoreError::configuration(
                "left and right join fields must pair positionally",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for JoinOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinOptions")
            .field("kind", &self.kind)
            .field("left_fields", &self.left_fields)
            .field("right_fields", &self.right_fields)
            .field("strict_compare", &self.strict_compare)
            .field("only_one_from_right", &self.only_one_from_right)
            .field("transaction", &self.transaction)
            .finish_non_exhaustive()
    }
}

/// Computes joins between two materialized snapshots.
pub struct JoinEngine;

impl JoinEngine {
    /// Joins `left` and `right` under `options`.
    ///
    /// Output ordering follows the driving side's snapshot order: left
    /// order for inner/left/full (full appends unmatched right rows in
    /// right order), right order for right joins. Unmatched sides appear
    /// as explicit JSON `null` columns. On a field-name collision the left
    /// value wins.
    pub fn join(left: &[Record], right: &[Record], options: &JoinOptions) -> CoreResult<Vec<Record>> {
        options.validate()?;

        let left_rows = filtered(left, options.left_filter.as_deref());
        let right_rows = filtered(right, options.right_filter.as_deref());

        let left_columns = column_union(&left_rows);
        let right_columns = column_union(&right_rows);

        match options.kind {
            JoinKind::Inner | JoinKind::Left | JoinKind::Full => Ok(Self::drive_left(
                &left_rows,
                &right_rows,
                &left_columns,
                &right_columns,
                options,
            )),
            JoinKind::Right => Ok(Self::drive_right(
                &left_rows,
                &right_rows,
                &left_columns,
                &right_columns,
                options,
            )),
        }
    }

    fn drive_left(
        left_rows: &[&Record],
        right_rows: &[&Record],
        left_columns: &[String],
        right_columns: &[String],
        options: &JoinOptions,
    ) -> Vec<Record> {
        let index = build_index(right_rows, &options.right_fields, options.strict_compare);
        let mut matched_right = vec![false; right_rows.len()];
        let mut out = Vec::new();

        for row in left_rows {
            let found = join_key(row, &options.left_fields, options.strict_compare)
                .and_then(|key| index.get(&key));

            match found {
                Some(indices) if !indices.is_empty() => {
                    let limit = if options.only_one_from_right {
                        1
                    } else {
                        indices.len()
                    };
                    for &ridx in indices.iter().take(limit) {
                        matched_right[ridx] = true;
                        out.push(combine(
                            Some(row),
                            Some(right_rows[ridx]),
                            left_columns,
                            right_columns,
                        ));
                    }
                }
                _ => {
                    if matches!(options.kind, JoinKind::Left | JoinKind::Full) {
                        out.push(combine(Some(row), None, left_columns, right_columns));
                    }
                }
            }
        }

        if options.kind == JoinKind::Full {
            for (ridx, row) in right_rows.iter().enumerate() {
                if !matched_right[ridx] {
                    out.push(combine(None, Some(row), left_columns, right_columns));
                }
            }
        }
        out
    }

    fn drive_right(
        left_rows: &[&Record],
        right_rows: &[&Record],
        left_columns: &[String],
        right_columns: &[String],
        options: &JoinOptions,
    ) -> Vec<Record> {
        let index = build_index(left_rows, &options.left_fields, options.strict_compare);
        let mut out = Vec::new();

        for row in right_rows {
            let found = join_key(row, &options.right_fields, options.strict_compare)
                .and_then(|key| index.get(&key));

            match found {
                Some(indices) if !indices.is_empty() => {
                    let limit = if options.only_one_from_right {
                        1
                    } else {
                        indices.len()
                    };
                    for &lidx in indices.iter().take(limit) {
                        out.push(combine(
                            Some(left_rows[lidx]),
                            Some(row),
                            left_columns,
                            right_columns,
                        ));
                    }
                }
                _ => out.push(combine(None, Some(row), left_columns, right_columns)),
            }
        }
        out
    }
}

fn filtered<'a>(rows: &'a [Record], filter: Option<&(dyn Fn(&Record) -> bool + Send + Sync)>) -> Vec<&'a Record> {
    rows.iter()
        .filter(|r| filter.map_or(true, |f| f(r)))
        .collect()
}

/// Ordered union of field names across a snapshot, first-seen order.
fn column_union(rows: &[&Record]) -> Vec<String> {
    let mut columns = Vec::new();
    for row in rows {
        for (name, _) in row.iter() {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

/// Key tuple for one row, or `None` if any key field is null or missing.
///
/// Strict mode encodes each value as its canonical JSON text, which keeps
/// `1` and `"1"` distinct; loose mode coerces scalars to their bare string
/// form so they collide.
fn join_key(row: &Record, fields: &[String], strict: bool) -> Option<Vec<String>> {
    let mut key = Vec::with_capacity(fields.len());
    for field in fields {
        let value = row.get(field)?;
        if value.is_null() {
            return None;
        }
        let part = if strict {
            serde_json::to_string(value).ok()?
        } else {
            match scalar_to_string(value) {
                Some(s) => s,
                None => serde_json::to_string(value).ok()?,
            }
        };
        key.push(part);
    }
    Some(key)
}

fn build_index(
    rows: &[&Record],
    fields: &[String],
    strict: bool,
) -> HashMap<Vec<String>, Vec<usize>> {
    let mut index: HashMap<Vec<String>, Vec<usize>> = HashMap::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        if let Some(key) = join_key(row, fields, strict) {
            index.entry(key).or_default().push(idx);
        }
    }
    index
}

/// Combines a left and right row into one record.
///
/// Left columns come first, then right columns not already present.
/// An absent side contributes explicit nulls for all of its columns.
fn combine(
    left: Option<&Record>,
    right: Option<&Record>,
    left_columns: &[String],
    right_columns: &[String],
) -> Record {
    let mut out = Record::new();
    for column in left_columns {
        let value = left
            .and_then(|r| r.get(column))
            .cloned()
            .unwrap_or(Value::Null);
        out.set(column.clone(), value);
    }
    for column in right_columns {
        if out.contains(column) {
            continue;
        }
        let value = right
            .and_then(|r| r.get(column))
            .cloned()
            .unwrap_or(Value::Null);
        out.set(column.clone(), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(values: &[serde_json::Value]) -> Vec<Record> {
        values
            .iter()
            .map(|v| Record::from_value(v.clone()).unwrap())
            .collect()
    }

    fn users_and_names() -> (Vec<Record>, Vec<Record>) {
        let left = records(&[
            json!({"id": 1, "userId": 10}),
            json!({"id": 2, "userId": 20}),
        ]);
        let right = records(&[json!({"id": 10, "name": "Alice"})]);
        (left, right)
    }

    #[test]
    fn inner_join_matches_one_row() {
        let (left, right) = users_and_names();
        let options = JoinOptions::new(JoinKind::Inner).on("userId", "id");

        let rows = JoinEngine::join(&left, &right, &options).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&json!(1)));
        assert_eq!(rows[0].get("userId"), Some(&json!(10)));
        assert_eq!(rows[0].get("name"), Some(&json!("Alice")));
    }

    #[test]
    fn left_join_pads_unmatched_with_null() {
        let (left, right) = users_and_names();
        let options = JoinOptions::new(JoinKind::Left).on("userId", "id");

        let rows = JoinEngine::join(&left, &right, &options).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("userId"), Some(&json!(20)));
        assert_eq!(rows[1].get("name"), Some(&Value::Null));
    }

    #[test]
    fn right_join_pads_unmatched_left_side() {
        let left = records(&[json!({"id": 1, "userId": 10})]);
        let right = records(&[
            json!({"id": 10, "name": "Alice"}),
            json!({"id": 30, "name": "Carol"}),
        ]);
        let options = JoinOptions::new(JoinKind::Right).on("userId", "id");

        let rows = JoinEngine::join(&left, &right, &options).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("userId"), Some(&json!(10)));
        assert_eq!(rows[0].get("name"), Some(&json!("Alice")));
        assert_eq!(rows[1].get("userId"), Some(&Value::Null));
        assert_eq!(rows[1].get("name"), Some(&json!("Carol")));
    }

    #[test]
    fn full_join_emits_both_unmatched_sides() {
        let left = records(&[json!({"id": 1, "userId": 10}), json!({"id": 2, "userId": 20})]);
        let right = records(&[
            json!({"id": 10, "name": "Alice"}),
            json!({"id": 30, "name": "Carol"}),
        ]);
        let options = JoinOptions::new(JoinKind::Full).on("userId", "id");

        let rows = JoinEngine::join(&left, &right, &options).unwrap();

        assert_eq!(rows.len(), 3);
        // Matched, unmatched left, then unmatched right.
        assert_eq!(rows[0].get("name"), Some(&json!("Alice")));
        assert_eq!(rows[1].get("name"), Some(&Value::Null));
        assert_eq!(rows[2].get("userId"), Some(&Value::Null));
        assert_eq!(rows[2].get("name"), Some(&json!("Carol")));
    }

    #[test]
    fn left_value_wins_on_field_collision() {
        let (left, right) = users_and_names();
        let options = JoinOptions::new(JoinKind::Inner).on("userId", "id");

        let rows = JoinEngine::join(&left, &right, &options).unwrap();
        // Both sides have "id"; the combined row keeps the left one.
        assert_eq!(rows[0].get("id"), Some(&json!(1)));
    }

    #[test]
    fn strict_compare_distinguishes_types() {
        let left = records(&[json!({"userId": "10"})]);
        let right = records(&[json!({"id": 10, "name": "Alice"})]);

        let strict = JoinOptions::new(JoinKind::Inner).on("userId", "id");
        assert!(JoinEngine::join(&left, &right, &strict).unwrap().is_empty());

        let loose = JoinOptions::new(JoinKind::Inner).on("userId", "id").strict(false);
        assert_eq!(JoinEngine::join(&left, &right, &loose).unwrap().len(), 1);
    }

    #[test]
    fn null_keys_never_match() {
        let left = records(&[json!({"userId": null})]);
        let right = records(&[json!({"id": null, "name": "N"})]);
        let options = JoinOptions::new(JoinKind::Inner).on("userId", "id");

        assert!(JoinEngine::join(&left, &right, &options).unwrap().is_empty());
    }

    #[test]
    fn multiple_matches_duplicate_left_row() {
        let left = records(&[json!({"id": 1, "tag": "a"})]);
        let right = records(&[
            json!({"tag": "a", "n": 1}),
            json!({"tag": "a", "n": 2}),
        ]);
        let options = JoinOptions::new(JoinKind::Inner).on("tag", "tag");

        let rows = JoinEngine::join(&left, &right, &options).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn only_one_from_right_pairs_first_match() {
        let left = records(&[json!({"id": 1, "tag": "a"})]);
        let right = records(&[
            json!({"tag": "a", "n": 1}),
            json!({"tag": "a", "n": 2}),
        ]);
        let options = JoinOptions::new(JoinKind::Inner)
            .on("tag", "tag")
            .first_match_only(true);

        let rows = JoinEngine::join(&left, &right, &options).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("n"), Some(&json!(1)));
    }

    #[test]
    fn filters_narrow_snapshots_before_matching() {
        let left = records(&[
            json!({"id": 1, "userId": 10, "active": true}),
            json!({"id": 2, "userId": 10, "active": false}),
        ]);
        let right = records(&[json!({"id": 10, "name": "Alice"})]);
        let options = JoinOptions::new(JoinKind::Inner)
            .on("userId", "id")
            .left_filter(|r| r.get("active") == Some(&json!(true)));

        let rows = JoinEngine::join(&left, &right, &options).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&json!(1)));
    }

    #[test]
    fn composite_keys_must_match_every_position() {
        let left = records(&[json!({"a": 1, "b": 2})]);
        let right = records(&[json!({"x": 1, "y": 3})]);
        let options = JoinOptions::new(JoinKind::Inner).on("a", "x").on("b", "y");

        assert!(JoinEngine::join(&left, &right, &options).unwrap().is_empty());
    }

    #[test]
    fn missing_key_fields_fail_validation() {
        let options = JoinOptions::new(JoinKind::Inner);
        let result = JoinEngine::join(&[], &[], &options);
        assert!(matches!(result, Err(CoreError::Configuration { .. })));
    }
}
