//! Record model and line codec.
//!
//! A [`Record`] is an ordered mapping of field name to JSON value. Records
//! are persisted one per line as compact JSON, newline-terminated. Field
//! order is preserved through encode/decode (insertion order).

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered field map underlying a record.
pub type Fields = Map<String, Value>;

/// An ordered mapping of field name to JSON-like value.
///
/// Every record stored in a collection must carry an identifying field
/// (configured per collection, `"id"` by default) whose value is unique
/// within the record's partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Fields,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record from an ordered field map.
    #[must_use]
    pub fn from_fields(fields: Fields) -> Self {
        Self { fields }
    }

    /// Creates a record from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the value is not a JSON object.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(CoreError::configuration(format!(
                "record must be a JSON object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Returns the value of `field`, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets `field` to `value`, preserving position if the field exists.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Returns true if `field` is present.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the underlying field map.
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Iterates fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Returns the identifying value under `id_field`, coerced to a string.
    ///
    /// Strings are used as-is; numbers and booleans are rendered with their
    /// JSON text. Null, arrays, objects, and an absent field all yield `None`
    /// since none of them can identify a record.
    #[must_use]
    pub fn id_string(&self, id_field: &str) -> Option<String> {
        self.fields.get(id_field).and_then(scalar_to_string)
    }

    /// Merges `patch` into this record.
    ///
    /// Every field in `patch` overwrites or extends this record's fields.
    /// Fields are never removed; setting a field to `null` stores `null`.
    pub fn merge(&mut self, patch: &Record) {
        for (field, value) in patch.iter() {
            self.fields.insert(field.clone(), value.clone());
        }
    }

    /// Encodes this record as a single compact JSON line (no newline).
    pub fn to_line(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a record from one JSON line.
    ///
    /// # Errors
    ///
    /// Returns a codec error for malformed JSON and a configuration error
    /// for valid JSON that is not an object.
    pub fn from_line(line: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(line)?;
        Self::from_value(value)
    }
}

impl From<Fields> for Record {
    fn from(fields: Fields) -> Self {
        Self::from_fields(fields)
    }
}

/// Encodes records as newline-terminated JSON lines.
pub fn encode_lines(records: &[Record]) -> CoreResult<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.to_line()?);
        out.push('\n');
    }
    Ok(out)
}

/// Decodes the full text of one partition file.
///
/// An empty text yields an empty collection. Blank lines (including the
/// trailing one after the final newline) are skipped.
pub fn decode_lines(text: &str) -> CoreResult<Vec<Record>> {
    let mut records = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        records.push(Record::from_line(line)?);
    }
    Ok(records)
}

/// Coerces a scalar JSON value to its string form.
///
/// Used for id coercion, field-name partition routing, and loose join
/// comparison. Non-scalar values yield `None`.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn from_value_rejects_non_object() {
        assert!(Record::from_value(json!([1, 2])).is_err());
        assert!(Record::from_value(json!("text")).is_err());
        assert!(Record::from_value(json!(null)).is_err());
    }

    #[test]
    fn id_string_coerces_scalars() {
        let r = record(json!({"id": 7, "name": "a"}));
        assert_eq!(r.id_string("id").as_deref(), Some("7"));

        let r = record(json!({"id": "u-1"}));
        assert_eq!(r.id_string("id").as_deref(), Some("u-1"));

        let r = record(json!({"id": true}));
        assert_eq!(r.id_string("id").as_deref(), Some("true"));
    }

    #[test]
    fn id_string_rejects_non_scalars() {
        assert!(record(json!({"id": null})).id_string("id").is_none());
        assert!(record(json!({"id": [1]})).id_string("id").is_none());
        assert!(record(json!({"name": "x"})).id_string("id").is_none());
    }

    #[test]
    fn merge_overwrites_and_extends() {
        let mut base = record(json!({"id": 1, "name": "old", "age": 30}));
        let patch = record(json!({"name": "new", "city": "Rome"}));

        base.merge(&patch);

        assert_eq!(base.get("name"), Some(&json!("new")));
        assert_eq!(base.get("age"), Some(&json!(30)));
        assert_eq!(base.get("city"), Some(&json!("Rome")));
    }

    #[test]
    fn merge_stores_null() {
        let mut base = record(json!({"id": 1, "name": "x"}));
        base.merge(&record(json!({"name": null})));
        assert_eq!(base.get("name"), Some(&Value::Null));
    }

    #[test]
    fn field_order_is_preserved() {
        let r = record(json!({"z": 1, "a": 2, "m": 3}));
        let names: Vec<_> = r.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);

        let reparsed = Record::from_line(&r.to_line().unwrap()).unwrap();
        let names: Vec<_> = reparsed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn decode_lines_skips_blank_lines() {
        let text = "{\"id\":1}\n\n{\"id\":2}\n";
        let records = decode_lines(text).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn decode_empty_text_is_empty_collection() {
        assert!(decode_lines("").unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_malformed_line() {
        let result = decode_lines("{\"id\":1}\nnot-json\n");
        assert!(matches!(result, Err(CoreError::Codec(_))));
    }

    #[test]
    fn encode_terminates_every_line() {
        let records = vec![record(json!({"id": 1})), record(json!({"id": 2}))];
        let text = encode_lines(&records).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 2);
    }

    proptest! {
        #[test]
        fn line_codec_roundtrip(
            id in "[a-z0-9]{1,12}",
            n in proptest::num::i64::ANY,
            flag in proptest::bool::ANY,
        ) {
            let original = record(json!({"id": id, "n": n, "flag": flag}));
            let decoded = Record::from_line(&original.to_line().unwrap()).unwrap();
            prop_assert_eq!(original, decoded);
        }
    }
}
