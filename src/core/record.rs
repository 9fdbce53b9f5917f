// Copyright 2025
// Licensed under the Elastic License v2.0

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

use crate::core::error::{CoreError, CoreResult};

/// Row image as carried by a change event (`before`, `after`, `key`)
pub type RowImage = Map<String, JsonValue>;

/// Synthetic soft-delete column appended to every canonical row
pub const DELETED_FIELD: &str = "_deleted";

/// Synthetic last-write-wins discriminator appended to every canonical row
pub const VERSION_FIELD: &str = "_version";

/// Mutation kind of a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Snapshot read emitted while the connector copies existing rows
    Read,
    Unknown,
}

impl Operation {
    /// Parses the Debezium `op` code or its long form.
    pub fn parse(s: &str) -> Self {
        match s {
            "c" | "create" | "insert" => Operation::Create,
            "u" | "update" => Operation::Update,
            "d" | "delete" => Operation::Delete,
            "r" | "read" | "snapshot" => Operation::Read,
            _ => Operation::Unknown,
        }
    }

    pub fn is_upsert(&self) -> bool {
        matches!(self, Operation::Create | Operation::Update | Operation::Read)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Read => "read",
            Operation::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One change event as delivered by the source stream
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnvelope {
    /// Logical table name, derived from the routing key
    pub table: String,
    pub operation: Operation,
    pub before: Option<RowImage>,
    pub after: Option<RowImage>,
    /// Primary-key-only image, used when a delete carries no `before`
    pub key: Option<RowImage>,
    /// Origin timestamp in milliseconds, never zero when present
    pub source_ts_ms: Option<i64>,
}

impl RawEnvelope {
    /// Builds an envelope from a decoded message value and optional key.
    ///
    /// Accepts both the bare Debezium envelope and the
    /// `{"schema": ..., "payload": {...}}` wrapping produced by converters
    /// with schemas enabled.
    pub fn from_json(
        table: impl Into<String>,
        value: JsonValue,
        key: Option<JsonValue>,
    ) -> CoreResult<Self> {
        let record = match unwrap_payload(value) {
            JsonValue::Object(obj) => obj,
            other => {
                return Err(CoreError::serialization_error(format!(
                    "change event must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let operation = record
            .get("op")
            .or_else(|| record.get("operation"))
            .and_then(JsonValue::as_str)
            .map(Operation::parse)
            .unwrap_or(Operation::Unknown);

        let source_ts_ms = ["ts_ms", "sourceTimestampMillis"]
            .iter()
            .find_map(|name| non_zero_millis(record.get(*name)))
            .or_else(|| {
                record.get("source").and_then(|source| {
                    ["ts_ms", "timestampMillis"]
                        .iter()
                        .find_map(|name| non_zero_millis(source.get(*name)))
                })
            });

        let key = key.map(unwrap_payload).and_then(into_image);

        let mut record = record;
        let before = record.remove("before").and_then(into_image);
        let after = record.remove("after").and_then(into_image);

        Ok(Self {
            table: table.into(),
            operation,
            before,
            after,
            key,
            source_ts_ms,
        })
    }
}

fn unwrap_payload(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(mut obj) if obj.contains_key("payload") && !obj.contains_key("op") => {
            obj.remove("payload").unwrap_or(JsonValue::Null)
        }
        other => other,
    }
}

fn into_image(value: JsonValue) -> Option<RowImage> {
    match value {
        JsonValue::Object(obj) => Some(obj),
        _ => None,
    }
}

fn non_zero_millis(value: Option<&JsonValue>) -> Option<i64> {
    let value = value?;
    let millis = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))?;
    (millis != 0).then_some(millis)
}

pub(crate) fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Field value of a canonical row
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    /// Nested object or array carried through as JSON
    Json(JsonValue),
}

impl Value {
    /// Text form used for timestamps in the bulk-load payload
    pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::String(s),
            nested @ (JsonValue::Array(_) | JsonValue::Object(_)) => Value::Json(nested),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Timestamp(ts) => serializer.serialize_str(&Value::format_timestamp(ts)),
            Value::Json(v) => v.serialize(serializer),
        }
    }
}

/// Normalized, destination-ready record.
///
/// Field order follows the source row image; synthetic fields are appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalRow {
    fields: Vec<(String, Value)>,
}

impl CanonicalRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_image(image: &RowImage) -> Self {
        Self {
            fields: image
                .iter()
                .map(|(name, value)| (name.clone(), Value::from(value.clone())))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Replaces the value of an existing field in place, or appends it.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.get(DELETED_FIELD), Some(Value::Int(1)))
    }

    pub fn version(&self) -> Option<i64> {
        match self.get(VERSION_FIELD) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

impl Serialize for CanonicalRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_operation_parsing() {
        assert_eq!(Operation::parse("c"), Operation::Create);
        assert_eq!(Operation::parse("u"), Operation::Update);
        assert_eq!(Operation::parse("d"), Operation::Delete);
        assert_eq!(Operation::parse("r"), Operation::Read);
        assert_eq!(Operation::parse("snapshot"), Operation::Read);
        assert_eq!(Operation::parse("t"), Operation::Unknown);
        assert!(Operation::Read.is_upsert());
        assert!(!Operation::Delete.is_upsert());
    }

    #[test]
    fn test_envelope_from_bare_debezium_value() {
        let value = json!({
            "before": null,
            "after": {"order_id": 7, "status": "created"},
            "source": {"ts_ms": 1700000000123_i64, "table": "orders"},
            "op": "c",
            "ts_ms": 1700000000000_i64
        });

        let env = RawEnvelope::from_json("orders", value, None).unwrap();
        assert_eq!(env.table, "orders");
        assert_eq!(env.operation, Operation::Create);
        assert!(env.before.is_none());
        assert_eq!(env.after.unwrap()["order_id"], json!(7));
        assert_eq!(env.source_ts_ms, Some(1700000000000));
    }

    #[test]
    fn test_envelope_unwraps_schema_payload() {
        let value = json!({
            "schema": {"type": "struct"},
            "payload": {
                "before": {"order_id": 7},
                "after": null,
                "op": "d",
                "source": {"ts_ms": 1700000000500_i64}
            }
        });
        let key = json!({"schema": {}, "payload": {"order_id": 7}});

        let env = RawEnvelope::from_json("orders", value, Some(key)).unwrap();
        assert_eq!(env.operation, Operation::Delete);
        assert!(env.after.is_none());
        assert_eq!(env.key.unwrap()["order_id"], json!(7));
        assert_eq!(env.source_ts_ms, Some(1700000000500));
    }

    #[test]
    fn test_envelope_zero_timestamp_is_absent() {
        let value = json!({"op": "u", "after": {"id": 1}, "ts_ms": 0});
        let env = RawEnvelope::from_json("orders", value, None).unwrap();
        assert_eq!(env.source_ts_ms, None);
    }

    #[test]
    fn test_envelope_rejects_non_object() {
        assert!(RawEnvelope::from_json("orders", json!([1, 2]), None).is_err());
        assert!(RawEnvelope::from_json("orders", json!("text"), None).is_err());
    }

    #[test]
    fn test_row_set_keeps_field_order() {
        let image = json!({"b": 1, "a": "x"});
        let mut row = CanonicalRow::from_image(image.as_object().unwrap());
        row.set("a", Value::String("y".into()));
        row.set(DELETED_FIELD, Value::Int(0));

        let names: Vec<&str> = row.fields().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a", DELETED_FIELD]);
        assert_eq!(row.get("a"), Some(&Value::String("y".into())));
        assert!(!row.is_deleted());
    }

    #[test]
    fn test_row_serialization_is_flat_json() {
        let mut row = CanonicalRow::new();
        row.set("order_id", Value::Int(7));
        row.set(
            "created_at",
            Value::Timestamp(Utc.timestamp_millis_opt(1700000000123).unwrap()),
        );
        row.set("meta", Value::Json(json!({"k": [1, 2]})));
        row.set("note", Value::Null);

        let text = serde_json::to_string(&row).unwrap();
        assert_eq!(
            text,
            r#"{"order_id":7,"created_at":"2023-11-14 22:13:20.123","meta":{"k":[1,2]},"note":null}"#
        );
    }
}
