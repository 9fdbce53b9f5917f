// Copyright 2025
// Licensed under the Elastic License v2.0

//! Message decoders
//!
//! A decoder turns the raw key and value bytes of one Kafka message into a
//! [`RawEnvelope`]. Both formats end up as JSON before envelope parsing so
//! the normalizer sees the same shapes regardless of the wire encoding.

use apache_avro::types::Value as AvroValue;
use async_trait::async_trait;
use serde_json::{Map, Number, Value as JsonValue};
use tracing::debug;

use super::schema_registry::SchemaRegistryClient;
use crate::core::{CoreError, CoreResult, RawEnvelope};

/// Magic byte opening every Confluent-framed message
const MAGIC_BYTE: u8 = 0;

/// Magic byte plus the big-endian schema id
const HEADER_LEN: usize = 5;

#[async_trait]
pub trait EnvelopeDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decodes a message value (and its key, when present) for `table`.
    async fn decode(&self, table: &str, key: Option<&[u8]>, value: &[u8]) -> CoreResult<RawEnvelope>;
}

// =============================================================================
// JSON
// =============================================================================

/// Schema-less JSON envelopes, bare or wrapped in `{"schema", "payload"}`
#[derive(Debug, Default)]
pub struct JsonEnvelopeDecoder;

#[async_trait]
impl EnvelopeDecoder for JsonEnvelopeDecoder {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn decode(&self, table: &str, key: Option<&[u8]>, value: &[u8]) -> CoreResult<RawEnvelope> {
        let value: JsonValue = serde_json::from_slice(value).map_err(|e| {
            CoreError::serialization_error_with_cause("message value is not valid JSON", e)
        })?;

        // The key only matters as a fallback image for deletes
        let key = key.and_then(|bytes| match serde_json::from_slice::<JsonValue>(bytes) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(table, "Ignoring undecodable message key: {}", e);
                None
            }
        });

        RawEnvelope::from_json(table, value, key)
    }
}

// =============================================================================
// Avro
// =============================================================================

/// Confluent-framed Avro envelopes with writer schemas from the registry
pub struct AvroEnvelopeDecoder {
    registry: SchemaRegistryClient,
}

impl AvroEnvelopeDecoder {
    pub fn new(registry: SchemaRegistryClient) -> Self {
        Self { registry }
    }

    async fn decode_datum(&self, bytes: &[u8]) -> CoreResult<JsonValue> {
        let (schema_id, mut body) = split_wire_format(bytes)?;
        let schema = self.registry.schema(schema_id).await?;

        let datum = apache_avro::from_avro_datum(&schema, &mut body, None).map_err(|e| {
            CoreError::serialization_error(format!(
                "invalid Avro datum for schema {}: {}",
                schema_id, e
            ))
        })?;

        avro_to_json(datum)
    }
}

#[async_trait]
impl EnvelopeDecoder for AvroEnvelopeDecoder {
    fn name(&self) -> &'static str {
        "avro"
    }

    async fn decode(&self, table: &str, key: Option<&[u8]>, value: &[u8]) -> CoreResult<RawEnvelope> {
        let value = self.decode_datum(value).await?;

        let key = match key {
            Some(bytes) => match self.decode_datum(bytes).await {
                Ok(key) => Some(key),
                Err(e) => {
                    debug!(table, "Ignoring undecodable message key: {}", e);
                    None
                }
            },
            None => None,
        };

        RawEnvelope::from_json(table, value, key)
    }
}

/// Splits a Confluent-framed message into schema id and Avro body.
pub fn split_wire_format(bytes: &[u8]) -> CoreResult<(u32, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(CoreError::serialization_error(format!(
            "message too short for Confluent framing ({} bytes)",
            bytes.len()
        )));
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(CoreError::serialization_error(format!(
            "unknown magic byte {:#04x}",
            bytes[0]
        )));
    }
    let schema_id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((schema_id, &bytes[HEADER_LEN..]))
}

/// Converts a decoded Avro value to JSON.
///
/// Unions collapse to their branch, records keep field order, and
/// microsecond timestamps become milliseconds.
pub fn avro_to_json(value: AvroValue) -> CoreResult<JsonValue> {
    Ok(match value {
        AvroValue::Null => JsonValue::Null,
        AvroValue::Boolean(b) => JsonValue::Bool(b),
        AvroValue::Int(i) => JsonValue::from(i),
        AvroValue::Long(l) => JsonValue::from(l),
        AvroValue::Float(f) => float(f as f64),
        AvroValue::Double(d) => float(d),
        AvroValue::String(s) | AvroValue::Enum(_, s) => JsonValue::String(s),
        AvroValue::Union(_, inner) => avro_to_json(*inner)?,
        AvroValue::Array(items) => JsonValue::Array(
            items
                .into_iter()
                .map(avro_to_json)
                .collect::<CoreResult<Vec<_>>>()?,
        ),
        AvroValue::Map(entries) => {
            let mut object = Map::new();
            for (name, value) in entries {
                object.insert(name, avro_to_json(value)?);
            }
            JsonValue::Object(object)
        }
        AvroValue::Record(fields) => {
            let mut object = Map::new();
            for (name, value) in fields {
                object.insert(name, avro_to_json(value)?);
            }
            JsonValue::Object(object)
        }
        AvroValue::TimestampMillis(ms) => JsonValue::from(ms),
        AvroValue::TimestampMicros(us) => JsonValue::from(us.div_euclid(1000)),
        AvroValue::Uuid(uuid) => JsonValue::String(uuid.to_string()),
        other => JsonValue::try_from(other).map_err(|e| {
            CoreError::serialization_error(format!("unsupported Avro value: {}", e))
        })?,
    })
}

fn float(f: f64) -> JsonValue {
    Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Operation;
    use apache_avro::Schema;
    use serde_json::json;

    const TS: i64 = 1_709_289_000_000;

    const ENVELOPE_SCHEMA: &str = r#"{
        "type": "record",
        "name": "Envelope",
        "namespace": "streamshop.public.orders",
        "fields": [
            {"name": "before", "type": ["null", {
                "type": "record", "name": "Before",
                "fields": [
                    {"name": "order_id", "type": "long"},
                    {"name": "status", "type": "string"}
                ]}], "default": null},
            {"name": "after", "type": ["null", {
                "type": "record", "name": "After",
                "fields": [
                    {"name": "order_id", "type": "long"},
                    {"name": "status", "type": "string"}
                ]}], "default": null},
            {"name": "op", "type": "string"},
            {"name": "ts_ms", "type": ["null", "long"], "default": null}
        ]
    }"#;

    const KEY_SCHEMA: &str = r#"{
        "type": "record",
        "name": "Key",
        "namespace": "streamshop.public.orders",
        "fields": [{"name": "order_id", "type": "long"}]
    }"#;

    fn framed(schema_id: u32, body: Vec<u8>) -> Vec<u8> {
        let mut bytes = vec![MAGIC_BYTE];
        bytes.extend_from_slice(&schema_id.to_be_bytes());
        bytes.extend(body);
        bytes
    }

    fn order(id: i64, status: &str) -> AvroValue {
        AvroValue::Record(vec![
            ("order_id".into(), AvroValue::Long(id)),
            ("status".into(), AvroValue::String(status.into())),
        ])
    }

    async fn avro_decoder() -> (AvroEnvelopeDecoder, Schema, Schema) {
        let envelope = Schema::parse_str(ENVELOPE_SCHEMA).unwrap();
        let key = Schema::parse_str(KEY_SCHEMA).unwrap();
        let registry = SchemaRegistryClient::new("http://registry.invalid:8081").unwrap();
        registry.register(1, envelope.clone()).await;
        registry.register(2, key.clone()).await;
        (AvroEnvelopeDecoder::new(registry), envelope, key)
    }

    #[test]
    fn test_split_wire_format() {
        let bytes = framed(258, vec![0xAA, 0xBB]);
        let (id, body) = split_wire_format(&bytes).unwrap();
        assert_eq!(id, 258);
        assert_eq!(body, &[0xAA, 0xBB]);

        assert!(split_wire_format(&[0, 0, 1]).is_err());
        let err = split_wire_format(&[1, 0, 0, 0, 1, 2]).unwrap_err();
        assert!(err.to_string().contains("magic byte"));
    }

    #[test]
    fn test_avro_to_json_shapes() {
        let value = AvroValue::Record(vec![
            ("id".into(), AvroValue::Int(3)),
            ("note".into(), AvroValue::Union(1, Box::new(AvroValue::String("x".into())))),
            ("gone".into(), AvroValue::Union(0, Box::new(AvroValue::Null))),
            ("price".into(), AvroValue::Double(12.5)),
            ("at".into(), AvroValue::TimestampMicros(1_709_289_000_000_123)),
            ("tags".into(), AvroValue::Array(vec![AvroValue::Enum(0, "new".into())])),
        ]);

        assert_eq!(
            avro_to_json(value).unwrap(),
            json!({
                "id": 3,
                "note": "x",
                "gone": null,
                "price": 12.5,
                "at": TS,
                "tags": ["new"]
            })
        );
    }

    #[tokio::test]
    async fn test_avro_update_envelope() {
        let (decoder, schema, _) = avro_decoder().await;
        let datum = AvroValue::Record(vec![
            ("before".into(), AvroValue::Union(0, Box::new(AvroValue::Null))),
            ("after".into(), AvroValue::Union(1, Box::new(order(1001, "paid")))),
            ("op".into(), AvroValue::String("u".into())),
            ("ts_ms".into(), AvroValue::Union(1, Box::new(AvroValue::Long(TS)))),
        ]);
        let value = framed(1, apache_avro::to_avro_datum(&schema, datum).unwrap());

        let envelope = decoder.decode("orders", None, &value).await.unwrap();
        assert_eq!(envelope.table, "orders");
        assert_eq!(envelope.operation, Operation::Update);
        assert_eq!(envelope.source_ts_ms, Some(TS));
        assert!(envelope.before.is_none());
        let after = envelope.after.unwrap();
        assert_eq!(after.get("order_id"), Some(&json!(1001)));
        assert_eq!(after.get("status"), Some(&json!("paid")));
    }

    #[tokio::test]
    async fn test_avro_delete_carries_key() {
        let (decoder, schema, key_schema) = avro_decoder().await;
        let datum = AvroValue::Record(vec![
            ("before".into(), AvroValue::Union(0, Box::new(AvroValue::Null))),
            ("after".into(), AvroValue::Union(0, Box::new(AvroValue::Null))),
            ("op".into(), AvroValue::String("d".into())),
            ("ts_ms".into(), AvroValue::Union(0, Box::new(AvroValue::Null))),
        ]);
        let value = framed(1, apache_avro::to_avro_datum(&schema, datum).unwrap());
        let key_datum = AvroValue::Record(vec![("order_id".into(), AvroValue::Long(1001))]);
        let key = framed(2, apache_avro::to_avro_datum(&key_schema, key_datum).unwrap());

        let envelope = decoder.decode("orders", Some(key.as_slice()), &value).await.unwrap();
        assert_eq!(envelope.operation, Operation::Delete);
        assert_eq!(envelope.source_ts_ms, None);
        assert_eq!(envelope.key.unwrap().get("order_id"), Some(&json!(1001)));
    }

    #[tokio::test]
    async fn test_avro_rejects_unframed_value() {
        let (decoder, _, _) = avro_decoder().await;
        let err = decoder
            .decode("orders", None, br#"{"op":"c"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("magic byte"));
    }

    #[tokio::test]
    async fn test_json_bare_and_wrapped() {
        let decoder = JsonEnvelopeDecoder;

        let bare = br#"{"op":"c","after":{"id":1},"ts_ms":1709289000000}"#;
        let envelope = decoder.decode("customers", None, bare).await.unwrap();
        assert_eq!(envelope.operation, Operation::Create);
        assert_eq!(envelope.source_ts_ms, Some(TS));

        let wrapped = br#"{"schema":{"type":"struct"},"payload":{"op":"r","after":{"id":2}}}"#;
        let envelope = decoder.decode("customers", None, wrapped).await.unwrap();
        assert_eq!(envelope.operation, Operation::Read);
        assert_eq!(envelope.after.unwrap().get("id"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_json_key_and_errors() {
        let decoder = JsonEnvelopeDecoder;
        let value = br#"{"op":"d","before":null}"#;

        let envelope = decoder
            .decode("orders", Some(br#"{"payload":{"order_id":9}}"#.as_slice()), value)
            .await
            .unwrap();
        assert_eq!(envelope.key.unwrap().get("order_id"), Some(&json!(9)));

        let envelope = decoder.decode("orders", Some(b"\x00\x01".as_slice()), value).await.unwrap();
        assert!(envelope.key.is_none());

        assert!(decoder.decode("orders", None, b"not json").await.is_err());
        assert!(decoder.decode("orders", None, b"[1,2]").await.is_err());
    }
}
