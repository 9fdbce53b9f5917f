// Copyright 2025
// Licensed under the Elastic License v2.0

//! Envelope normalization
//!
//! Turns one change event into at most one canonical row: the row image for
//! the operation, the `_deleted` / `_version` columns, UTC timestamps for the
//! table's declared timestamp fields and the table's payload shaping.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::core::record::{DELETED_FIELD, VERSION_FIELD};
use crate::core::{CanonicalRow, CoreError, CoreResult, Operation, RawEnvelope, RowImage, Value};
use crate::routing::RouteTable;

/// Normalizes an envelope using the wall clock for the `_version` fallback.
pub fn normalize_now(envelope: &RawEnvelope, routes: &RouteTable) -> CoreResult<Option<CanonicalRow>> {
    normalize(envelope, routes, Utc::now().timestamp_millis())
}

/// Normalizes an envelope into a canonical row.
///
/// Returns `Ok(None)` when the envelope is discarded: unrouted table, missing
/// row image for the operation, or unknown operation. A declared timestamp
/// field that cannot be parsed is an error for this row.
pub fn normalize(
    envelope: &RawEnvelope,
    routes: &RouteTable,
    now_ms: i64,
) -> CoreResult<Option<CanonicalRow>> {
    let Some(route) = routes.get(&envelope.table) else {
        return Ok(None);
    };

    let (image, deleted) = match envelope.operation {
        Operation::Delete => match delete_image(envelope) {
            Some(image) => (image, 1),
            None => return Ok(None),
        },
        op if op.is_upsert() => match &envelope.after {
            Some(after) => (after, 0),
            None => return Ok(None),
        },
        _ => return Ok(None),
    };

    let mut row = CanonicalRow::from_image(image);
    row.set(DELETED_FIELD, Value::Int(deleted));

    let version = envelope
        .source_ts_ms
        .filter(|ts| *ts != 0)
        .unwrap_or(now_ms);
    row.set(VERSION_FIELD, Value::Int(version));

    for field in &route.timestamp_fields {
        let Some(raw) = row.get(field) else {
            continue;
        };
        let normalized = normalize_timestamp(raw)
            .map_err(|msg| CoreError::timestamp_error(&envelope.table, field, msg))?;
        row.set(field, normalized);
    }

    for field in &route.stringify_fields {
        let flattened = match row.get(field) {
            None | Some(Value::Null) => Value::String(String::new()),
            Some(Value::Json(nested)) => Value::String(nested.to_string()),
            Some(other) => other.clone(),
        };
        row.set(field, flattened);
    }

    Ok(Some(row))
}

/// Prior row image of a delete, falling back to the key image.
fn delete_image(envelope: &RawEnvelope) -> Option<&RowImage> {
    envelope
        .before
        .as_ref()
        .filter(|image| !image.is_empty())
        .or_else(|| envelope.key.as_ref().filter(|image| !image.is_empty()))
}

/// Reads a timestamp field as a UTC instant.
///
/// Strings are ISO-8601 (a trailing `Z`, an explicit offset, or no offset,
/// which is read as UTC); numbers are epoch milliseconds. `null` stays `null`.
pub fn normalize_timestamp(value: &Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
        Value::Int(millis) => DateTime::from_timestamp_millis(*millis)
            .map(Value::Timestamp)
            .ok_or_else(|| format!("epoch millis {} out of range", millis)),
        Value::Float(millis) if millis.is_finite() => {
            DateTime::from_timestamp_micros((millis * 1000.0).round() as i64)
                .map(Value::Timestamp)
                .ok_or_else(|| format!("epoch millis {} out of range", millis))
        }
        Value::Float(millis) => Err(format!("epoch millis {} is not finite", millis)),
        Value::String(text) => parse_iso8601(text)
            .map(Value::Timestamp)
            .ok_or_else(|| format!("'{}' is not an ISO-8601 timestamp", text)),
        Value::Bool(_) => Err("boolean is not a timestamp".to_string()),
        Value::Json(_) => Err("nested value is not a timestamp".to_string()),
    }
}

fn parse_iso8601(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    let with_offset = match text.strip_suffix('Z').or_else(|| text.strip_suffix('z')) {
        Some(stripped) => format!("{}+00:00", stripped),
        None => text.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&with_offset) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(&with_offset, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
