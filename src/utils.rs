// Copyright 2025
// Licensed under the Elastic License v2.0

//! Utility functions
//!
//! Destination identifiers are spliced into the `INSERT` query text, so they
//! are checked against a strict grammar before any request is built.

use anyhow::{anyhow, Result};

/// Validates a ClickHouse table identifier (`table` or `database.table`).
///
/// Each part must start with a letter or underscore and contain only ASCII
/// letters, digits and underscores. Quoting is not supported.
///
/// ```ignore
/// assert!(validate_table_identifier("analytics.raw_orders").is_ok());
/// assert!(validate_table_identifier("raw_orders").is_ok());
/// assert!(validate_table_identifier("analytics.raw_orders; DROP TABLE x").is_err());
/// ```
pub fn validate_table_identifier(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(anyhow!("Table identifier cannot be empty"));
    }

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(anyhow!(
            "Invalid table identifier '{}': expected table or database.table",
            name
        ));
    }

    for part in parts {
        let mut chars = part.chars();
        let valid_start = chars
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(anyhow!(
                "Invalid table identifier '{}': only letters, digits and underscores are allowed",
                name
            ));
        }
    }

    Ok(name)
}
