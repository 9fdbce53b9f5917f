// Copyright 2025
// Licensed under the Elastic License v2.0

//! Static table routing
//!
//! Maps each logical source table to its destination table identifier and to
//! the per-table normalization rules. Adding a table means adding a route here.

use std::collections::HashMap;

/// Per-table destination and normalization rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRoute {
    /// Fully qualified destination table (`database.table`)
    pub destination: String,
    /// Fields normalized to UTC instants
    pub timestamp_fields: Vec<String>,
    /// Fields flattened to a JSON string, with `""` substituted for missing values
    pub stringify_fields: Vec<String>,
}

impl TableRoute {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            timestamp_fields: Vec::new(),
            stringify_fields: Vec::new(),
        }
    }

    pub fn with_timestamps(mut self, fields: &[&str]) -> Self {
        self.timestamp_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_stringified(mut self, fields: &[&str]) -> Self {
        self.stringify_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// Immutable routing table, built once at startup
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, TableRoute>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, table: impl Into<String>, route: TableRoute) -> Self {
        self.routes.insert(table.into(), route);
        self
    }

    /// Routes for the shop schema replicated into `{database}.raw_{table}`.
    pub fn streamshop(database: &str) -> Self {
        const AUDITED: &[&str] = &["created_at", "updated_at"];

        let raw = |table: &str| format!("{}.raw_{}", database, table);

        Self::new()
            .with_route("customers", TableRoute::new(raw("customers")).with_timestamps(AUDITED))
            .with_route("products", TableRoute::new(raw("products")).with_timestamps(AUDITED))
            .with_route("orders", TableRoute::new(raw("orders")).with_timestamps(AUDITED))
            .with_route(
                "order_items",
                TableRoute::new(raw("order_items")).with_timestamps(AUDITED),
            )
            .with_route(
                "outbox_events",
                TableRoute::new(raw("outbox_events"))
                    .with_timestamps(&["created_at"])
                    .with_stringified(&["payload"]),
            )
    }

    pub fn get(&self, table: &str) -> Option<&TableRoute> {
        self.routes.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.routes.contains_key(table)
    }

    pub fn destination(&self, table: &str) -> Option<&str> {
        self.routes.get(table).map(|r| r.destination.as_str())
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Logical table name carried by a topic (`server.schema.table` → `table`).
pub fn table_from_topic(topic: &str) -> &str {
    topic.rsplit('.').next().unwrap_or(topic)
}
