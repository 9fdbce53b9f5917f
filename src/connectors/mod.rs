// Copyright 2025
// Licensed under the Elastic License v2.0

//! Connectors module
//!
//! Sources and sinks behind the `Source` / `Sink` traits. Each connector type
//! is self-contained in its own submodule with its configuration, connection
//! handling and wire format.
//!
//! # Sources
//! - `kafka` - Debezium change events from Kafka (Avro via schema registry, or JSON)
//!
//! # Sinks
//! - `clickhouse` - ClickHouse via the HTTP interface (`JSONEachRow`)

pub mod sinks;
pub mod sources;
