// Copyright 2025
// Licensed under the Elastic License v2.0

//! # Sink Connectors
//!
//! Sink connector implementations that bulk-load canonical rows into the
//! analytical store. Each sink implements the `Sink` trait from
//! `crate::core::traits`.
//!
//! ## Available Sinks
//!
//! - **ClickHouse**: HTTP interface, `JSONEachRow` inserts
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crate::connectors::sinks::create_sink;
//!
//! let sink = create_sink(&config.sink)?;
//! sink.validate_connection().await?;
//! sink.insert_rows("analytics.raw_orders", &rows).await?;
//! ```

pub mod clickhouse;

use anyhow::Result;

use self::clickhouse::ClickHouseSink;
use crate::config::SinkConfig;
use crate::core::Sink;

/// Creates the sink connector for the provided configuration.
///
/// # Errors
///
/// Returns an error if the endpoint derived from the configuration is invalid
pub fn create_sink(config: &SinkConfig) -> Result<Box<dyn Sink>> {
    let sink = ClickHouseSink::new(config)?;
    Ok(Box::new(sink))
}
