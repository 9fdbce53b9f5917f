// Copyright 2025
// Licensed under the Elastic License v2.0

//! # ClickHouse Sink Connector
//!
//! Writes canonical rows to ClickHouse through its HTTP interface using the
//! `JSONEachRow` input format.
//!
//! ## Architecture
//!
//! ```text
//! CanonicalRow[] ---> ClickHouseSink ---> HttpInsertClient ---> ClickHouse
//!                          |                    |                  |
//!                          v                    v                  v
//!                   identifier check     http_insert.rs       HTTP 8123
//!                   (utils.rs)           (curl POST)     INSERT ... FORMAT JSONEachRow
//! ```
//!
//! Destination tables are expected to be `ReplacingMergeTree(_version)`
//! (or similar) so replays and out-of-order rows collapse on `_version`,
//! with `_deleted` marking tombstoned keys. The sink never creates tables.

mod config;
pub mod http_insert;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::SinkConfig;
use crate::core::{CanonicalRow, Sink, SinkResult};
use crate::utils::validate_table_identifier;

pub use self::config::ClickHouseSinkConfig;
use self::http_insert::{encode_json_each_row, HttpInsertClient};

pub struct ClickHouseSink {
    config: ClickHouseSinkConfig,
    client: HttpInsertClient,
}

impl ClickHouseSink {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let ch_config = ClickHouseSinkConfig::from_sink_config(config)?;
        let client = HttpInsertClient::new(&ch_config);

        info!("ClickHouseSink initialized:");
        info!("  HTTP URL: {}", ch_config.base_url);
        info!("  Database: {}", ch_config.database);
        info!("  User: {}", ch_config.user);
        info!("  Timeout: {:?}", ch_config.timeout);

        Ok(Self {
            config: ch_config,
            client,
        })
    }
}

#[async_trait]
impl Sink for ClickHouseSink {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn validate_connection(&self) -> Result<()> {
        self.client.ping().await?;
        debug!("ClickHouse at {} answered ping", self.config.base_url);
        Ok(())
    }

    async fn insert_rows(&self, destination: &str, rows: &[CanonicalRow]) -> Result<SinkResult> {
        if rows.is_empty() {
            return Ok(SinkResult::default());
        }

        let destination = validate_table_identifier(destination)?;
        let body = encode_json_each_row(rows)?;
        let result = self.client.insert(destination, body).await?;

        debug!(
            destination,
            rows = rows.len(),
            bytes = result.bytes_sent,
            status = result.status,
            "Bulk load accepted"
        );

        Ok(SinkResult {
            records_written: rows.len(),
            bytes_written: result.bytes_sent,
        })
    }
}
