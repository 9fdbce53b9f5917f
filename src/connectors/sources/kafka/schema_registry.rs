// Copyright 2025
// Licensed under the Elastic License v2.0

//! Confluent schema registry lookups
//!
//! Writer schemas are immutable per id, so every id is fetched once and kept
//! for the lifetime of the process.

use anyhow::{Context, Result};
use apache_avro::Schema;
use hashbrown::HashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::{CoreError, CoreResult};

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    schema: String,
}

pub struct SchemaRegistryClient {
    base_url: String,
    http: reqwest::Client,
    cache: RwLock<HashMap<u32, Arc<Schema>>>,
}

impl SchemaRegistryClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build schema registry HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the writer schema registered under `id`.
    pub async fn schema(&self, id: u32) -> CoreResult<Arc<Schema>> {
        if let Some(schema) = self.cache.read().await.get(&id) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(self.fetch(id).await?);
        self.cache.write().await.insert(id, Arc::clone(&schema));
        debug!(schema_id = id, "Cached writer schema");
        Ok(schema)
    }

    async fn fetch(&self, id: u32) -> CoreResult<Schema> {
        let url = format!("{}/schemas/ids/{}", self.base_url, id);

        let response = self.http.get(&url).send().await.map_err(|e| {
            CoreError::source_error_with_cause(format!("schema registry request for id {} failed", id), e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::source_error(format!(
                "schema registry returned {} for id {}: {}",
                status,
                id,
                body.trim()
            )));
        }

        let body: SchemaResponse = response.json().await.map_err(|e| {
            CoreError::serialization_error_with_cause(
                format!("unexpected schema registry response for id {}", id),
                e,
            )
        })?;

        parse_schema(id, &body.schema)
    }

    #[cfg(test)]
    pub(crate) async fn register(&self, id: u32, schema: Schema) {
        self.cache.write().await.insert(id, Arc::new(schema));
    }
}

fn parse_schema(id: u32, raw: &str) -> CoreResult<Schema> {
    Schema::parse_str(raw).map_err(|e| {
        CoreError::serialization_error(format!("invalid Avro schema for id {}: {}", id, e))
    })
}
