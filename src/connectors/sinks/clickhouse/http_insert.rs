// Copyright 2025
// Licensed under the Elastic License v2.0

//! ClickHouse HTTP insert client
//!
//! One bulk load is one `POST /?query=INSERT INTO {table} FORMAT JSONEachRow`
//! whose body holds one JSON object per line. The request runs on libcurl
//! (via the `curl` crate) inside `spawn_blocking`.

use anyhow::{anyhow, Result};
use curl::easy::{Easy, List};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::config::ClickHouseSinkConfig;
use crate::core::{CanonicalRow, CoreError};

/// Longest server message kept in an error
const MAX_ERROR_BODY: usize = 512;

/// Result of a successful insert request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertResult {
    pub status: u32,
    pub bytes_sent: u64,
}

pub struct HttpInsertClient {
    base_url: Url,
    user: String,
    password: String,
    timeout: Duration,
}

impl HttpInsertClient {
    pub fn new(config: &ClickHouseSinkConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            timeout: config.timeout,
        }
    }

    /// Endpoint for a bulk load into `destination` (already validated).
    pub fn insert_url(&self, destination: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(Some(&format!(
            "query=INSERT INTO {} FORMAT JSONEachRow",
            destination
        )));
        url
    }

    pub fn ping_url(&self) -> Url {
        let mut url = self.base_url.clone();
        url.set_path("/ping");
        url
    }

    /// Verifies the HTTP interface answers `GET /ping`.
    pub async fn ping(&self) -> Result<()> {
        let url = self.ping_url().to_string();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let mut easy = Easy::new();
            easy.url(&url)?;
            easy.timeout(timeout)?;
            easy.connect_timeout(timeout.min(Duration::from_secs(5)))?;

            let mut response = Vec::new();
            {
                let mut transfer = easy.transfer();
                transfer.write_function(|data| {
                    response.extend_from_slice(data);
                    Ok(data.len())
                })?;
                transfer.perform()?;
            }

            let code = easy.response_code()?;
            parse_response(code, &response)
        })
        .await
        .map_err(|e| anyhow!("Task join error: {}", e))?
    }

    /// Posts a JSONEachRow body to the destination table.
    pub async fn insert(&self, destination: &str, body: Vec<u8>) -> Result<InsertResult> {
        let url = self.insert_url(destination).to_string();
        let user = self.user.clone();
        let password = self.password.clone();
        let timeout = self.timeout;
        let body = Arc::new(body);
        let destination = destination.to_string();

        tokio::task::spawn_blocking(move || {
            let (code, response) = Self::post_sync(&url, &user, &password, timeout, &body)?;
            parse_response(code, &response)?;
            debug!("Inserted {} bytes into {}", body.len(), destination);
            Ok(InsertResult {
                status: code,
                bytes_sent: body.len() as u64,
            })
        })
        .await
        .map_err(|e| anyhow!("Task join error: {}", e))?
    }

    /// Synchronous POST. Returns the status code and response body.
    fn post_sync(
        url: &str,
        user: &str,
        password: &str,
        timeout: Duration,
        body: &[u8],
    ) -> Result<(u32, Vec<u8>)> {
        let mut easy = Easy::new();
        easy.url(url)?;
        easy.post(true)?;
        easy.post_field_size(body.len() as u64)?;
        easy.username(user)?;
        easy.password(password)?;
        easy.timeout(timeout)?;
        easy.connect_timeout(timeout.min(Duration::from_secs(5)))?;

        let mut headers = List::new();
        headers.append("Content-Type: application/x-ndjson")?;
        easy.http_headers(headers)?;

        let mut response = Vec::new();
        let mut offset: usize = 0;
        {
            let mut transfer = easy.transfer();
            transfer.read_function(|buf| {
                let remaining = &body[offset..];
                let to_copy = remaining.len().min(buf.len());
                buf[..to_copy].copy_from_slice(&remaining[..to_copy]);
                offset += to_copy;
                Ok(to_copy)
            })?;
            transfer.write_function(|data| {
                response.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.perform()?;
        }

        let code = easy.response_code()?;
        Ok((code, response))
    }
}

/// Maps an HTTP response to success, or to an error carrying the server message.
pub fn parse_response(code: u32, body: &[u8]) -> Result<()> {
    if (200..300).contains(&code) {
        return Ok(());
    }

    let text = String::from_utf8_lossy(body);
    let mut message = text.trim().to_string();
    if message.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| message.is_char_boundary(*i))
            .unwrap_or(0);
        message.truncate(cut);
        message.push_str("...");
    }
    Err(CoreError::sink_error(format!("HTTP {}: {}", code, message)).into())
}

/// Serializes rows as JSONEachRow: one object per line, trailing newline.
pub fn encode_json_each_row(rows: &[CanonicalRow]) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(rows.len() * 128);
    for row in rows {
        serde_json::to_writer(&mut body, row)?;
        body.push(b'\n');
    }
    Ok(body)
}
