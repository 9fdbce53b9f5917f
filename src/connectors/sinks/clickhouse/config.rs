// Copyright 2025
// Licensed under the Elastic License v2.0

//! ClickHouse Sink Configuration
//!
//! Derives the HTTP interface endpoint and credentials from the generic
//! `SinkConfig`.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

use crate::config::SinkConfig;

/// Default port of the ClickHouse HTTP interface
const DEFAULT_HTTP_PORT: u16 = 8123;

#[derive(Clone)]
pub struct ClickHouseSinkConfig {
    /// HTTP interface root (e.g. `http://clickhouse:8123/`)
    pub base_url: Url,

    /// Database holding the destination tables
    pub database: String,

    pub user: String,

    pub password: String,

    /// Upper bound for one request
    pub timeout: Duration,
}

impl std::fmt::Debug for ClickHouseSinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseSinkConfig")
            .field("base_url", &self.base_url.as_str())
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClickHouseSinkConfig {
    pub fn from_sink_config(config: &SinkConfig) -> Result<Self> {
        Ok(Self {
            base_url: Self::base_url(&config.host, config.port)?,
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            timeout: config.timeout,
        })
    }

    /// Builds the endpoint root from a host that may carry a scheme or port.
    ///
    /// - Adds `http://` if missing
    /// - Uses `port` unless the host already names one
    fn base_url(host: &str, port: u16) -> Result<Url> {
        let host = host.trim().trim_end_matches('/');
        let raw = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        };

        let mut url = Url::parse(&raw).with_context(|| format!("Invalid ClickHouse host: {}", host))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(anyhow!("Invalid ClickHouse host: {}", host));
        }
        if url.port().is_none() {
            let port = if port == 0 { DEFAULT_HTTP_PORT } else { port };
            url.set_port(Some(port))
                .map_err(|_| anyhow!("Cannot set port {} on {}", port, url))?;
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink_config(host: &str, port: u16) -> SinkConfig {
        SinkConfig {
            host: host.to_string(),
            port,
            database: "analytics".to_string(),
            user: "analytics".to_string(),
            password: "secret".to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_base_url_from_bare_host() {
        let config = ClickHouseSinkConfig::from_sink_config(&sink_config("clickhouse", 8123)).unwrap();
        assert_eq!(config.base_url.as_str(), "http://clickhouse:8123/");
        assert_eq!(config.database, "analytics");
    }

    #[test]
    fn test_base_url_keeps_scheme_and_port() {
        let config =
            ClickHouseSinkConfig::from_sink_config(&sink_config("https://ch.example.com:8443/", 8123))
                .unwrap();
        assert_eq!(config.base_url.as_str(), "https://ch.example.com:8443/");

        let config = ClickHouseSinkConfig::from_sink_config(&sink_config("localhost", 0)).unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:8123/");
    }

    #[test]
    fn test_invalid_host() {
        assert!(ClickHouseSinkConfig::from_sink_config(&sink_config("", 8123)).is_err());
        assert!(ClickHouseSinkConfig::from_sink_config(&sink_config("local host", 8123)).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ClickHouseSinkConfig::from_sink_config(&sink_config("localhost", 8123)).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
