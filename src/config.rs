// Copyright 2025
// Licensed under the Elastic License v2.0

use anyhow::{bail, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::pipeline::dispatcher::RetryPolicy;
use crate::pipeline::{AckMode, PipelineOptions};

const DEFAULT_TOPICS_REGEX: &str =
    r"^streamshop\.public\.(customers|products|orders|order_items|outbox_events)$";

// =============================================================================
// Source Configuration
// =============================================================================

/// Encoding of the change events on the topics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Confluent wire format, writer schema from the schema registry
    Avro,
    /// Schema-less JSON, optionally wrapped in `{"schema", "payload"}`
    Json,
}

impl SourceFormat {
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "avro" => Ok(SourceFormat::Avro),
            "json" => Ok(SourceFormat::Json),
            other => bail!("Unsupported source format: '{}'. Supported: avro, json", other),
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFormat::Avro => write!(f, "avro"),
            SourceFormat::Json => write!(f, "json"),
        }
    }
}

/// Kafka consumer configuration
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub bootstrap_servers: String,
    pub group_id: String,
    pub topics_regex: String,
    pub format: SourceFormat,
    pub schema_registry_url: String,
    /// Mirrors `PipelineConfig::ack_mode`; decides `enable.auto.commit`
    pub ack_mode: AckMode,
}

// =============================================================================
// Sink Configuration
// =============================================================================

/// ClickHouse HTTP interface configuration
#[derive(Clone)]
pub struct SinkConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Upper bound for one insert request
    pub timeout: Duration,
    /// Attempts per flush, including the first
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl std::fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl SinkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            initial_backoff: self.retry_backoff,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub flush_size: usize,
    pub flush_interval_ms: u64,
    pub poll_timeout_ms: u64,
    pub ack_mode: AckMode,
}

impl PipelineConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            ack_mode: self.ack_mode,
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Central configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub pipeline: PipelineConfig,
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Read optional environment variable with default
fn optional_env(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read numeric environment variable, falling back to the default when unset or unparseable
fn numeric_env<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Invalid value '{}' for {}, using default {}", raw, name, default);
                default
            }
        },
        Err(_) => default,
    }
}

// =============================================================================
// Config Implementation
// =============================================================================

impl Config {
    /// Load configuration from environment variables
    ///
    /// Every variable is optional. Unknown `SOURCE_FORMAT` / `ACK_MODE` values
    /// and `FLUSH_SIZE=0` are rejected.
    pub fn from_env() -> Result<Self> {
        // Pipeline configuration
        let ack_mode: AckMode = optional_env("ACK_MODE", "before_flush").parse()?;

        let flush_size: usize = numeric_env("FLUSH_SIZE", 200);
        if flush_size == 0 {
            bail!("FLUSH_SIZE must be greater than zero");
        }

        let pipeline = PipelineConfig {
            flush_size,
            flush_interval_ms: numeric_env("FLUSH_INTERVAL_MS", 1000),
            poll_timeout_ms: numeric_env("POLL_TIMEOUT_MS", 1000),
            ack_mode,
        };

        // Source configuration
        let format = SourceFormat::from_str(&optional_env("SOURCE_FORMAT", "avro"))?;

        let source = SourceConfig {
            bootstrap_servers: optional_env("KAFKA_BOOTSTRAP_SERVERS", "localhost:19092"),
            group_id: optional_env("KAFKA_GROUP_ID", "cdc-sink"),
            topics_regex: optional_env("KAFKA_TOPICS_REGEX", DEFAULT_TOPICS_REGEX),
            format,
            schema_registry_url: optional_env("SCHEMA_REGISTRY_URL", "http://localhost:18081"),
            ack_mode,
        };

        // Sink configuration
        let sink = SinkConfig {
            host: optional_env("CLICKHOUSE_HOST", "localhost"),
            port: numeric_env("CLICKHOUSE_PORT", 8123),
            database: optional_env("CLICKHOUSE_DATABASE", "analytics"),
            user: optional_env("CLICKHOUSE_USER", "analytics"),
            password: optional_env("CLICKHOUSE_PASSWORD", "analytics"),
            timeout: Duration::from_secs(numeric_env("SINK_TIMEOUT_SECS", 10)),
            max_retries: numeric_env("SINK_MAX_RETRIES", 3),
            retry_backoff: Duration::from_millis(numeric_env("SINK_RETRY_BACKOFF_MS", 100)),
        };

        Ok(Self {
            source,
            sink,
            pipeline,
        })
    }

    /// Log the effective configuration
    pub fn print_banner(&self) {
        info!("Starting chmirror...");
        info!(
            "Source: Kafka {} (group: {}, format: {})",
            self.source.bootstrap_servers, self.source.group_id, self.source.format
        );
        info!("Topics: {}", self.source.topics_regex);
        if self.source.format == SourceFormat::Avro {
            info!("Schema registry: {}", self.source.schema_registry_url);
        }
        info!(
            "Sink: ClickHouse {}:{} (db: {}, user: {}, password: [REDACTED])",
            self.sink.host, self.sink.port, self.sink.database, self.sink.user
        );
        info!(
            "Delivery: timeout {:?}, {} attempts, backoff from {:?}",
            self.sink.timeout, self.sink.max_retries, self.sink.retry_backoff
        );
        info!(
            "Flush: {} rows or {}ms interval, poll timeout {}ms, ack {}",
            self.pipeline.flush_size,
            self.pipeline.flush_interval_ms,
            self.pipeline.poll_timeout_ms,
            self.pipeline.ack_mode
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "KAFKA_BOOTSTRAP_SERVERS",
        "KAFKA_GROUP_ID",
        "KAFKA_TOPICS_REGEX",
        "SOURCE_FORMAT",
        "SCHEMA_REGISTRY_URL",
        "CLICKHOUSE_HOST",
        "CLICKHOUSE_PORT",
        "CLICKHOUSE_USER",
        "CLICKHOUSE_PASSWORD",
        "CLICKHOUSE_DATABASE",
        "SINK_TIMEOUT_SECS",
        "SINK_MAX_RETRIES",
        "SINK_RETRY_BACKOFF_MS",
        "FLUSH_SIZE",
        "FLUSH_INTERVAL_MS",
        "POLL_TIMEOUT_MS",
        "ACK_MODE",
    ];

    fn clear_env_vars() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env_vars();

        let config = Config::from_env().unwrap();

        assert_eq!(config.source.bootstrap_servers, "localhost:19092");
        assert_eq!(config.source.group_id, "cdc-sink");
        assert_eq!(config.source.topics_regex, DEFAULT_TOPICS_REGEX);
        assert_eq!(config.source.format, SourceFormat::Avro);
        assert_eq!(config.source.schema_registry_url, "http://localhost:18081");
        assert_eq!(config.sink.host, "localhost");
        assert_eq!(config.sink.port, 8123);
        assert_eq!(config.sink.user, "analytics");
        assert_eq!(config.sink.password, "analytics");
        assert_eq!(config.sink.database, "analytics");
        assert_eq!(config.sink.timeout, Duration::from_secs(10));
        assert_eq!(config.sink.retry_policy(), RetryPolicy::default());
        assert_eq!(config.pipeline.flush_size, 200);
        assert_eq!(config.pipeline.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.pipeline.poll_timeout_ms, 1000);
        assert_eq!(config.pipeline.ack_mode, AckMode::BeforeFlush);
        assert_eq!(config.source.ack_mode, AckMode::BeforeFlush);

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env_vars();

        env::set_var("KAFKA_BOOTSTRAP_SERVERS", "redpanda:9092");
        env::set_var("KAFKA_GROUP_ID", "mirror-2");
        env::set_var("SOURCE_FORMAT", "JSON");
        env::set_var("CLICKHOUSE_HOST", "ch.local");
        env::set_var("CLICKHOUSE_PORT", "18123");
        env::set_var("CLICKHOUSE_DATABASE", "warehouse");
        env::set_var("SINK_MAX_RETRIES", "5");
        env::set_var("SINK_RETRY_BACKOFF_MS", "250");
        env::set_var("FLUSH_SIZE", "1000");
        env::set_var("FLUSH_INTERVAL_MS", "250");
        env::set_var("ACK_MODE", "after_flush");

        let config = Config::from_env().unwrap();

        assert_eq!(config.source.bootstrap_servers, "redpanda:9092");
        assert_eq!(config.source.group_id, "mirror-2");
        assert_eq!(config.source.format, SourceFormat::Json);
        assert_eq!(config.sink.host, "ch.local");
        assert_eq!(config.sink.port, 18123);
        assert_eq!(config.sink.database, "warehouse");
        assert_eq!(
            config.sink.retry_policy(),
            RetryPolicy {
                max_attempts: 5,
                initial_backoff: Duration::from_millis(250),
            }
        );
        assert_eq!(config.pipeline.flush_size, 1000);
        assert_eq!(config.pipeline.flush_interval_ms, 250);
        assert_eq!(config.pipeline.options().ack_mode, AckMode::AfterFlush);
        assert_eq!(config.source.ack_mode, AckMode::AfterFlush);

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_unparseable_numbers_fall_back() {
        clear_env_vars();

        env::set_var("CLICKHOUSE_PORT", "http");
        env::set_var("FLUSH_INTERVAL_MS", "-5");
        env::set_var("POLL_TIMEOUT_MS", "soon");

        let config = Config::from_env().unwrap();
        assert_eq!(config.sink.port, 8123);
        assert_eq!(config.pipeline.flush_interval_ms, 1000);
        assert_eq!(config.pipeline.poll_timeout_ms, 1000);

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_invalid_enums_and_zero_flush_size_are_rejected() {
        clear_env_vars();

        env::set_var("SOURCE_FORMAT", "protobuf");
        assert!(Config::from_env().is_err());
        clear_env_vars();

        env::set_var("ACK_MODE", "sometimes");
        assert!(Config::from_env().is_err());
        clear_env_vars();

        env::set_var("FLUSH_SIZE", "0");
        assert!(Config::from_env().is_err());

        clear_env_vars();
    }

    #[test]
    fn test_debug_redacts_password() {
        let sink = SinkConfig {
            host: "localhost".into(),
            port: 8123,
            database: "analytics".into(),
            user: "analytics".into(),
            password: "hunter2".into(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        };
        let rendered = format!("{:?}", sink);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_source_format_parsing() {
        assert_eq!(SourceFormat::from_str("avro").unwrap(), SourceFormat::Avro);
        assert_eq!(SourceFormat::from_str("Json").unwrap(), SourceFormat::Json);
        assert!(SourceFormat::from_str("csv").is_err());
    }
}
