// Copyright 2025
// Licensed under the Elastic License v2.0

//! Synthetic shop workload
//!
//! Writes orders, status changes and price changes into the PostgreSQL
//! database that Debezium captures, so the whole chain can be exercised
//! without a real application. Enabled with the `generator` feature and
//! started with `GENERATOR_MODE=true`.

pub mod traffic;

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use self::traffic::TrafficGenerator;

/// PostgreSQL connection settings read from the usual `PG*` variables
#[derive(Clone)]
pub struct GeneratorConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub interval: Duration,
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("interval", &self.interval)
            .finish()
    }
}

impl GeneratorConfig {
    pub fn from_env() -> Self {
        let var = |name: &str, default: &str| env::var(name).unwrap_or_else(|_| default.to_string());

        let port = var("PGPORT", "5432").parse().unwrap_or_else(|_| {
            warn!("Invalid PGPORT, using 5432");
            5432
        });
        let interval_ms = var("GENERATOR_INTERVAL_MS", "1000").parse().unwrap_or_else(|_| {
            warn!("Invalid GENERATOR_INTERVAL_MS, using 1000");
            1000
        });

        Self {
            host: var("PGHOST", "localhost"),
            port,
            database: var("PGDATABASE", "streamshop"),
            user: var("PGUSER", "postgres"),
            password: var("PGPASSWORD", "postgres"),
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .password(&self.password);
        pg
    }
}

/// Runs the generator until Ctrl-C.
pub async fn run() -> Result<()> {
    let config = GeneratorConfig::from_env();
    info!(
        "Traffic generator: postgres {}:{}/{} every {:?}",
        config.host, config.port, config.database, config.interval
    );

    let (client, connection) = config
        .pg_config()
        .connect(tokio_postgres::NoTls)
        .await
        .with_context(|| format!("Failed to connect to PostgreSQL at {}:{}", config.host, config.port))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("Traffic generator connection error: {}", e);
        }
    });

    let mut generator = TrafficGenerator::new(client);
    generator.seed().await?;

    let mut ticker = tokio::time::interval(config.interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Traffic generator stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(e) = generator.step().await {
                    warn!("Traffic generator DB error: {:#}", e);
                }
            }
        }
    }
}
