// Copyright 2025
// Licensed under the Elastic License v2.0

#![warn(clippy::all)]

mod config;
mod connectors;
mod core;
mod engine;
#[cfg(feature = "generator")]
mod generator;
mod pipeline;
mod routing;
mod utils;

use anyhow::Result;
use dotenvy::dotenv;

use crate::config::Config;
use crate::engine::SinkEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenv().ok();

    #[cfg(feature = "generator")]
    {
        if std::env::var("GENERATOR_MODE").unwrap_or_default() == "true" {
            return generator::run().await;
        }
    }

    let config = Config::from_env()?;
    config.print_banner();
    let engine = SinkEngine::new(config);
    engine.run().await?;
    Ok(())
}
