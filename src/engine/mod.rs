// Copyright 2025
// Licensed under the Elastic License v2.0

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::connectors::sinks::create_sink;
use crate::connectors::sources::create_source;
use crate::core::{Sink, Source};
use crate::pipeline::batch::BatchAccumulator;
use crate::pipeline::dispatcher::FlushDispatcher;
use crate::pipeline::{Pipeline, PipelineStats};
use crate::routing::RouteTable;

/// Wires the Kafka source, the ClickHouse sink and the pipeline together
pub struct SinkEngine {
    config: Config,
    routes: Arc<RouteTable>,
}

impl SinkEngine {
    /// Create new SinkEngine
    /// NOTE: Does NOT connect anywhere here. Connections are opened in run().
    pub fn new(config: Config) -> Self {
        let routes = Arc::new(RouteTable::streamshop(&config.sink.database));
        Self { config, routes }
    }

    /// Execute the sink until Ctrl-C, then drain and return the run counters
    pub async fn run(self) -> Result<PipelineStats> {
        let sink = self.init_sink().await?;
        let source = self.init_source()?;
        let pipeline = self.init_pipeline(source, sink);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self::spawn_signal_handler(shutdown_tx);

        info!("Connected! Streaming change events...");
        let stats = pipeline.run(shutdown_rx).await?;

        info!(
            "Shutdown complete: {} envelopes, {} rows flushed in {} flushes, {} rows lost",
            stats.envelopes, stats.rows_flushed, stats.flushes, stats.rows_lost
        );
        Ok(stats)
    }

    /// Initialize the sink and check the endpoint answers.
    /// An unreachable endpoint is only a warning: flushes retry on their own.
    async fn init_sink(&self) -> Result<Box<dyn Sink>> {
        let sink = create_sink(&self.config.sink)?;
        match sink.validate_connection().await {
            Ok(()) => info!("  [OK] Sink HTTP endpoint accessible"),
            Err(e) => warn!("Sink HTTP endpoint not reachable yet: {:#}", e),
        }
        Ok(sink)
    }

    fn init_source(&self) -> Result<Box<dyn Source>> {
        let source = create_source(&self.config.source)?;
        info!("  [OK] Subscribed to {}", self.config.source.topics_regex);
        Ok(source)
    }

    fn init_pipeline(&self, source: Box<dyn Source>, sink: Box<dyn Sink>) -> Pipeline {
        let dispatcher =
            FlushDispatcher::new(sink, self.routes.clone(), self.config.sink.retry_policy());
        let accumulator = BatchAccumulator::new(
            self.config.pipeline.flush_size,
            self.config.pipeline.flush_interval(),
        );

        info!("  Pipeline config:");
        info!("    - flush_size: {}", self.config.pipeline.flush_size);
        info!("    - flush_interval_ms: {}", self.config.pipeline.flush_interval_ms);
        for table in self.routes.tables() {
            if let Some(destination) = self.routes.destination(table) {
                info!("    - route: {} -> {}", table, destination);
            }
        }

        Pipeline::new(
            source,
            dispatcher,
            accumulator,
            self.routes.clone(),
            self.config.pipeline.options(),
        )
    }

    /// Flip the shutdown flag on Ctrl-C
    fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }
}
