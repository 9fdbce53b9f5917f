// Copyright 2025
// Licensed under the Elastic License v2.0

pub mod batch;
pub mod dispatcher;
pub mod normalizer;

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::{OffsetTracker, Source, SourceEvent, SourcePosition};
use crate::pipeline::batch::BatchAccumulator;
use crate::pipeline::dispatcher::{DrainReport, FlushDispatcher, FlushError, FlushReport};
use crate::pipeline::normalizer::normalize_now;
use crate::routing::RouteTable;

/// When consumed offsets are acknowledged to the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// The consumer commits in the background, independent of flushes
    #[default]
    BeforeFlush,
    /// The pipeline commits offsets whose rows were bulk-loaded
    AfterFlush,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::BeforeFlush => "before_flush",
            AckMode::AfterFlush => "after_flush",
        }
    }
}

impl FromStr for AckMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "before_flush" => Ok(AckMode::BeforeFlush),
            "after_flush" => Ok(AckMode::AfterFlush),
            other => Err(anyhow!(
                "unknown ack mode '{}' (expected before_flush or after_flush)",
                other
            )),
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub poll_timeout: Duration,
    pub ack_mode: AckMode,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1000),
            ack_mode: AckMode::BeforeFlush,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub envelopes: u64,
    pub rows_accumulated: u64,
    /// Envelopes without a usable row image or with an unknown operation
    pub discarded: u64,
    /// Rows dropped because a timestamp field could not be parsed
    pub rejected: u64,
    pub malformed: u64,
    pub unmapped: u64,
    pub flushes: u64,
    pub rows_flushed: u64,
    pub failed_flushes: u64,
    pub rows_lost: u64,
    pub commits: u64,
}

/// Sequential poll → normalize → accumulate → flush loop
pub struct Pipeline {
    source: Box<dyn Source>,
    dispatcher: FlushDispatcher,
    accumulator: BatchAccumulator,
    routes: Arc<RouteTable>,
    options: PipelineOptions,
    offsets: OffsetTracker,
    stats: PipelineStats,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn Source>,
        dispatcher: FlushDispatcher,
        accumulator: BatchAccumulator,
        routes: Arc<RouteTable>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            dispatcher,
            accumulator,
            routes,
            options,
            offsets: OffsetTracker::new(),
            stats: PipelineStats::default(),
            state: PipelineState::Running,
        }
    }

    /// Consumes until the shutdown signal is set (or its sender is dropped),
    /// then drains every pending batch and closes the source.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<PipelineStats> {
        info!(
            "Pipeline started: {} -> {} ({} tables, flush at {} rows or {:?}, ack {})",
            self.source.name(),
            self.dispatcher.sink_name(),
            self.routes.len(),
            self.accumulator.batch_size(),
            self.accumulator.flush_interval(),
            self.options.ack_mode
        );

        let poll_timeout = self.options.poll_timeout;

        while self.state == PipelineState::Running {
            if *shutdown.borrow() {
                info!("Shutdown requested, draining pipeline");
                self.state = PipelineState::Draining;
                break;
            }

            let polled = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed, draining pipeline");
                        self.state = PipelineState::Draining;
                    }
                    continue;
                }
                polled = self.source.poll(poll_timeout) => polled,
            };

            let mut flushed = false;
            match polled {
                Ok(Some(event)) => flushed |= self.handle_event(event).await,
                Ok(None) => {}
                Err(e) => warn!("Source poll failed, continuing: {:#}", e),
            }

            let outcomes = self
                .dispatcher
                .flush_due(&mut self.accumulator, Instant::now())
                .await;
            for outcome in outcomes {
                flushed |= self.record_flush(outcome.map(Some));
            }

            if flushed {
                self.commit().await;
            }
        }

        self.drain().await;
        Ok(self.stats)
    }

    /// Returns true when the event caused a successful flush.
    async fn handle_event(&mut self, event: SourceEvent) -> bool {
        let (envelope, position) = match event {
            SourceEvent::Malformed { position, reason } => {
                self.stats.malformed += 1;
                self.offsets.observe(&position);
                warn!(position = %position, "Skipping malformed message: {}", reason);
                return false;
            }
            SourceEvent::Tombstone { position } => {
                self.offsets.observe(&position);
                debug!(position = %position, "Skipping tombstone");
                return false;
            }
            SourceEvent::Envelope { envelope, position } => {
                self.stats.envelopes += 1;
                self.offsets.observe(&position);
                (envelope, position)
            }
        };

        if !self.routes.contains(&envelope.table) {
            self.stats.unmapped += 1;
            debug!(table = %envelope.table, "No route for table, skipping");
            return false;
        }

        let row = match normalize_now(&envelope, &self.routes) {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.stats.discarded += 1;
                debug!(
                    table = %envelope.table,
                    op = %envelope.operation,
                    "Discarding envelope without usable row image"
                );
                return false;
            }
            Err(e) => {
                self.stats.rejected += 1;
                warn!(position = %position, "Dropping row: {}", e);
                return false;
            }
        };

        let table = envelope.table;
        self.accumulator
            .append(&table, row, Some(&position), Instant::now());
        self.stats.rows_accumulated += 1;

        let outcome = self
            .dispatcher
            .maybe_flush(&mut self.accumulator, &table, Instant::now())
            .await;
        self.record_flush(outcome)
    }

    fn record_flush(&mut self, outcome: Result<Option<FlushReport>, FlushError>) -> bool {
        match outcome {
            Ok(Some(report)) => {
                self.stats.flushes += 1;
                self.stats.rows_flushed += report.rows as u64;
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.record_failure(&e);
                false
            }
        }
    }

    fn record_failure(&mut self, e: &FlushError) {
        self.stats.failed_flushes += 1;
        self.stats.rows_lost += e.rows_lost as u64;
        error!(table = %e.table, rows = e.rows_lost, "Dropping batch: {}", e);
        if self.options.ack_mode == AckMode::AfterFlush {
            self.offsets.pin(&e.lost_offsets);
        }
    }

    /// Commits flushed offsets in after-flush mode.
    async fn commit(&mut self) {
        if self.options.ack_mode != AckMode::AfterFlush {
            return;
        }
        let targets: Vec<SourcePosition> = self
            .offsets
            .commit_targets(&self.accumulator.low_water_marks());
        if targets.is_empty() {
            return;
        }
        match self.source.commit(&targets).await {
            Ok(()) => {
                debug!("Committed {} partitions", targets.len());
                self.offsets.mark_committed(&targets);
                self.stats.commits += 1;
            }
            Err(e) => warn!("Offset commit failed, will retry after next flush: {:#}", e),
        }
    }

    async fn drain(&mut self) {
        self.state = PipelineState::Draining;

        let report: DrainReport = self
            .dispatcher
            .drain_all(&mut self.accumulator, Instant::now())
            .await;
        for flushed in &report.flushed {
            self.stats.flushes += 1;
            self.stats.rows_flushed += flushed.rows as u64;
        }
        for failed in &report.failed {
            self.record_failure(failed);
        }

        self.commit().await;

        if let Err(e) = self.source.close().await {
            warn!("Failed to close source: {:#}", e);
        }

        let stats = &self.stats;
        info!(
            envelopes = stats.envelopes,
            rows = stats.rows_accumulated,
            discarded = stats.discarded,
            rejected = stats.rejected,
            malformed = stats.malformed,
            unmapped = stats.unmapped,
            flushes = stats.flushes,
            rows_flushed = stats.rows_flushed,
            failed_flushes = stats.failed_flushes,
            rows_lost = stats.rows_lost,
            commits = stats.commits,
            "Pipeline shutdown complete"
        );
    }
}
