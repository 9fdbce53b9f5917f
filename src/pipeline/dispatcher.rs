// Copyright 2025
// Licensed under the Elastic License v2.0

//! Flush trigger and dispatch
//!
//! Decides when a table's batch leaves the accumulator and drives the bulk
//! insert. Drained rows are never put back: a flush that still fails after
//! the bounded retry loses its rows, and the error says which offsets they
//! came from so the caller can hold back acknowledgement.

use hashbrown::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::{CanonicalRow, PartitionKey, Sink};
use crate::pipeline::batch::{BatchAccumulator, DrainedBatch};
use crate::routing::RouteTable;

/// Bounded retry with exponential backoff for sink calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per flush, including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): 100ms, 200ms, 400ms...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Outcome of a successful flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub table: String,
    pub destination: String,
    pub rows: usize,
    pub bytes: u64,
    pub attempts: u32,
}

/// A flush that failed after all attempts; its rows are gone
#[derive(Debug)]
pub struct FlushError {
    pub table: String,
    pub destination: String,
    pub rows_lost: usize,
    /// Lowest offset per partition among the lost rows
    pub lost_offsets: HashMap<PartitionKey, i64>,
    pub cause: anyhow::Error,
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flush of {} rows from {} into {} failed: {:#}",
            self.rows_lost, self.table, self.destination, self.cause
        )
    }
}

impl std::error::Error for FlushError {}

/// Result of draining every batch at shutdown
#[derive(Debug, Default)]
pub struct DrainReport {
    pub flushed: Vec<FlushReport>,
    pub failed: Vec<FlushError>,
}

impl DrainReport {
    pub fn rows_flushed(&self) -> usize {
        self.flushed.iter().map(|r| r.rows).sum()
    }

    pub fn rows_lost(&self) -> usize {
        self.failed.iter().map(|e| e.rows_lost).sum()
    }
}

pub struct FlushDispatcher {
    sink: Box<dyn Sink>,
    routes: Arc<RouteTable>,
    retry: RetryPolicy,
}

impl FlushDispatcher {
    pub fn new(sink: Box<dyn Sink>, routes: Arc<RouteTable>, retry: RetryPolicy) -> Self {
        Self {
            sink,
            routes,
            retry,
        }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Flushes the table's batch if it reached the size or time threshold.
    ///
    /// `Ok(None)` when nothing was sent (threshold not reached, or an empty
    /// batch whose clock was merely restarted).
    pub async fn maybe_flush(
        &self,
        acc: &mut BatchAccumulator,
        table: &str,
        now: Instant,
    ) -> Result<Option<FlushReport>, FlushError> {
        if !acc.should_flush(table, now) {
            return Ok(None);
        }
        let drained = acc.drain(table, now);
        if drained.is_empty() {
            return Ok(None);
        }
        self.send(table, drained).await.map(Some)
    }

    /// Time trigger: evaluates every known table.
    pub async fn flush_due(
        &self,
        acc: &mut BatchAccumulator,
        now: Instant,
    ) -> Vec<Result<FlushReport, FlushError>> {
        let mut outcomes = Vec::new();
        for table in acc.tables() {
            match self.maybe_flush(acc, &table, now).await {
                Ok(Some(report)) => outcomes.push(Ok(report)),
                Ok(None) => {}
                Err(e) => outcomes.push(Err(e)),
            }
        }
        outcomes
    }

    /// Flushes every non-empty batch once, ignoring thresholds.
    ///
    /// Failures are reported, not re-queued; all batches are empty afterwards.
    pub async fn drain_all(&self, acc: &mut BatchAccumulator, now: Instant) -> DrainReport {
        let mut report = DrainReport::default();
        for table in acc.pending_tables() {
            let drained = acc.drain(&table, now);
            match self.send(&table, drained).await {
                Ok(flushed) => report.flushed.push(flushed),
                Err(e) => {
                    error!(table = %table, rows = e.rows_lost, "Drain flush failed: {:#}", e.cause);
                    report.failed.push(e);
                }
            }
        }
        info!(
            "Drained {} tables: {} rows flushed, {} rows lost",
            report.flushed.len() + report.failed.len(),
            report.rows_flushed(),
            report.rows_lost()
        );
        report
    }

    async fn send(&self, table: &str, drained: DrainedBatch) -> Result<FlushReport, FlushError> {
        let Some(destination) = self.routes.destination(table) else {
            return Err(FlushError {
                table: table.to_string(),
                destination: String::new(),
                rows_lost: drained.len(),
                lost_offsets: drained.first_offsets,
                cause: anyhow::anyhow!("no route for table {}", table),
            });
        };

        match self.send_with_retry(destination, &drained.rows).await {
            Ok((bytes, attempts)) => {
                debug!(
                    table = %table,
                    destination = %destination,
                    rows = drained.len(),
                    bytes,
                    "Flushed batch"
                );
                Ok(FlushReport {
                    table: table.to_string(),
                    destination: destination.to_string(),
                    rows: drained.len(),
                    bytes,
                    attempts,
                })
            }
            Err(cause) => Err(FlushError {
                table: table.to_string(),
                destination: destination.to_string(),
                rows_lost: drained.len(),
                lost_offsets: drained.first_offsets,
                cause,
            }),
        }
    }

    /// Sends rows with exponential backoff retry. Returns (bytes, attempts).
    async fn send_with_retry(
        &self,
        destination: &str,
        rows: &[CanonicalRow],
    ) -> anyhow::Result<(u64, u32)> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.sink.insert_rows(destination, rows).await {
                Ok(result) => return Ok((result.bytes_written, attempt)),
                Err(e) => {
                    if attempt >= max_attempts {
                        return Err(e.context(format!("failed after {} attempts", attempt)));
                    }
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        "Retry {}/{} for {} in {:?}: {:#}",
                        attempt, max_attempts, destination, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::{SinkResult, SourcePosition, Value};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory sink recording every insert, optionally failing the first N calls
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub calls: Arc<Mutex<Vec<(String, Vec<CanonicalRow>)>>>,
        pub attempts: Arc<Mutex<u32>>,
        pub failures_left: Arc<Mutex<u32>>,
    }

    impl RecordingSink {
        pub(crate) fn failing(times: u32) -> Self {
            let sink = Self::default();
            *sink.failures_left.lock().unwrap() = times;
            sink
        }

        pub(crate) fn calls(&self) -> Vec<(String, Vec<CanonicalRow>)> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn attempts(&self) -> u32 {
            *self.attempts.lock().unwrap()
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn validate_connection(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn insert_rows(
            &self,
            destination: &str,
            rows: &[CanonicalRow],
        ) -> anyhow::Result<SinkResult> {
            *self.attempts.lock().unwrap() += 1;
            {
                let mut failures = self.failures_left.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(anyhow!("HTTP 503: sink unavailable"));
                }
            }
            self.calls
                .lock()
                .unwrap()
                .push((destination.to_string(), rows.to_vec()));
            Ok(SinkResult {
                records_written: rows.len(),
                bytes_written: (rows.len() * 10) as u64,
            })
        }
    }

    fn row(id: i64) -> CanonicalRow {
        let mut row = CanonicalRow::new();
        row.set("order_id", Value::Int(id));
        row
    }

    fn dispatcher(sink: RecordingSink) -> FlushDispatcher {
        FlushDispatcher::new(
            Box::new(sink),
            Arc::new(RouteTable::streamshop("analytics")),
            RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(10),
            },
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_size_trigger_sends_one_bulk_load() {
        let sink = RecordingSink::default();
        let dispatcher = dispatcher(sink.clone());
        let now = Instant::now();
        let mut acc = BatchAccumulator::new(200, Duration::from_secs(1));

        for id in 0..199 {
            acc.append("orders", row(id), None, now);
            assert_eq!(dispatcher.maybe_flush(&mut acc, "orders", now).await.unwrap(), None);
        }
        acc.append("orders", row(199), None, now);
        let report = dispatcher
            .maybe_flush(&mut acc, "orders", now)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.rows, 200);
        assert_eq!(report.destination, "analytics.raw_orders");
        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "analytics.raw_orders");
        assert_eq!(calls[0].1.len(), 200);
        assert_eq!(acc.pending_rows(), 0);
    }

    #[tokio::test]
    async fn test_stale_empty_batch_does_not_call_sink() {
        let sink = RecordingSink::default();
        let dispatcher = dispatcher(sink.clone());
        let start = Instant::now();
        let mut acc = BatchAccumulator::new(200, Duration::from_secs(1));
        acc.append("orders", row(1), None, start);
        acc.drain("orders", start);

        let later = start + Duration::from_secs(3);
        assert_eq!(dispatcher.maybe_flush(&mut acc, "orders", later).await.unwrap(), None);
        assert!(sink.calls().is_empty());
        assert_eq!(acc.get("orders").unwrap().last_flush(), later);
    }

    #[tokio::test]
    async fn test_flush_due_uses_time_trigger() {
        let sink = RecordingSink::default();
        let dispatcher = dispatcher(sink.clone());
        let start = Instant::now();
        let mut acc = BatchAccumulator::new(200, Duration::from_secs(1));
        acc.append("orders", row(1), None, start);
        acc.append("customers", row(2), None, start + Duration::from_millis(600));

        let outcomes = dispatcher
            .flush_due(&mut acc, start + Duration::from_millis(1000))
            .await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(sink.calls()[0].0, "analytics.raw_orders");
        assert_eq!(acc.pending_tables(), vec!["customers".to_string()]);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let sink = RecordingSink::failing(2);
        let dispatcher = dispatcher(sink.clone());
        let now = Instant::now();
        let mut acc = BatchAccumulator::new(1, Duration::from_secs(1));
        acc.append("orders", row(1), None, now);

        let report = dispatcher
            .maybe_flush(&mut acc, "orders", now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_drops_rows_and_reports_offsets() {
        let sink = RecordingSink::failing(10);
        let dispatcher = dispatcher(sink.clone());
        let now = Instant::now();
        let mut acc = BatchAccumulator::new(2, Duration::from_secs(1));
        acc.append("orders", row(1), Some(&SourcePosition::new("t", 0, 41)), now);
        acc.append("orders", row(2), Some(&SourcePosition::new("t", 0, 42)), now);

        let err = dispatcher
            .maybe_flush(&mut acc, "orders", now)
            .await
            .unwrap_err();
        assert_eq!(err.rows_lost, 2);
        assert_eq!(err.lost_offsets.get(&PartitionKey::new("t", 0)), Some(&41));
        assert!(err.to_string().contains("failed after 3 attempts"));
        assert_eq!(sink.attempts(), 3);
        // rows are not re-queued
        assert_eq!(acc.pending_rows(), 0);
    }

    #[tokio::test]
    async fn test_drain_all_flushes_each_table_once() {
        let sink = RecordingSink::default();
        let dispatcher = dispatcher(sink.clone());
        let now = Instant::now();
        let mut acc = BatchAccumulator::new(200, Duration::from_secs(60));
        acc.append("orders", row(1), None, now);
        acc.append("orders", row(2), None, now);
        acc.append("customers", row(3), None, now);
        acc.append("products", row(4), None, now);
        acc.drain("products", now);

        let report = dispatcher.drain_all(&mut acc, now).await;
        assert_eq!(report.flushed.len(), 2);
        assert_eq!(report.rows_flushed(), 3);
        assert!(report.failed.is_empty());

        let mut destinations: Vec<String> = sink.calls().into_iter().map(|(d, _)| d).collect();
        destinations.sort();
        assert_eq!(
            destinations,
            vec!["analytics.raw_customers".to_string(), "analytics.raw_orders".to_string()]
        );
        assert_eq!(acc.pending_rows(), 0);
        assert!(acc.pending_tables().is_empty());
    }

    #[tokio::test]
    async fn test_drain_all_reports_failures() {
        let sink = RecordingSink::failing(100);
        let dispatcher = dispatcher(sink.clone());
        let now = Instant::now();
        let mut acc = BatchAccumulator::default();
        acc.append("orders", row(1), None, now);

        let report = dispatcher.drain_all(&mut acc, now).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.rows_lost(), 1);
        assert_eq!(acc.pending_rows(), 0);
    }
}
