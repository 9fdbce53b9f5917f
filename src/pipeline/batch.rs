// Copyright 2025
// Licensed under the Elastic License v2.0

use hashbrown::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::{CanonicalRow, PartitionKey, SourcePosition};

/// Default row count that forces a flush
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Default staleness that forces a flush
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Pending rows of one destination table
#[derive(Debug)]
pub struct Batch {
    rows: Vec<CanonicalRow>,
    last_flush: Instant,
    /// Lowest source offset per partition among `rows`
    first_offsets: HashMap<PartitionKey, i64>,
}

impl Batch {
    fn new(now: Instant) -> Self {
        Self {
            rows: Vec::new(),
            last_flush: now,
            first_offsets: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }
}

/// Rows taken out of a batch by `drain`
#[derive(Debug, Default)]
pub struct DrainedBatch {
    pub rows: Vec<CanonicalRow>,
    pub first_offsets: HashMap<PartitionKey, i64>,
}

impl DrainedBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Per-table batches sharing one size threshold and one flush interval.
///
/// Owned by the consumption loop; rows for a table keep their arrival order.
#[derive(Debug)]
pub struct BatchAccumulator {
    batches: HashMap<String, Batch>,
    batch_size: usize,
    flush_interval: Duration,
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL)
    }
}

impl BatchAccumulator {
    pub fn new(batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            batches: HashMap::new(),
            batch_size: batch_size.max(1),
            flush_interval,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Appends a row, creating the table's batch on first use.
    pub fn append(
        &mut self,
        table: &str,
        row: CanonicalRow,
        position: Option<&SourcePosition>,
        now: Instant,
    ) {
        let batch = self
            .batches
            .entry_ref(table)
            .or_insert_with(|| Batch::new(now));

        if let Some(position) = position {
            let first = batch
                .first_offsets
                .entry(position.partition_key())
                .or_insert(position.offset);
            if position.offset < *first {
                *first = position.offset;
            }
        }
        batch.rows.push(row);
    }

    /// True when the batch reached the size threshold or went stale.
    pub fn should_flush(&self, table: &str, now: Instant) -> bool {
        match self.batches.get(table) {
            Some(batch) => {
                batch.rows.len() >= self.batch_size
                    || now.saturating_duration_since(batch.last_flush) >= self.flush_interval
            }
            None => false,
        }
    }

    /// Takes every pending row of the table and restarts its flush clock.
    pub fn drain(&mut self, table: &str, now: Instant) -> DrainedBatch {
        match self.batches.get_mut(table) {
            Some(batch) => {
                batch.last_flush = now;
                DrainedBatch {
                    rows: std::mem::take(&mut batch.rows),
                    first_offsets: std::mem::take(&mut batch.first_offsets),
                }
            }
            None => DrainedBatch::default(),
        }
    }

    pub fn get(&self, table: &str) -> Option<&Batch> {
        self.batches.get(table)
    }

    /// Tables that have a batch, in stable order.
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.batches.keys().cloned().collect();
        tables.sort();
        tables
    }

    /// Tables with at least one pending row, in stable order.
    pub fn pending_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .batches
            .iter()
            .filter(|(_, batch)| !batch.is_empty())
            .map(|(table, _)| table.clone())
            .collect();
        tables.sort();
        tables
    }

    pub fn pending_rows(&self) -> usize {
        self.batches.values().map(Batch::len).sum()
    }

    /// Lowest pending source offset per partition across all batches.
    pub fn low_water_marks(&self) -> HashMap<PartitionKey, i64> {
        let mut marks: HashMap<PartitionKey, i64> = HashMap::new();
        for batch in self.batches.values() {
            for (key, offset) in &batch.first_offsets {
                let entry = marks.entry(key.clone()).or_insert(*offset);
                if *offset < *entry {
                    *entry = *offset;
                }
            }
        }
        marks
    }
}
