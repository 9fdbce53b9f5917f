// Copyright 2025
// Licensed under the Elastic License v2.0

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::core::position::SourcePosition;
use crate::core::record::{CanonicalRow, RawEnvelope};

/// One item read from the source stream
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// A decoded change event
    Envelope {
        envelope: RawEnvelope,
        position: SourcePosition,
    },
    /// A message without a value (log-compaction marker after a delete)
    Tombstone { position: SourcePosition },
    /// A message that failed deserialization
    Malformed {
        position: SourcePosition,
        reason: String,
    },
}

impl SourceEvent {
    pub fn position(&self) -> &SourcePosition {
        match self {
            SourceEvent::Envelope { position, .. }
            | SourceEvent::Tombstone { position }
            | SourceEvent::Malformed { position, .. } => position,
        }
    }
}

/// Result returned from sink write operations
#[derive(Debug, Clone, Default)]
pub struct SinkResult {
    pub records_written: usize,
    pub bytes_written: u64,
}

#[async_trait]
pub trait Source: Send {
    /// Returns the name of the source implementation
    fn name(&self) -> &'static str;

    /// Waits up to `timeout` for the next event.
    ///
    /// `Ok(None)` means nothing arrived in time. Errors are transient stream
    /// errors; the caller may keep polling.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<SourceEvent>>;

    /// Acknowledges consumption up to (excluding) the given offsets
    async fn commit(&mut self, positions: &[SourcePosition]) -> Result<()>;

    /// Releases the stream connection
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Returns the name of the sink implementation
    fn name(&self) -> &'static str;

    /// Validates the sink connection and configuration
    async fn validate_connection(&self) -> Result<()>;

    /// Bulk-inserts rows into the destination table
    async fn insert_rows(&self, destination: &str, rows: &[CanonicalRow]) -> Result<SinkResult>;
}
