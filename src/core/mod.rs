// Copyright 2025
// Licensed under the Elastic License v2.0

pub mod error;
pub mod position;
pub mod record;
pub mod traits;

pub use error::{CoreError, CoreResult};
pub use position::{OffsetTracker, PartitionKey, SourcePosition};
pub use record::{CanonicalRow, Operation, RawEnvelope, RowImage, Value};
pub use traits::{Sink, SinkResult, Source, SourceEvent};
