// Copyright 2025
// Licensed under the Elastic License v2.0

//! Consumer context logging group rebalances and commit results.
//!
//! Callbacks run on librdkafka's background thread; the counter is atomic.

use rdkafka::client::ClientContext;
use rdkafka::consumer::{ConsumerContext, Rebalance};
use rdkafka::error::KafkaResult;
use rdkafka::TopicPartitionList;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct LoggingConsumerContext {
    rebalances: AtomicU64,
}

impl LoggingConsumerContext {
    pub fn rebalance_count(&self) -> u64 {
        self.rebalances.load(Ordering::Relaxed)
    }
}

impl ClientContext for LoggingConsumerContext {}

impl ConsumerContext for LoggingConsumerContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                self.rebalances.fetch_add(1, Ordering::Relaxed);
                info!(partitions_assigned = tpl.count(), "Kafka rebalance: partitions assigned");
            }
            Rebalance::Revoke(tpl) => {
                self.rebalances.fetch_add(1, Ordering::Relaxed);
                info!(partitions_revoked = tpl.count(), "Kafka rebalance: partitions revoked");
            }
            Rebalance::Error(e) => {
                warn!(error = %e, "Kafka rebalance error");
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(partitions = offsets.count(), "Offsets committed"),
            Err(e) => warn!(error = %e, "Offset commit failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_has_no_rebalances() {
        let context = LoggingConsumerContext::default();
        assert_eq!(context.rebalance_count(), 0);
    }
}
