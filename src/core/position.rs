// Copyright 2025
// Licensed under the Elastic License v2.0

use hashbrown::HashMap;
use std::fmt;

/// Topic-partition pair owning a sequence of offsets
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub topic: String,
    pub partition: i32,
}

impl PartitionKey {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

/// Position of one consumed message in the source stream.
///
/// When used as a commit target, `offset` is the next offset to consume.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl SourcePosition {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(self.topic.clone(), self.partition)
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// Tracks consumed offsets per partition and computes commit targets.
///
/// A partition's commit target is the lowest offset still pending in a batch
/// (so it is redelivered after a restart), or one past the highest consumed
/// offset when nothing is pending. Pinned offsets cap the target permanently;
/// they mark rows that were lost by a failed flush.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    consumed: HashMap<PartitionKey, i64>,
    committed: HashMap<PartitionKey, i64>,
    pinned: HashMap<PartitionKey, i64>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a consumed message.
    pub fn observe(&mut self, position: &SourcePosition) {
        let entry = self
            .consumed
            .entry(position.partition_key())
            .or_insert(position.offset);
        if position.offset > *entry {
            *entry = position.offset;
        }
    }

    /// Caps future commits for the partitions at the given offsets.
    pub fn pin(&mut self, offsets: &HashMap<PartitionKey, i64>) {
        for (key, offset) in offsets {
            let entry = self.pinned.entry(key.clone()).or_insert(*offset);
            if *offset < *entry {
                *entry = *offset;
            }
        }
    }


    /// Commit targets that advance past what was last committed.
    ///
    /// `low_water_marks` holds the lowest pending offset per partition.
    pub fn commit_targets(
        &self,
        low_water_marks: &HashMap<PartitionKey, i64>,
    ) -> Vec<SourcePosition> {
        let mut targets: Vec<SourcePosition> = self
            .consumed
            .iter()
            .filter_map(|(key, highest)| {
                let mut target = highest + 1;
                if let Some(pending) = low_water_marks.get(key) {
                    target = target.min(*pending);
                }
                if let Some(pinned) = self.pinned.get(key) {
                    target = target.min(*pinned);
                }
                let advanced = self
                    .committed
                    .get(key)
                    .map_or(true, |committed| target > *committed);
                advanced.then(|| SourcePosition::new(key.topic.clone(), key.partition, target))
            })
            .collect();
        targets.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));
        targets
    }

    /// Records targets acknowledged by the source.
    pub fn mark_committed(&mut self, targets: &[SourcePosition]) {
        for target in targets {
            self.committed.insert(target.partition_key(), target.offset);
        }
    }
}
