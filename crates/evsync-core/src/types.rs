use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque consumer-group label.
///
/// Pass-through metadata only: it shows up in log spans and metrics
/// snapshots and is never consulted by the ordering logic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event time of a record's content, in log-ordered milliseconds.
///
/// Distinct from arrival/processing time; produced by a pluggable
/// `TimestampExtractor`.
pub type EventTime = i64;

/// Identity of one append-only log shard: (topic name, partition number).
///
/// Equality is by value and this is the unique registration key. The derived
/// `Ord` (topic first, then partition number) doubles as the deterministic
/// tie-break when two partitions hold heads with identical event times.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId {
    pub topic: String,
    pub partition: u32,
}

impl PartitionId {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Registration/routing errors raised synchronously by the synchronizer.
///
/// Both variants indicate an ordering or configuration bug in the caller
/// (e.g. a rebalance handing the same partition twice), not a runtime
/// condition to retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("partition {partition} is already registered")]
    DuplicatePartition { partition: PartitionId },
    #[error("partition {partition} has no registered buffer")]
    UnknownPartition { partition: PartitionId },
}
