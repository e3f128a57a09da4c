use evsync_core::types::PartitionId;

/// A raw record is the unit moving through the pipeline before
/// deserialization: an immutable envelope of (partition, offset, key bytes,
/// value bytes).
///
/// Invariants:
/// - Records arrive at their partition buffer in log offset order; the
///   synchronizer relies on that order and never re-sorts within a partition.
/// - Once constructed, a record is never mutated; it is owned by exactly one
///   partition buffer until dispatched, then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub partition: PartitionId,
    pub offset: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl RawRecord {
    pub fn topic(&self) -> &str {
        &self.partition.topic
    }
}
