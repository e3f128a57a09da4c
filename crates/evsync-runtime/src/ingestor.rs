use evsync_core::types::PartitionId;

/// Flow-control handle onto the upstream fetcher.
///
/// `pause` and `resume` are advisory, fire-and-forget signals: the
/// synchronizer does not wait for an acknowledgment and tolerates a few
/// already-in-flight records arriving after a pause request (the capacity
/// threshold is soft, not a hard limit). Both calls are idempotent-safe.
///
/// The ingestor is also the producer side that calls
/// [`Synchronizer::enqueue`](crate::synchronizer::Synchronizer::enqueue);
/// its fetch transport is opaque to this crate.
pub trait Ingestor: Send + Sync {
    fn pause(&self, partition: &PartitionId);
    fn resume(&self, partition: &PartitionId);
}
