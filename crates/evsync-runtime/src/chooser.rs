use evsync_core::types::{EventTime, PartitionId};

/// One entry of the selection set handed to a [`Chooser`]: a partition whose
/// buffer currently holds at least one record, keyed by the event time of
/// its head record.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub partition: &'a PartitionId,
    pub event_time: EventTime,
}

/// Strategy that decides which partition's head record is processed next.
///
/// Isolating this behind a trait keeps the synchronizer agnostic of the
/// ordering policy (round-robin, per-topic priority, ...) and gives tests a
/// seam that needs no I/O.
pub trait Chooser: Send {
    /// Picks a partition from `candidates`, or `None` when nothing is ready.
    /// Must be deterministic: the same candidate set always yields the same
    /// choice.
    fn select<'a>(&self, candidates: &[Candidate<'a>]) -> Option<&'a PartitionId>;
}

/// Picks the candidate with the minimum head event time.
///
/// Ties on event time break by `PartitionId` order (topic name, then
/// partition number), so selection is stable regardless of candidate-set
/// iteration order.
#[derive(Debug, Default)]
pub struct TimeBasedChooser;

impl Chooser for TimeBasedChooser {
    fn select<'a>(&self, candidates: &[Candidate<'a>]) -> Option<&'a PartitionId> {
        candidates
            .iter()
            .min_by(|a, b| {
                a.event_time
                    .cmp(&b.event_time)
                    .then_with(|| a.partition.cmp(b.partition))
            })
            .map(|candidate| candidate.partition)
    }
}
