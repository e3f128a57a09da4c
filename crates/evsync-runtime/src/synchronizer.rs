use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use evsync_core::types::{EventTime, GroupId, PartitionId, SyncError};
use evsync_observe::metrics::{Counter, Gauge};

use crate::buffer::PartitionBuffer;
use crate::chooser::{Candidate, Chooser};
use crate::codec::RecordDecoder;
use crate::ingestor::Ingestor;
use crate::sink::Sink;
use crate::types::RawRecord;

/// Construction-time parameters for a [`Synchronizer`].
#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    pub group_id: GroupId,
    /// Per-partition occupancy at which the upstream fetcher is paused.
    /// Soft threshold: storage is unbounded, so in-flight records delivered
    /// after a pause are still accepted.
    pub capacity_threshold: usize,
}

/// Flow counters and gauges for one synchronizer instance.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    pub enqueued_records_total: Counter,
    pub dispatched_records_total: Counter,
    pub buffered_records: Gauge,
    pub buffered_records_high_water: Gauge,
    pub paused_partitions: Gauge,
}

/// Merges per-partition record queues into a single event-time-ordered
/// dispatch stream, and regulates upstream fetch pressure per partition.
///
/// One logical thread of control drives an instance: the ingestor's fetch
/// loop hands records to [`enqueue`](Self::enqueue) and the owning task's
/// run loop calls [`process`](Self::process); both take `&mut self`, so the
/// caller serializes them. Neither call blocks or waits for data.
///
/// Ordering invariant: each partition's own records arrive in non-decreasing
/// event-time order (an upstream guarantee, not re-checked here), and the
/// chooser always picks the globally minimal head, so the sequence of event
/// times handed to sinks across all partitions is non-decreasing and the
/// watermark is monotone.
pub struct Synchronizer<K, V> {
    group_id: GroupId,
    capacity_threshold: usize,
    ingestor: Arc<dyn Ingestor>,
    chooser: Box<dyn Chooser>,
    decoder: RecordDecoder<K, V>,
    buffers: HashMap<PartitionId, PartitionBuffer<K, V>>,
    watermark: Option<EventTime>,
    metrics: Arc<SyncMetrics>,
}

impl<K, V> Synchronizer<K, V> {
    /// `config.capacity_threshold` must be positive.
    pub fn new(
        config: SynchronizerConfig,
        ingestor: Arc<dyn Ingestor>,
        chooser: Box<dyn Chooser>,
        decoder: RecordDecoder<K, V>,
    ) -> Self {
        assert!(
            config.capacity_threshold > 0,
            "capacity threshold must be > 0"
        );
        Self {
            group_id: config.group_id,
            capacity_threshold: config.capacity_threshold,
            ingestor,
            chooser,
            decoder,
            buffers: HashMap::new(),
            watermark: None,
            metrics: Arc::new(SyncMetrics::default()),
        }
    }

    /// Registers a partition and binds `sink` to it. Registration is a
    /// one-time, fail-fast declaration: re-registering an id fails with
    /// [`SyncError::DuplicatePartition`] and leaves the existing binding
    /// untouched.
    pub fn add_partition(
        &mut self,
        partition: PartitionId,
        sink: Box<dyn Sink<K, V>>,
    ) -> Result<(), SyncError> {
        match self.buffers.entry(partition) {
            Entry::Occupied(occupied) => Err(SyncError::DuplicatePartition {
                partition: occupied.key().clone(),
            }),
            Entry::Vacant(vacant) => {
                let partition = vacant.key().clone();
                vacant.insert(PartitionBuffer::new(partition.clone(), sink));
                tracing::debug!(
                    target: "evsync_flow",
                    event = "partition_added",
                    group_id = %self.group_id,
                    topic = %partition.topic,
                    partition = partition.partition,
                    "registered partition"
                );
                Ok(())
            }
        }
    }

    /// Drops a partition's buffer, discarding any still-queued records, and
    /// stops routing enqueues to it. No pause/resume call is issued for the
    /// partition afterwards; the id may be registered again later.
    pub fn remove_partition(&mut self, partition: &PartitionId) -> Result<(), SyncError> {
        let buffer = self
            .buffers
            .remove(partition)
            .ok_or_else(|| SyncError::UnknownPartition {
                partition: partition.clone(),
            })?;
        self.metrics.buffered_records.sub(buffer.len() as u64);
        if buffer.paused() {
            self.metrics.paused_partitions.sub(1);
        }
        tracing::debug!(
            target: "evsync_flow",
            event = "partition_removed",
            group_id = %self.group_id,
            topic = %partition.topic,
            partition = partition.partition,
            dropped_records = buffer.len(),
            "removed partition"
        );
        Ok(())
    }

    /// Appends `records`, in order, to the named partition's buffer. If the
    /// buffer's occupancy has reached the capacity threshold afterwards and
    /// the partition is not already paused, pauses the ingestor for it.
    /// Enqueue never resumes a partition.
    pub fn enqueue(
        &mut self,
        partition: &PartitionId,
        records: Vec<RawRecord>,
    ) -> Result<(), SyncError> {
        let buffer = self
            .buffers
            .get_mut(partition)
            .ok_or_else(|| SyncError::UnknownPartition {
                partition: partition.clone(),
            })?;

        let appended = records.len() as u64;
        for record in records {
            buffer.push(record);
        }
        self.metrics.enqueued_records_total.inc_by(appended);
        let buffered = self.metrics.buffered_records.add(appended);
        self.metrics.buffered_records_high_water.max(buffered);

        if buffer.len() >= self.capacity_threshold && !buffer.paused() {
            buffer.set_paused(true);
            self.ingestor.pause(partition);
            self.metrics.paused_partitions.add(1);
            tracing::debug!(
                target: "evsync_flow",
                event = "paused",
                group_id = %self.group_id,
                topic = %partition.topic,
                partition = partition.partition,
                depth = buffer.len(),
                "paused partition at capacity threshold"
            );
        }
        Ok(())
    }

    /// Performs at most one dispatch step and returns whether a record was
    /// dispatched. With every buffer empty this is an immediate no-op; it
    /// never blocks waiting for data, so callers poll it from a run loop.
    ///
    /// A deserializer or extractor failure on any buffered head aborts the
    /// call before anything is dispatched, leaving the failing record at the
    /// head of its buffer for whatever retry policy the caller applies.
    pub fn process(&mut self) -> Result<bool> {
        let mut candidates = Vec::with_capacity(self.buffers.len());
        for (partition, buffer) in self.buffers.iter_mut() {
            if let Some(event_time) = buffer.head_event_time(&self.decoder)? {
                candidates.push(Candidate {
                    partition,
                    event_time,
                });
            }
        }

        let Some(winner) = self.chooser.select(&candidates) else {
            return Ok(false);
        };
        let winner = winner.clone();

        let buffer = self
            .buffers
            .get_mut(&winner)
            .ok_or_else(|| anyhow::anyhow!("chooser selected unregistered partition {winner}"))?;
        let head = buffer
            .pop_head(&self.decoder)?
            .ok_or_else(|| anyhow::anyhow!("chooser selected empty partition {winner}"))?;

        let watermark = self
            .watermark
            .map_or(head.event_time, |current| current.max(head.event_time));
        self.watermark = Some(watermark);

        buffer.sink().receive(
            head.record.topic(),
            head.key,
            head.value,
            head.event_time,
            watermark,
        )?;
        self.metrics.dispatched_records_total.inc();
        self.metrics.buffered_records.sub(1);
        tracing::trace!(
            target: "evsync_flow",
            event = "dispatched",
            group_id = %self.group_id,
            topic = %winner.topic,
            partition = winner.partition,
            event_time = head.event_time,
            watermark,
            "dispatched record"
        );

        if buffer.paused() && buffer.len() < self.capacity_threshold {
            buffer.set_paused(false);
            self.ingestor.resume(&winner);
            self.metrics.paused_partitions.sub(1);
            tracing::debug!(
                target: "evsync_flow",
                event = "resumed",
                group_id = %self.group_id,
                topic = %winner.topic,
                partition = winner.partition,
                depth = buffer.len(),
                "resumed partition below capacity threshold"
            );
        }

        Ok(true)
    }

    /// Maximum event time dispatched so far across all partitions; `None`
    /// until the first dispatch.
    pub fn watermark(&self) -> Option<EventTime> {
        self.watermark
    }

    /// Records currently queued across all partitions.
    pub fn buffered_records(&self) -> usize {
        self.buffers.values().map(PartitionBuffer::len).sum()
    }

    pub fn metrics(&self) -> Arc<SyncMetrics> {
        self.metrics.clone()
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }
}
