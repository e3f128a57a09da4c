use std::collections::VecDeque;

use anyhow::Result;

use evsync_core::types::{EventTime, PartitionId};

use crate::codec::{DecodedRecord, RecordDecoder};
use crate::sink::Sink;
use crate::types::RawRecord;

/// The head of a partition buffer after a successful pop: the raw envelope
/// together with its decoded key/value and extracted event time.
#[derive(Debug)]
pub struct HeadRecord<K, V> {
    pub record: RawRecord,
    pub key: K,
    pub value: V,
    pub event_time: EventTime,
}

/// Ordered FIFO queue of raw records for one partition, plus the partition's
/// bound sink and its paused flag.
///
/// Storage is unbounded; occupancy is watched by the synchronizer against the
/// shared capacity threshold. The buffer itself never makes pause/resume
/// decisions since those need the ingestor handle and cross-partition context.
///
/// The decoded head is cached so the chooser can read head event times on
/// every `process` call without deserializing twice. Invariant: the cache,
/// when present, always describes the current front of the queue.
pub struct PartitionBuffer<K, V> {
    partition: PartitionId,
    queue: VecDeque<RawRecord>,
    decoded_head: Option<DecodedRecord<K, V>>,
    sink: Box<dyn Sink<K, V>>,
    paused: bool,
}

impl<K, V> PartitionBuffer<K, V> {
    pub fn new(partition: PartitionId, sink: Box<dyn Sink<K, V>>) -> Self {
        Self {
            partition,
            queue: VecDeque::new(),
            decoded_head: None,
            sink,
            paused: false,
        }
    }

    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    /// Appends a record at the tail. Routing records to the right buffer is
    /// the caller's job.
    pub fn push(&mut self, record: RawRecord) {
        debug_assert_eq!(
            record.partition, self.partition,
            "record routed to the wrong partition buffer"
        );
        self.queue.push_back(record);
    }

    /// The earliest-enqueued, not-yet-dispatched record, without removing it.
    pub fn peek_head(&self) -> Option<&RawRecord> {
        self.queue.front()
    }

    /// Event time of the head record, decoding and caching it on first use.
    /// `None` when the buffer is empty. A deserializer/extractor failure
    /// propagates and leaves the record at the head.
    pub fn head_event_time(&mut self, decoder: &RecordDecoder<K, V>) -> Result<Option<EventTime>> {
        self.ensure_head_decoded(decoder)?;
        Ok(self.decoded_head.as_ref().map(|head| head.event_time))
    }

    /// Removes and returns the decoded head. `None` on an empty buffer, which
    /// callers treat as a programming error since the chooser only ever sees
    /// non-empty partitions.
    pub fn pop_head(&mut self, decoder: &RecordDecoder<K, V>) -> Result<Option<HeadRecord<K, V>>> {
        self.ensure_head_decoded(decoder)?;
        match (self.queue.pop_front(), self.decoded_head.take()) {
            (Some(record), Some(decoded)) => Ok(Some(HeadRecord {
                record,
                key: decoded.key,
                value: decoded.value,
                event_time: decoded.event_time,
            })),
            _ => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn sink(&self) -> &dyn Sink<K, V> {
        self.sink.as_ref()
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn ensure_head_decoded(&mut self, decoder: &RecordDecoder<K, V>) -> Result<()> {
        if self.decoded_head.is_none() {
            if let Some(record) = self.queue.front() {
                self.decoded_head = Some(decoder.decode(record)?);
            }
        }
        Ok(())
    }
}
