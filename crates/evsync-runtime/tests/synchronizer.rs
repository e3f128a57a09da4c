use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use evsync_core::types::{EventTime, GroupId, PartitionId, SyncError};
use evsync_runtime::chooser::TimeBasedChooser;
use evsync_runtime::codec::{Deserializer, RecordDecoder, TimestampExtractor};
use evsync_runtime::ingestor::Ingestor;
use evsync_runtime::sink::Sink;
use evsync_runtime::synchronizer::{Synchronizer, SynchronizerConfig};
use evsync_runtime::types::RawRecord;

#[derive(Default)]
struct MockIngestor {
    paused: Mutex<HashSet<PartitionId>>,
    pause_calls: Mutex<Vec<PartitionId>>,
    resume_calls: Mutex<Vec<PartitionId>>,
}

impl MockIngestor {
    fn paused_set(&self) -> HashSet<PartitionId> {
        self.paused.lock().unwrap().clone()
    }

    fn pause_calls(&self) -> Vec<PartitionId> {
        self.pause_calls.lock().unwrap().clone()
    }

    fn resume_calls(&self) -> Vec<PartitionId> {
        self.resume_calls.lock().unwrap().clone()
    }
}

impl Ingestor for MockIngestor {
    fn pause(&self, partition: &PartitionId) {
        self.paused.lock().unwrap().insert(partition.clone());
        self.pause_calls.lock().unwrap().push(partition.clone());
    }

    fn resume(&self, partition: &PartitionId) {
        self.paused.lock().unwrap().remove(partition);
        self.resume_calls.lock().unwrap().push(partition.clone());
    }
}

#[derive(Default)]
struct GlobalLog {
    event_times: Mutex<Vec<EventTime>>,
    watermarks: Mutex<Vec<EventTime>>,
}

/// Records deliveries into a per-sink counter plus a log shared across all
/// sinks, so cross-partition dispatch order stays observable.
struct RecordingSink {
    received: Arc<AtomicUsize>,
    log: Arc<GlobalLog>,
}

impl Sink<i32, i32> for RecordingSink {
    fn receive(
        &self,
        _topic: &str,
        _key: i32,
        _value: i32,
        event_time: EventTime,
        watermark: EventTime,
    ) -> Result<()> {
        self.received.fetch_add(1, Ordering::SeqCst);
        self.log.event_times.lock().unwrap().push(event_time);
        self.log.watermarks.lock().unwrap().push(watermark);
        Ok(())
    }
}

struct BigEndianI32;

impl Deserializer<i32> for BigEndianI32 {
    fn deserialize(&self, _topic: &str, bytes: &[u8]) -> Result<i32> {
        let bytes: [u8; 4] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected a 4-byte big-endian payload"))?;
        Ok(i32::from_be_bytes(bytes))
    }
}

/// topic1 uses the key directly as event time; every other topic maps
/// key/10 + 5, so two topics with disjoint key ranges interleave in time.
struct TopicAwareExtractor;

impl TimestampExtractor<i32, i32> for TopicAwareExtractor {
    fn extract(&self, topic: &str, key: &i32, _value: &i32) -> Result<EventTime> {
        if topic == "topic1" {
            Ok(EventTime::from(*key))
        } else {
            Ok(EventTime::from(*key) / 10 + 5)
        }
    }
}

fn decoder() -> RecordDecoder<i32, i32> {
    RecordDecoder::new(
        Box::new(TopicAwareExtractor),
        Box::new(BigEndianI32),
        Box::new(BigEndianI32),
    )
}

fn synchronizer(
    ingestor: Arc<MockIngestor>,
    capacity_threshold: usize,
) -> Synchronizer<i32, i32> {
    Synchronizer::new(
        SynchronizerConfig {
            group_id: GroupId("group".to_string()),
            capacity_threshold,
        },
        ingestor,
        Box::new(TimeBasedChooser),
        decoder(),
    )
}

fn record(partition: &PartitionId, offset: u64, key: i32) -> RawRecord {
    RawRecord {
        partition: partition.clone(),
        offset,
        key: key.to_be_bytes().to_vec(),
        value: 10i32.to_be_bytes().to_vec(),
    }
}

fn records(partition: &PartitionId, first_offset: u64, keys: &[i32]) -> Vec<RawRecord> {
    keys.iter()
        .enumerate()
        .map(|(i, key)| record(partition, first_offset + i as u64, *key))
        .collect()
}

#[test]
fn duplicate_registration_fails_without_side_effect() {
    let ingestor = Arc::new(MockIngestor::default());
    let mut sync = synchronizer(ingestor.clone(), 3);
    let log = Arc::new(GlobalLog::default());

    let p1 = PartitionId::new("topic1", 1);
    let original = Arc::new(AtomicUsize::new(0));
    let usurper = Arc::new(AtomicUsize::new(0));

    sync.add_partition(
        p1.clone(),
        Box::new(RecordingSink {
            received: original.clone(),
            log: log.clone(),
        }),
    )
    .unwrap();

    let err = sync
        .add_partition(
            p1.clone(),
            Box::new(RecordingSink {
                received: usurper.clone(),
                log: log.clone(),
            }),
        )
        .unwrap_err();
    assert_eq!(
        err,
        SyncError::DuplicatePartition {
            partition: p1.clone()
        }
    );

    // The original binding still receives; the rejected sink never does.
    sync.enqueue(&p1, records(&p1, 0, &[10])).unwrap();
    assert!(sync.process().unwrap());
    assert_eq!(original.load(Ordering::SeqCst), 1);
    assert_eq!(usurper.load(Ordering::SeqCst), 0);
}

#[test]
fn enqueue_to_unregistered_partition_fails() {
    let ingestor = Arc::new(MockIngestor::default());
    let mut sync = synchronizer(ingestor, 3);

    let p1 = PartitionId::new("topic1", 1);
    let err = sync.enqueue(&p1, records(&p1, 0, &[10])).unwrap_err();
    assert_eq!(
        err,
        SyncError::UnknownPartition {
            partition: p1.clone()
        }
    );
}

/// The reference flow: two topics with different extraction rules, capacity
/// threshold 3, dispatch interleaving driven purely by head event times, and
/// pause/resume tracking the per-partition occupancy.
#[test]
fn dispatches_in_event_time_order_with_backpressure() {
    let ingestor = Arc::new(MockIngestor::default());
    let mut sync = synchronizer(ingestor.clone(), 3);
    let log = Arc::new(GlobalLog::default());

    let p1 = PartitionId::new("topic1", 1);
    let p2 = PartitionId::new("topic2", 1);
    let s1 = Arc::new(AtomicUsize::new(0));
    let s2 = Arc::new(AtomicUsize::new(0));

    sync.add_partition(
        p1.clone(),
        Box::new(RecordingSink {
            received: s1.clone(),
            log: log.clone(),
        }),
    )
    .unwrap();
    sync.add_partition(
        p2.clone(),
        Box::new(RecordingSink {
            received: s2.clone(),
            log: log.clone(),
        }),
    )
    .unwrap();

    // Event times: p1 [10, 20]; p2 [35, 45, 55, 65].
    sync.enqueue(&p1, records(&p1, 1, &[10, 20])).unwrap();
    sync.enqueue(&p2, records(&p2, 1, &[300, 400, 500, 600]))
        .unwrap();

    // p2 hit the threshold at occupancy 4; p1 (occupancy 2) did not.
    assert_eq!(ingestor.paused_set(), HashSet::from([p2.clone()]));

    assert!(sync.process().unwrap());
    assert_eq!((s1.load(Ordering::SeqCst), s2.load(Ordering::SeqCst)), (1, 0));
    assert_eq!(ingestor.paused_set(), HashSet::from([p2.clone()]));

    // Event times: p1 [30, 40, 50] -> occupancy 4, so p1 pauses too.
    sync.enqueue(&p1, records(&p1, 3, &[30, 40, 50])).unwrap();
    assert_eq!(
        ingestor.paused_set(),
        HashSet::from([p1.clone(), p2.clone()])
    );

    // Dispatch 20; p1 drops to exactly the threshold and must stay paused.
    assert!(sync.process().unwrap());
    assert_eq!((s1.load(Ordering::SeqCst), s2.load(Ordering::SeqCst)), (2, 0));
    assert_eq!(
        ingestor.paused_set(),
        HashSet::from([p1.clone(), p2.clone()])
    );

    // Dispatch 30; p1 drops strictly below the threshold and resumes.
    assert!(sync.process().unwrap());
    assert_eq!((s1.load(Ordering::SeqCst), s2.load(Ordering::SeqCst)), (3, 0));
    assert_eq!(ingestor.paused_set(), HashSet::from([p2.clone()]));
    assert_eq!(ingestor.resume_calls(), vec![p1.clone()]);

    // p2's head (35) now beats p1's head (40); p2 stays at the threshold.
    assert!(sync.process().unwrap());
    assert_eq!((s1.load(Ordering::SeqCst), s2.load(Ordering::SeqCst)), (3, 1));
    assert_eq!(ingestor.paused_set(), HashSet::from([p2.clone()]));

    assert!(sync.process().unwrap());
    assert_eq!((s1.load(Ordering::SeqCst), s2.load(Ordering::SeqCst)), (4, 1));
    assert_eq!(ingestor.paused_set(), HashSet::from([p2.clone()]));

    // Dispatch 45; p2 drops below the threshold and resumes.
    assert!(sync.process().unwrap());
    assert_eq!((s1.load(Ordering::SeqCst), s2.load(Ordering::SeqCst)), (4, 2));
    assert!(ingestor.paused_set().is_empty());

    assert!(sync.process().unwrap());
    assert_eq!((s1.load(Ordering::SeqCst), s2.load(Ordering::SeqCst)), (5, 2));
    assert!(sync.process().unwrap());
    assert_eq!((s1.load(Ordering::SeqCst), s2.load(Ordering::SeqCst)), (5, 3));
    assert!(sync.process().unwrap());
    assert_eq!((s1.load(Ordering::SeqCst), s2.load(Ordering::SeqCst)), (5, 4));

    // Both buffers drained: further calls are no-ops.
    assert!(!sync.process().unwrap());
    assert_eq!((s1.load(Ordering::SeqCst), s2.load(Ordering::SeqCst)), (5, 4));

    let expected = vec![10, 20, 30, 35, 40, 45, 50, 55, 65];
    assert_eq!(*log.event_times.lock().unwrap(), expected);
    // Event times were globally non-decreasing, so the running maximum is
    // each dispatched time itself.
    assert_eq!(*log.watermarks.lock().unwrap(), expected);
    assert_eq!(sync.watermark(), Some(65));

    // Exactly one pause per partition for the whole run.
    assert_eq!(ingestor.pause_calls(), vec![p2.clone(), p1.clone()]);
    assert_eq!(ingestor.resume_calls(), vec![p1, p2]);
}

/// A deserializer failure aborts the `process` call before any dispatch and
/// leaves the record at the head, so the next call can retry it.
#[test]
fn decode_failure_leaves_record_at_head() {
    struct FlakyI32 {
        failures_remaining: AtomicUsize,
    }

    impl Deserializer<i32> for FlakyI32 {
        fn deserialize(&self, topic: &str, bytes: &[u8]) -> Result<i32> {
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("synthetic decode failure");
            }
            BigEndianI32.deserialize(topic, bytes)
        }
    }

    let ingestor = Arc::new(MockIngestor::default());
    let mut sync: Synchronizer<i32, i32> = Synchronizer::new(
        SynchronizerConfig {
            group_id: GroupId("group".to_string()),
            capacity_threshold: 3,
        },
        ingestor,
        Box::new(TimeBasedChooser),
        RecordDecoder::new(
            Box::new(TopicAwareExtractor),
            Box::new(FlakyI32 {
                failures_remaining: AtomicUsize::new(1),
            }),
            Box::new(BigEndianI32),
        ),
    );

    let log = Arc::new(GlobalLog::default());
    let p1 = PartitionId::new("topic1", 1);
    let received = Arc::new(AtomicUsize::new(0));
    sync.add_partition(
        p1.clone(),
        Box::new(RecordingSink {
            received: received.clone(),
            log: log.clone(),
        }),
    )
    .unwrap();

    sync.enqueue(&p1, records(&p1, 0, &[7])).unwrap();

    assert!(sync.process().is_err());
    assert_eq!(received.load(Ordering::SeqCst), 0);
    assert_eq!(sync.buffered_records(), 1);

    // The record stayed at the head; the retry dispatches it.
    assert!(sync.process().unwrap());
    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(*log.event_times.lock().unwrap(), vec![7]);
    assert_eq!(sync.buffered_records(), 0);
}

#[test]
fn removed_partition_stops_routing_and_frees_the_id() {
    let ingestor = Arc::new(MockIngestor::default());
    let mut sync = synchronizer(ingestor.clone(), 2);
    let log = Arc::new(GlobalLog::default());

    let p1 = PartitionId::new("topic1", 1);
    let p2 = PartitionId::new("topic1", 2);
    let s1 = Arc::new(AtomicUsize::new(0));
    let s2 = Arc::new(AtomicUsize::new(0));

    sync.add_partition(
        p1.clone(),
        Box::new(RecordingSink {
            received: s1.clone(),
            log: log.clone(),
        }),
    )
    .unwrap();
    sync.add_partition(
        p2.clone(),
        Box::new(RecordingSink {
            received: s2.clone(),
            log: log.clone(),
        }),
    )
    .unwrap();

    // p1 reaches the threshold and pauses, then gets removed wholesale.
    sync.enqueue(&p1, records(&p1, 0, &[1, 2])).unwrap();
    sync.enqueue(&p2, records(&p2, 0, &[5])).unwrap();
    assert_eq!(ingestor.paused_set(), HashSet::from([p1.clone()]));

    sync.remove_partition(&p1).unwrap();
    assert_eq!(
        sync.remove_partition(&p1).unwrap_err(),
        SyncError::UnknownPartition {
            partition: p1.clone()
        }
    );

    // Buffered records went with the buffer; no resume was issued.
    assert_eq!(sync.buffered_records(), 1);
    assert!(ingestor.resume_calls().is_empty());

    let err = sync.enqueue(&p1, records(&p1, 2, &[3])).unwrap_err();
    assert_eq!(
        err,
        SyncError::UnknownPartition {
            partition: p1.clone()
        }
    );

    // Only p2 is left to drain.
    assert!(sync.process().unwrap());
    assert!(!sync.process().unwrap());
    assert_eq!(s1.load(Ordering::SeqCst), 0);
    assert_eq!(s2.load(Ordering::SeqCst), 1);

    // The id can be registered again after removal.
    sync.add_partition(
        p1,
        Box::new(RecordingSink {
            received: s1,
            log,
        }),
    )
    .unwrap();
}
