#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{info, info_span, warn, Instrument};

use evsync_core::types::{EventTime, GroupId, PartitionId};
use evsync_observe::metrics::{Counter, Gauge};
use evsync_runtime::chooser::TimeBasedChooser;
use evsync_runtime::codec::{Deserializer, RecordDecoder, TimestampExtractor};
use evsync_runtime::ingestor::Ingestor;
use evsync_runtime::sink::Sink;
use evsync_runtime::synchronizer::{SyncMetrics, Synchronizer, SynchronizerConfig};
use evsync_runtime::types::RawRecord;

#[derive(Debug, Parser)]
#[command(name = "evsync-demo")]
struct Args {
    #[arg(long, env = "EVSYNC_GROUP_ID", default_value = "devgroup")]
    group_id: String,

    #[arg(long, env = "EVSYNC_TOPICS", default_value_t = 2)]
    topics: u32,

    #[arg(long, env = "EVSYNC_PARTITIONS_PER_TOPIC", default_value_t = 2)]
    partitions_per_topic: u32,

    #[arg(long, env = "EVSYNC_RECORDS_PER_PARTITION", default_value_t = 10_000)]
    records_per_partition: u64,

    #[arg(long, env = "EVSYNC_CAPACITY_THRESHOLD", default_value_t = 64)]
    capacity_threshold: usize,

    /// Records fetched per partition on each loop tick (while not paused).
    #[arg(long, env = "EVSYNC_FETCH_BATCH_RECORDS", default_value_t = 16)]
    fetch_batch_records: usize,

    /// Dispatch steps per loop tick; keeping this below the fetch rate lets
    /// buffers fill and exercises pause/resume.
    #[arg(long, env = "EVSYNC_DISPATCH_PER_TICK", default_value_t = 8)]
    dispatch_per_tick: usize,

    /// Periodically emit a metrics snapshot (0 disables).
    #[arg(long, env = "EVSYNC_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 1000)]
    metrics_snapshot_interval_ms: u64,
}

struct FetchCursor {
    partition: PartitionId,
    next_offset: u64,
    next_event_time: EventTime,
    step_ms: EventTime,
    remaining: u64,
}

/// Test-double upstream: generates per-partition records with skewed
/// event-time rates and honors pause/resume by withholding generation.
struct ScriptedIngestor {
    paused: Mutex<HashSet<PartitionId>>,
    cursors: Mutex<Vec<FetchCursor>>,
    pause_events_total: Counter,
    resume_events_total: Counter,
}

impl ScriptedIngestor {
    fn new(cursors: Vec<FetchCursor>) -> Self {
        Self {
            paused: Mutex::new(HashSet::new()),
            cursors: Mutex::new(cursors),
            pause_events_total: Counter::default(),
            resume_events_total: Counter::default(),
        }
    }

    /// One fetch pass: up to `max_records` new records for every partition
    /// that is neither paused nor exhausted.
    fn fetch(&self, max_records: usize) -> Vec<(PartitionId, Vec<RawRecord>)> {
        let Ok(paused) = self.paused.lock() else {
            return Vec::new();
        };
        let Ok(mut cursors) = self.cursors.lock() else {
            return Vec::new();
        };

        let mut batches = Vec::new();
        for cursor in cursors.iter_mut() {
            if cursor.remaining == 0 || paused.contains(&cursor.partition) {
                continue;
            }
            let take = max_records.min(cursor.remaining as usize);
            let mut records = Vec::with_capacity(take);
            for _ in 0..take {
                records.push(RawRecord {
                    partition: cursor.partition.clone(),
                    offset: cursor.next_offset,
                    key: cursor.next_event_time.to_be_bytes().to_vec(),
                    value: cursor.next_offset.to_be_bytes().to_vec(),
                });
                cursor.next_offset += 1;
                cursor.next_event_time += cursor.step_ms;
                cursor.remaining -= 1;
            }
            batches.push((cursor.partition.clone(), records));
        }
        batches
    }

    fn exhausted(&self) -> bool {
        self.cursors
            .lock()
            .map(|cursors| cursors.iter().all(|c| c.remaining == 0))
            .unwrap_or(true)
    }
}

impl Ingestor for ScriptedIngestor {
    fn pause(&self, partition: &PartitionId) {
        if let Ok(mut paused) = self.paused.lock() {
            if paused.insert(partition.clone()) {
                self.pause_events_total.inc();
            }
        }
    }

    fn resume(&self, partition: &PartitionId) {
        if let Ok(mut paused) = self.paused.lock() {
            if paused.remove(partition) {
                self.resume_events_total.inc();
            }
        }
    }
}

struct BigEndianI64;

impl Deserializer<i64> for BigEndianI64 {
    fn deserialize(&self, _topic: &str, bytes: &[u8]) -> Result<i64> {
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected an 8-byte big-endian payload"))?;
        Ok(i64::from_be_bytes(bytes))
    }
}

struct KeyIsEventTime;

impl TimestampExtractor<i64, i64> for KeyIsEventTime {
    fn extract(&self, _topic: &str, key: &i64, _value: &i64) -> Result<EventTime> {
        Ok(*key)
    }
}

#[derive(Default)]
struct DeliveryLog {
    delivered_total: Counter,
    order_violations_total: Counter,
    last_event_time: Mutex<Option<EventTime>>,
    watermark: Gauge,
}

/// All partitions share one log so global event-time order can be checked.
struct SharedSink(Arc<DeliveryLog>);

impl Sink<i64, i64> for SharedSink {
    fn receive(
        &self,
        _topic: &str,
        _key: i64,
        _value: i64,
        event_time: EventTime,
        watermark: EventTime,
    ) -> Result<()> {
        self.0.delivered_total.inc();
        self.0.watermark.set(watermark.max(0) as u64);
        if let Ok(mut last) = self.0.last_event_time.lock() {
            if last.is_some_and(|previous| event_time < previous) {
                self.0.order_violations_total.inc();
            }
            *last = Some(event_time);
        }
        Ok(())
    }
}

fn emit_metrics_snapshot(
    group_id: &GroupId,
    metrics: &SyncMetrics,
    log: &DeliveryLog,
    ingestor: &ScriptedIngestor,
) {
    tracing::info!(
        target: "evsync_metrics",
        group_id = %group_id,
        enqueued_records_total = metrics.enqueued_records_total.get(),
        dispatched_records_total = metrics.dispatched_records_total.get(),
        buffered_records = metrics.buffered_records.get(),
        buffered_records_high_water = metrics.buffered_records_high_water.get(),
        paused_partitions = metrics.paused_partitions.get(),
        delivered_total = log.delivered_total.get(),
        order_violations_total = log.order_violations_total.get(),
        watermark = log.watermark.get(),
        pause_events_total = ingestor.pause_events_total.get(),
        resume_events_total = ingestor.resume_events_total.get(),
        "metrics"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    evsync_observe::logging::init_tracing();
    let args = Args::parse();

    let span = info_span!(
        "evsync-demo",
        group_id = %args.group_id,
        topics = args.topics,
        partitions_per_topic = args.partitions_per_topic,
        records_per_partition = args.records_per_partition,
        capacity_threshold = args.capacity_threshold,
    );

    async move {
        let group_id = GroupId(args.group_id.clone());

        let mut cursors = Vec::new();
        for topic in 0..args.topics {
            for partition in 0..args.partitions_per_topic {
                let index = (topic * args.partitions_per_topic + partition) as i64;
                cursors.push(FetchCursor {
                    partition: PartitionId::new(format!("topic-{topic}"), partition),
                    next_offset: 0,
                    next_event_time: 0,
                    // Skewed per-partition event-time rates keep the chooser
                    // switching between slow and fast partitions.
                    step_ms: 1 + index * 3,
                    remaining: args.records_per_partition,
                });
            }
        }
        let ingestor = Arc::new(ScriptedIngestor::new(cursors));

        let decoder = RecordDecoder::new(
            Box::new(KeyIsEventTime),
            Box::new(BigEndianI64),
            Box::new(BigEndianI64),
        );
        let mut synchronizer = Synchronizer::new(
            SynchronizerConfig {
                group_id: group_id.clone(),
                capacity_threshold: args.capacity_threshold,
            },
            ingestor.clone(),
            Box::new(TimeBasedChooser),
            decoder,
        );
        let metrics = synchronizer.metrics();

        let log = Arc::new(DeliveryLog::default());
        for topic in 0..args.topics {
            for partition in 0..args.partitions_per_topic {
                synchronizer.add_partition(
                    PartitionId::new(format!("topic-{topic}"), partition),
                    Box::new(SharedSink(log.clone())),
                )?;
            }
        }

        let metrics_task = if args.metrics_snapshot_interval_ms > 0 {
            let metrics = metrics.clone();
            let log = log.clone();
            let ingestor = ingestor.clone();
            let group_id = group_id.clone();
            let interval_ms = args.metrics_snapshot_interval_ms;
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                loop {
                    ticker.tick().await;
                    emit_metrics_snapshot(&group_id, &metrics, &log, &ingestor);
                }
            }))
        } else {
            None
        };

        let start = Instant::now();
        info!("starting synchronizer run loop");

        let run = async {
            loop {
                for (partition, records) in ingestor.fetch(args.fetch_batch_records) {
                    synchronizer.enqueue(&partition, records)?;
                }

                let mut dispatched = 0usize;
                while dispatched < args.dispatch_per_tick.max(1) && synchronizer.process()? {
                    dispatched += 1;
                }

                if dispatched == 0 {
                    // All buffers drained; stop once the upstream is dry too.
                    if ingestor.exhausted() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                } else {
                    tokio::task::yield_now().await;
                }
            }
            Ok::<(), anyhow::Error>(())
        };

        tokio::select! {
            res = run => {
                res?;
            }
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received; exiting");
            }
        }

        if let Some(task) = metrics_task {
            task.abort();
        }

        let elapsed = start.elapsed();
        emit_metrics_snapshot(&group_id, &metrics, &log, &ingestor);

        anyhow::ensure!(
            log.order_violations_total.get() == 0,
            "event-time order violated {} times",
            log.order_violations_total.get()
        );

        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            delivered_total = log.delivered_total.get(),
            buffered_records = synchronizer.buffered_records(),
            watermark = ?synchronizer.watermark(),
            "demo complete"
        );

        Ok(())
    }
    .instrument(span)
    .await
}
