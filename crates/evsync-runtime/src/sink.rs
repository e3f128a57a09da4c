use anyhow::Result;

use evsync_core::types::EventTime;

/// Per-partition downstream consumer.
///
/// This is intentionally synchronous: `receive` runs on the synchronizer's
/// calling thread, once per dispatched record, in dispatch order. A sink must
/// not block indefinitely; a slow sink simply slows the process loop down.
pub trait Sink<K, V>: Send {
    fn receive(
        &self,
        topic: &str,
        key: K,
        value: V,
        event_time: EventTime,
        watermark: EventTime,
    ) -> Result<()>;
}
