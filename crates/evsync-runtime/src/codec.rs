use anyhow::Result;

use evsync_core::types::EventTime;

use crate::types::RawRecord;

/// Turns raw bytes into a domain value. One deserializer is supplied for
/// keys and one for values at synchronizer construction.
pub trait Deserializer<T>: Send {
    fn deserialize(&self, topic: &str, bytes: &[u8]) -> Result<T>;
}

/// Extracts the event time of a record's content.
///
/// Pure function over domain objects (not raw bytes), so records are
/// deserialized before extraction. The extraction rule may differ per topic.
pub trait TimestampExtractor<K, V>: Send {
    fn extract(&self, topic: &str, key: &K, value: &V) -> Result<EventTime>;
}

/// A record after key/value deserialization and timestamp extraction.
#[derive(Debug)]
pub struct DecodedRecord<K, V> {
    pub key: K,
    pub value: V,
    pub event_time: EventTime,
}

/// Bundles the extractor and the key/value deserializers so callers decode a
/// record in one step.
pub struct RecordDecoder<K, V> {
    extractor: Box<dyn TimestampExtractor<K, V>>,
    key: Box<dyn Deserializer<K>>,
    value: Box<dyn Deserializer<V>>,
}

impl<K, V> RecordDecoder<K, V> {
    pub fn new(
        extractor: Box<dyn TimestampExtractor<K, V>>,
        key: Box<dyn Deserializer<K>>,
        value: Box<dyn Deserializer<V>>,
    ) -> Self {
        Self {
            extractor,
            key,
            value,
        }
    }

    /// Deserializes both sides and extracts the event time. Failures from
    /// either collaborator propagate unchanged; nothing is cached here.
    pub fn decode(&self, record: &RawRecord) -> Result<DecodedRecord<K, V>> {
        let topic = record.topic();
        let key = self.key.deserialize(topic, &record.key)?;
        let value = self.value.deserialize(topic, &record.value)?;
        let event_time = self.extractor.extract(topic, &key, &value)?;
        Ok(DecodedRecord {
            key,
            value,
            event_time,
        })
    }
}
