//! Bounded, time-stamped pages of serialized records

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, TelemetryError};
use crate::events::{LogEvent, MetricEvent, ThreadEvent};
use crate::queue::{HeterogeneousQueue, QueueEvent};
use crate::time::DualTime;

/// One page of a stream.
///
/// A block is open while it is the current block of its stream and becomes
/// immutable once `close` stamps its end time.
#[derive(Debug)]
pub struct EventBlock<E> {
    block_id: String,
    stream_id: String,
    begin: DualTime,
    end: Option<DualTime>,
    events: HeterogeneousQueue<E>,
    capacity: usize,
}

pub type LogBlock = EventBlock<LogEvent>;
pub type MetricsBlock = EventBlock<MetricEvent>;
pub type ThreadBlock = EventBlock<ThreadEvent>;

impl<E: QueueEvent> EventBlock<E> {
    pub fn new(stream_id: String, begin: DualTime, capacity: usize) -> Self {
        Self {
            block_id: Uuid::new_v4().to_string(),
            stream_id,
            begin,
            end: None,
            events: HeterogeneousQueue::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: E) -> Result<()> {
        if self.end.is_some() {
            return Err(TelemetryError::BlockClosed(self.block_id.clone()));
        }
        self.events.push(event);
        Ok(())
    }

    /// Seal the block. Only the first call succeeds.
    pub fn close(&mut self, end: DualTime) -> Result<()> {
        if self.end.is_some() {
            return Err(TelemetryError::BlockClosed(self.block_id.clone()));
        }
        self.end = Some(end);
        Ok(())
    }

    pub fn end_time(&self) -> Result<DualTime> {
        self.end
            .ok_or_else(|| TelemetryError::BlockOpen(self.block_id.clone()))
    }

    pub fn begin_time(&self) -> DualTime {
        self.begin
    }

    pub fn is_sealed(&self) -> bool {
        self.end.is_some()
    }

    pub fn size_bytes(&self) -> usize {
        self.events.len_bytes()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn nb_objects(&self) -> usize {
        self.events.nb_objects()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn events(&self) -> &HeterogeneousQueue<E> {
        &self.events
    }

    pub fn for_each<F>(&self, visitor: F) -> Result<()>
    where
        F: FnMut(E),
    {
        self.events.for_each(visitor)
    }

    /// Portable form of a sealed block.
    pub fn encode(&self) -> Result<EncodedBlock> {
        let end = self.end_time()?;
        Ok(EncodedBlock {
            block_id: self.block_id.clone(),
            stream_id: self.stream_id.clone(),
            begin: self.begin,
            end,
            nb_objects: self.events.nb_objects(),
            payload: self.events.as_bytes().to_vec(),
        })
    }

    /// Rebuild a sealed block. The payload is only validated when iterated.
    pub fn decode(encoded: &EncodedBlock) -> Self {
        Self {
            block_id: encoded.block_id.clone(),
            stream_id: encoded.stream_id.clone(),
            begin: encoded.begin,
            end: Some(encoded.end),
            capacity: encoded.payload.len(),
            events: HeterogeneousQueue::from_bytes(encoded.payload.clone(), encoded.nb_objects),
        }
    }
}

/// Sealed block as handed to transports and offline decoders
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EncodedBlock {
    pub block_id: String,
    pub stream_id: String,
    pub begin: DualTime,
    pub end: DualTime,
    pub nb_objects: usize,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::{MetricHandle, SpanHandle};
    use crate::events::{BeginThreadSpanEvent, EndThreadSpanEvent, IntegerMetricEvent};

    fn span_block() -> ThreadBlock {
        let mut block = ThreadBlock::new("stream-1".to_string(), DualTime::now(), 128);
        block
            .push(BeginThreadSpanEvent { desc: SpanHandle(0), time: 10 }.into())
            .unwrap();
        block
            .push(EndThreadSpanEvent { desc: SpanHandle(0), time: 20 }.into())
            .unwrap();
        block
    }

    #[test]
    fn test_close_is_one_shot() {
        let mut block = span_block();
        assert!(!block.is_sealed());
        assert!(matches!(block.end_time(), Err(TelemetryError::BlockOpen(_))));

        let end = DualTime::now();
        block.close(end).unwrap();
        assert_eq!(block.end_time().unwrap(), end);

        assert!(matches!(
            block.close(DualTime::now()),
            Err(TelemetryError::BlockClosed(_))
        ));
        assert_eq!(block.end_time().unwrap(), end);
    }

    #[test]
    fn test_push_after_close_is_rejected() {
        let mut block = span_block();
        block.close(DualTime::now()).unwrap();
        let result = block.push(BeginThreadSpanEvent { desc: SpanHandle(1), time: 30 }.into());
        assert!(matches!(result, Err(TelemetryError::BlockClosed(_))));
        assert_eq!(block.nb_objects(), 2);
        assert_eq!(block.size_bytes(), 26);
    }

    #[test]
    fn test_encode_requires_sealed_block() {
        let block = span_block();
        assert!(matches!(block.encode(), Err(TelemetryError::BlockOpen(_))));
    }

    #[test]
    fn test_encoded_block_decodes_same_records() {
        let mut block = MetricsBlock::new("metrics".to_string(), DualTime::now(), 64);
        for value in [3, 5, 8] {
            block
                .push(
                    IntegerMetricEvent {
                        desc: MetricHandle(2),
                        time: value as i64,
                        value,
                    }
                    .into(),
                )
                .unwrap();
        }
        block.close(DualTime::now()).unwrap();

        let json = serde_json::to_string(&block.encode().unwrap()).unwrap();
        let encoded: EncodedBlock = serde_json::from_str(&json).unwrap();
        let decoded = MetricsBlock::decode(&encoded);

        assert_eq!(decoded.block_id(), block.block_id());
        assert!(decoded.is_sealed());
        let mut values = Vec::new();
        decoded
            .for_each(|event| {
                if let MetricEvent::Integer(metric) = event {
                    values.push(metric.value);
                }
            })
            .unwrap();
        assert_eq!(values, vec![3, 5, 8]);
    }
}
