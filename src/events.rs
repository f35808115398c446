//! Record kinds and the closed kind set of each channel queue

use crate::codec::{self, InProcSerialize, InProcSize, Reader};
use crate::descriptors::{Level, LogHandle, MetricHandle, SpanHandle};
use crate::errors::{Result, TelemetryError};

/// Log record whose text is entirely described by its descriptor
#[derive(Clone, Debug, PartialEq)]
pub struct LogStaticStrEvent {
    pub desc: LogHandle,
    pub time: i64,
}

impl InProcSerialize for LogStaticStrEvent {
    const IN_PROC_SIZE: InProcSize = InProcSize::Const(12);

    fn write_value(&self, buffer: &mut Vec<u8>) {
        codec::write_u32(buffer, self.desc.0);
        codec::write_i64(buffer, self.time);
    }

    fn read_value(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);
        Ok(Self {
            desc: LogHandle(reader.read_u32()?),
            time: reader.read_i64()?,
        })
    }
}

/// Log record carrying formatted text
#[derive(Clone, Debug, PartialEq)]
pub struct LogStringEvent {
    pub desc: LogHandle,
    pub time: i64,
    pub msg: String,
}

impl InProcSerialize for LogStringEvent {
    const IN_PROC_SIZE: InProcSize = InProcSize::Dynamic;

    fn dynamic_size(&self) -> usize {
        4 + 8 + self.msg.len()
    }

    fn write_value(&self, buffer: &mut Vec<u8>) {
        codec::write_u32(buffer, self.desc.0);
        codec::write_i64(buffer, self.time);
        buffer.extend_from_slice(self.msg.as_bytes());
    }

    fn read_value(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);
        Ok(Self {
            desc: LogHandle(reader.read_u32()?),
            time: reader.read_i64()?,
            msg: reader.read_tail_str()?,
        })
    }
}

/// Log record bridged from another logging facade, no descriptor
#[derive(Clone, Debug, PartialEq)]
pub struct LogInteropEvent {
    pub time: i64,
    pub level: Level,
    pub target: String,
    pub msg: String,
}

impl InProcSerialize for LogInteropEvent {
    const IN_PROC_SIZE: InProcSize = InProcSize::Dynamic;

    fn dynamic_size(&self) -> usize {
        8 + 1 + codec::prefixed_str_size(&self.target) + self.msg.len()
    }

    fn write_value(&self, buffer: &mut Vec<u8>) {
        codec::write_i64(buffer, self.time);
        codec::write_u8(buffer, self.level as u8);
        codec::write_prefixed_str(buffer, &self.target);
        buffer.extend_from_slice(self.msg.as_bytes());
    }

    fn read_value(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);
        let time = reader.read_i64()?;
        let raw_level = reader.read_u8()?;
        let level = Level::from_u8(raw_level).ok_or(TelemetryError::InvalidLevel(raw_level))?;
        Ok(Self {
            time,
            level,
            target: reader.read_prefixed_str()?,
            msg: reader.read_tail_str()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntegerMetricEvent {
    pub desc: MetricHandle,
    pub time: i64,
    pub value: u64,
}

impl InProcSerialize for IntegerMetricEvent {
    const IN_PROC_SIZE: InProcSize = InProcSize::Const(20);

    fn write_value(&self, buffer: &mut Vec<u8>) {
        codec::write_u32(buffer, self.desc.0);
        codec::write_i64(buffer, self.time);
        codec::write_u64(buffer, self.value);
    }

    fn read_value(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);
        Ok(Self {
            desc: MetricHandle(reader.read_u32()?),
            time: reader.read_i64()?,
            value: reader.read_u64()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FloatMetricEvent {
    pub desc: MetricHandle,
    pub time: i64,
    pub value: f64,
}

impl InProcSerialize for FloatMetricEvent {
    const IN_PROC_SIZE: InProcSize = InProcSize::Const(20);

    fn write_value(&self, buffer: &mut Vec<u8>) {
        codec::write_u32(buffer, self.desc.0);
        codec::write_i64(buffer, self.time);
        codec::write_f64(buffer, self.value);
    }

    fn read_value(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);
        Ok(Self {
            desc: MetricHandle(reader.read_u32()?),
            time: reader.read_i64()?,
            value: reader.read_f64()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BeginThreadSpanEvent {
    pub desc: SpanHandle,
    pub time: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EndThreadSpanEvent {
    pub desc: SpanHandle,
    pub time: i64,
}

macro_rules! span_marker_codec {
    ($marker:ty) => {
        impl InProcSerialize for $marker {
            const IN_PROC_SIZE: InProcSize = InProcSize::Const(12);

            fn write_value(&self, buffer: &mut Vec<u8>) {
                codec::write_u32(buffer, self.desc.0);
                codec::write_i64(buffer, self.time);
            }

            fn read_value(payload: &[u8]) -> Result<Self> {
                let mut reader = Reader::new(payload);
                Ok(Self {
                    desc: SpanHandle(reader.read_u32()?),
                    time: reader.read_i64()?,
                })
            }
        }
    };
}

span_marker_codec!(BeginThreadSpanEvent);
span_marker_codec!(EndThreadSpanEvent);

crate::declare_event_queue! {
    /// Records of the process log channel
    #[derive(Clone, Debug, PartialEq)]
    pub enum LogEvent {
        StaticStr(LogStaticStrEvent),
        String(LogStringEvent),
        Interop(LogInteropEvent),
    }
}

crate::declare_event_queue! {
    /// Records of the process metric channel
    #[derive(Clone, Debug, PartialEq)]
    pub enum MetricEvent {
        Integer(IntegerMetricEvent),
        Float(FloatMetricEvent),
    }
}

crate::declare_event_queue! {
    /// Span markers of one thread
    #[derive(Clone, Debug, PartialEq)]
    pub enum ThreadEvent {
        Begin(BeginThreadSpanEvent),
        End(EndThreadSpanEvent),
    }
}

impl LogEvent {
    pub fn time(&self) -> i64 {
        match self {
            LogEvent::StaticStr(event) => event.time,
            LogEvent::String(event) => event.time,
            LogEvent::Interop(event) => event.time,
        }
    }
}

impl ThreadEvent {
    pub fn time(&self) -> i64 {
        match self {
            ThreadEvent::Begin(event) => event.time,
            ThreadEvent::End(event) => event.time,
        }
    }
}

/// Largest serialized record any channel can produce when text fields are
/// capped at `max_message_len` bytes.
pub fn max_record_size(max_message_len: usize) -> usize {
    // tag + length prefix + time + level + target prefix + target + message
    let interop = 1 + 4 + 8 + 1 + 4 + 2 * max_message_len;
    // tag + metric payload
    let metric = 1 + 20;
    interop.max(metric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{HeterogeneousQueue, QueueEvent};

    #[test]
    fn test_mixed_log_queue_round_trip() {
        let events = vec![
            LogEvent::from(LogStaticStrEvent {
                desc: LogHandle(3),
                time: 100,
            }),
            LogEvent::from(LogStringEvent {
                desc: LogHandle(4),
                time: 101,
                msg: "loaded 12 assets".to_string(),
            }),
            LogEvent::from(LogInteropEvent {
                time: 102,
                level: Level::Warn,
                target: "hyper::client".to_string(),
                msg: "connection reset".to_string(),
            }),
        ];
        let mut queue = HeterogeneousQueue::<LogEvent>::with_capacity(256);
        for event in events.clone() {
            queue.push(event);
        }

        let decoded: Vec<LogEvent> = queue.iter().collect::<Result<_>>().unwrap();
        assert_eq!(decoded, events);
    }

    #[test]
    fn test_scalar_records_have_fixed_sizes() {
        let metric = MetricEvent::from(FloatMetricEvent {
            desc: MetricHandle(0),
            time: 5,
            value: 0.25,
        });
        assert_eq!(HeterogeneousQueue::serialized_size(&metric), 21);

        let begin = ThreadEvent::from(BeginThreadSpanEvent {
            desc: SpanHandle(1),
            time: 9,
        });
        assert_eq!(HeterogeneousQueue::serialized_size(&begin), 13);
        assert_eq!(begin.time(), 9);
    }

    #[test]
    fn test_log_string_size_includes_prefix() {
        let event = LogEvent::from(LogStringEvent {
            desc: LogHandle(0),
            time: 0,
            msg: "event-0".to_string(),
        });
        assert_eq!(HeterogeneousQueue::serialized_size(&event), 24);
    }

    #[test]
    fn test_max_record_size_bounds_every_kind() {
        let msg = "m".repeat(32);
        let event = LogEvent::from(LogInteropEvent {
            time: 0,
            level: Level::Error,
            target: msg.clone(),
            msg,
        });
        assert_eq!(HeterogeneousQueue::serialized_size(&event), max_record_size(32));
    }

    #[test]
    fn test_kind_lists() {
        assert_eq!(
            LogEvent::KIND_NAMES,
            &["LogStaticStrEvent", "LogStringEvent", "LogInteropEvent"]
        );
        assert_eq!(ThreadEvent::KIND_NAMES.len(), 2);
    }
}
