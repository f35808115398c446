//! Append-only byte queue for a closed set of record kinds
//!
//! Layout of every entry: `[kind tag: u8][len: u32 LE, dynamic kinds only][payload]`.
//! The tag is the position of the kind in the queue's declaration, so a decoder
//! must be built against the same ordered kind list as the producer.

use std::marker::PhantomData;

use crate::codec::{InProcSize, Reader};
use crate::errors::{Result, TelemetryError};

/// Closed set of record kinds accepted by one queue type.
///
/// Implemented by [`declare_event_queue!`]; hand implementations must keep
/// `kind_tag` and `kind_size` consistent with `KIND_NAMES`.
pub trait QueueEvent: Sized {
    /// Kind names in tag order.
    const KIND_NAMES: &'static [&'static str];

    fn kind_tag(&self) -> u8;

    /// Size class for a tag, `None` when the tag is not declared.
    fn kind_size(tag: u8) -> Option<InProcSize>;

    fn payload_size(&self) -> usize;

    fn write_payload(&self, buffer: &mut Vec<u8>);

    fn read_kind(tag: u8, payload: &[u8]) -> Result<Self>;
}

/// Declares the closed record enum of a queue.
///
/// ```ignore
/// declare_event_queue! {
///     pub enum MetricEvent {
///         Integer(IntegerMetricEvent),
///         Float(FloatMetricEvent),
///     }
/// }
/// ```
#[macro_export]
macro_rules! declare_event_queue {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident($kind:ty)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($variant($kind)),+
        }

        impl $crate::queue::QueueEvent for $name {
            const KIND_NAMES: &'static [&'static str] = &[$(stringify!($kind)),+];

            fn kind_tag(&self) -> u8 {
                #[allow(dead_code)]
                #[repr(u8)]
                enum Tag { $($variant),+ }
                match self {
                    $(Self::$variant(_) => Tag::$variant as u8),+
                }
            }

            fn kind_size(tag: u8) -> Option<$crate::codec::InProcSize> {
                #[allow(dead_code)]
                #[repr(u8)]
                enum Tag { $($variant),+ }
                $(
                    if tag == Tag::$variant as u8 {
                        return Some(<$kind as $crate::codec::InProcSerialize>::IN_PROC_SIZE);
                    }
                )+
                None
            }

            fn payload_size(&self) -> usize {
                match self {
                    $(Self::$variant(event) => $crate::codec::InProcSerialize::value_size(event)),+
                }
            }

            fn write_payload(&self, buffer: &mut Vec<u8>) {
                match self {
                    $(Self::$variant(event) => $crate::codec::InProcSerialize::write_value(event, buffer)),+
                }
            }

            fn read_kind(tag: u8, payload: &[u8]) -> $crate::errors::Result<Self> {
                #[allow(dead_code)]
                #[repr(u8)]
                enum Tag { $($variant),+ }
                $(
                    if tag == Tag::$variant as u8 {
                        return Ok(Self::$variant(
                            <$kind as $crate::codec::InProcSerialize>::read_value(payload)?,
                        ));
                    }
                )+
                Err($crate::errors::TelemetryError::UnknownKindTag {
                    tag,
                    kinds: Self::KIND_NAMES.len(),
                })
            }
        }

        $(
            impl From<$kind> for $name {
                fn from(event: $kind) -> Self {
                    Self::$variant(event)
                }
            }
        )+
    };
}

const TAG_SIZE: usize = 1;
const LEN_PREFIX_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct HeterogeneousQueue<E> {
    buffer: Vec<u8>,
    nb_objects: usize,
    _kinds: PhantomData<fn() -> E>,
}

impl<E: QueueEvent> HeterogeneousQueue<E> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            nb_objects: 0,
            _kinds: PhantomData,
        }
    }

    /// Rebuild a queue from bytes produced by a queue of the same kind set.
    pub fn from_bytes(buffer: Vec<u8>, nb_objects: usize) -> Self {
        Self {
            buffer,
            nb_objects,
            _kinds: PhantomData,
        }
    }

    /// Bytes a push of `event` appends, tag and length prefix included.
    pub fn serialized_size(event: &E) -> usize {
        let prefix = match E::kind_size(event.kind_tag()) {
            Some(InProcSize::Dynamic) => LEN_PREFIX_SIZE,
            _ => 0,
        };
        TAG_SIZE + prefix + event.payload_size()
    }

    pub fn push(&mut self, event: E) {
        let tag = event.kind_tag();
        self.buffer.push(tag);
        if let Some(InProcSize::Dynamic) = E::kind_size(tag) {
            let size = event.payload_size() as u32;
            self.buffer.extend_from_slice(&size.to_le_bytes());
        }
        event.write_payload(&mut self.buffer);
        self.nb_objects += 1;
    }

    pub fn len_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn nb_objects(&self) -> usize {
        self.nb_objects
    }

    pub fn is_empty(&self) -> bool {
        self.nb_objects == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn iter(&self) -> QueueIter<'_, E> {
        QueueIter {
            reader: Reader::new(&self.buffer),
            failed: false,
            _kinds: PhantomData,
        }
    }

    /// Visit every record in push order, stopping at the first decode error.
    pub fn for_each<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(E),
    {
        for event in self.iter() {
            visitor(event?);
        }
        Ok(())
    }
}

/// Single forward pass over a queue
pub struct QueueIter<'a, E> {
    reader: Reader<'a>,
    failed: bool,
    _kinds: PhantomData<fn() -> E>,
}

impl<E: QueueEvent> QueueIter<'_, E> {
    fn read_next(&mut self) -> Result<E> {
        let tag = self.reader.read_u8()?;
        let size = match E::kind_size(tag) {
            Some(InProcSize::Const(size)) => size,
            Some(InProcSize::Dynamic) => self.reader.read_u32()? as usize,
            None => {
                return Err(TelemetryError::UnknownKindTag {
                    tag,
                    kinds: E::KIND_NAMES.len(),
                });
            }
        };
        let payload = self.reader.take(size)?;
        E::read_kind(tag, payload)
    }
}

impl<E: QueueEvent> Iterator for QueueIter<'_, E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.remaining() == 0 {
            return None;
        }
        let next = self.read_next();
        self.failed = next.is_err();
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, InProcSerialize};

    #[derive(Debug, Clone, PartialEq)]
    struct Tick {
        value: u64,
    }

    impl InProcSerialize for Tick {
        const IN_PROC_SIZE: InProcSize = InProcSize::Const(8);

        fn write_value(&self, buffer: &mut Vec<u8>) {
            codec::write_u64(buffer, self.value);
        }

        fn read_value(payload: &[u8]) -> Result<Self> {
            Ok(Self {
                value: Reader::new(payload).read_u64()?,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        text: String,
    }

    impl InProcSerialize for Note {
        const IN_PROC_SIZE: InProcSize = InProcSize::Dynamic;

        fn dynamic_size(&self) -> usize {
            self.text.len()
        }

        fn write_value(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self.text.as_bytes());
        }

        fn read_value(payload: &[u8]) -> Result<Self> {
            Ok(Self {
                text: Reader::new(payload).read_tail_str()?,
            })
        }
    }

    declare_event_queue! {
        #[derive(Debug, Clone, PartialEq)]
        enum TestEvent {
            Tick(Tick),
            Note(Note),
        }
    }

    declare_event_queue! {
        #[derive(Debug, Clone, PartialEq)]
        enum TickOnly {
            Tick(Tick),
        }
    }

    #[test]
    fn test_decode_preserves_push_order() {
        let events = vec![
            TestEvent::from(Tick { value: 1 }),
            TestEvent::from(Note { text: "warming up".to_string() }),
            TestEvent::from(Tick { value: 2 }),
            TestEvent::from(Note { text: String::new() }),
        ];
        let mut queue = HeterogeneousQueue::<TestEvent>::with_capacity(64);
        for event in events.clone() {
            queue.push(event);
        }

        let mut decoded = Vec::new();
        queue.for_each(|event| decoded.push(event)).unwrap();
        assert_eq!(decoded, events);
        assert_eq!(queue.nb_objects(), 4);
    }

    #[test]
    fn test_fixed_kinds_skip_length_prefix() {
        let mut queue = HeterogeneousQueue::<TestEvent>::with_capacity(64);
        queue.push(Tick { value: 9 }.into());
        assert_eq!(queue.len_bytes(), 1 + 8);

        let note = TestEvent::from(Note { text: "abc".to_string() });
        assert_eq!(HeterogeneousQueue::serialized_size(&note), 1 + 4 + 3);
        queue.push(note);
        assert_eq!(queue.len_bytes(), 9 + 8);
        assert_eq!(queue.as_bytes()[0], 0);
        assert_eq!(queue.as_bytes()[9], 1);
    }

    #[test]
    fn test_undeclared_tag_is_rejected() {
        let mut queue = HeterogeneousQueue::<TestEvent>::with_capacity(64);
        queue.push(Note { text: "x".to_string() }.into());

        // Same bytes seen through a decoder that only knows one kind.
        let foreign = HeterogeneousQueue::<TickOnly>::from_bytes(queue.as_bytes().to_vec(), 1);
        let result = foreign.for_each(|_| {});
        assert!(matches!(
            result,
            Err(TelemetryError::UnknownKindTag { tag: 1, kinds: 1 })
        ));
    }

    #[test]
    fn test_truncated_buffer_stops_iteration() {
        let mut queue = HeterogeneousQueue::<TestEvent>::with_capacity(64);
        queue.push(Tick { value: 1 }.into());
        queue.push(Tick { value: 2 }.into());
        let bytes = &queue.as_bytes()[..queue.len_bytes() - 3];
        let partial = HeterogeneousQueue::<TestEvent>::from_bytes(bytes.to_vec(), 2);

        let results: Vec<_> = partial.iter().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(TelemetryError::Truncated { .. })));
    }

    #[test]
    fn test_kind_names_follow_declaration_order() {
        assert_eq!(TestEvent::KIND_NAMES, &["Tick", "Note"]);
    }
}
