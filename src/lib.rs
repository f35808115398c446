//! In-process telemetry block engine
//!
//! Log records, scalar metrics and span markers are serialized into bounded
//! blocks, one current block per channel. A block that fills up is swapped
//! out, sealed and handed to an [`EventSink`] without any I/O on the hot path.

pub mod block;
pub mod codec;
pub mod config;
pub mod descriptors;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod layer;
pub mod process;
pub mod queue;
pub mod sink;
pub mod stream;
pub mod time;

pub use block::{EncodedBlock, EventBlock, LogBlock, MetricsBlock, ThreadBlock};
pub use config::Config;
pub use descriptors::{
    DescriptorTable, Level, LevelFilter, LogDescriptor, LogHandle, MetricDescriptor, MetricHandle,
    SpanDescriptor, SpanHandle,
};
pub use dispatch::Telemetry;
pub use errors::{Result, TelemetryError};
pub use events::{LogEvent, MetricEvent, ThreadEvent};
pub use layer::TelemetryLayer;
pub use process::ProcessInfo;
pub use queue::{HeterogeneousQueue, QueueEvent};
pub use sink::{
    ChannelKind, ChannelSink, EventSink, NullEventSink, SinkEvent, SinkEventHandler, SinkReceiver,
};
pub use stream::{EventStream, LogStream, MetricsStream, StreamInfo, ThreadStream};
pub use time::DualTime;
