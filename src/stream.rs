//! Channels owning the current writable block

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::block::EventBlock;
use crate::events::{LogEvent, MetricEvent, ThreadEvent};
use crate::queue::QueueEvent;
use crate::time::DualTime;

/// The continuous sequence of blocks of one channel.
///
/// Exactly one block is current at a time. `swap_blocks` takes `&mut self`,
/// so it can only run under whatever lock guards the stream.
#[derive(Debug)]
pub struct EventStream<E> {
    process_id: String,
    stream_id: String,
    tags: Vec<String>,
    properties: HashMap<String, String>,
    current_block: EventBlock<E>,
    padding: usize,
    full_threshold: usize,
    forced_full: bool,
}

pub type LogStream = EventStream<LogEvent>;
pub type MetricsStream = EventStream<MetricEvent>;
pub type ThreadStream = EventStream<ThreadEvent>;

impl<E: QueueEvent> EventStream<E> {
    /// `padding` must exceed the largest record the stream will ever receive.
    pub fn new(
        process_id: String,
        begin: DualTime,
        capacity: usize,
        padding: usize,
        tags: &[String],
        properties: HashMap<String, String>,
    ) -> Self {
        let stream_id = Uuid::new_v4().to_string();
        Self {
            process_id,
            current_block: EventBlock::new(stream_id.clone(), begin, capacity),
            stream_id,
            tags: tags.to_vec(),
            properties,
            padding,
            full_threshold: capacity.saturating_sub(padding),
            forced_full: false,
        }
    }

    /// Install `new_block` as current and hand back the previous block.
    pub fn swap_blocks(&mut self, new_block: EventBlock<E>) -> EventBlock<E> {
        self.full_threshold = new_block.capacity().saturating_sub(self.padding);
        self.forced_full = false;
        std::mem::replace(&mut self.current_block, new_block)
    }

    pub fn is_full(&self) -> bool {
        self.forced_full || self.current_block.size_bytes() >= self.full_threshold
    }

    /// True when appending `record_size` more bytes reaches the threshold.
    pub fn would_fill(&self, record_size: usize) -> bool {
        self.forced_full || self.current_block.size_bytes() + record_size >= self.full_threshold
    }

    /// Force `is_full` until the next swap.
    pub fn mark_full(&mut self) {
        self.forced_full = true;
    }

    pub fn is_empty(&self) -> bool {
        self.current_block.is_empty()
    }

    pub fn full_threshold(&self) -> usize {
        self.full_threshold
    }

    pub fn current_block(&self) -> &EventBlock<E> {
        &self.current_block
    }

    pub fn current_block_mut(&mut self) -> &mut EventBlock<E> {
        &mut self.current_block
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn describe(&self) -> StreamInfo {
        StreamInfo {
            process_id: self.process_id.clone(),
            stream_id: self.stream_id.clone(),
            tags: self.tags.clone(),
            properties: self.properties.clone(),
            kinds: E::KIND_NAMES.iter().map(|kind| kind.to_string()).collect(),
        }
    }
}

/// What a sink needs to know about a stream to store and decode its blocks
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamInfo {
    pub process_id: String,
    pub stream_id: String,
    pub tags: Vec<String>,
    pub properties: HashMap<String, String>,
    /// Record kinds in tag order
    pub kinds: Vec<String>,
}
