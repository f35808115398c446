//! Process-wide coordinator routing records to their channel
//!
//! Each channel (process log, process metrics, one stream per thread) is
//! guarded by its own mutex. A push holds that mutex only to append the record
//! and, when the current block is full, to swap in a fresh one. The detached
//! block is sealed and handed to the sink after the mutex is released, so sink
//! latency never extends a critical section.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tracing::{debug, error, info, warn};

use crate::block::EventBlock;
use crate::codec::truncate_on_char_boundary;
use crate::config::Config;
use crate::descriptors::{DescriptorTable, Level, LevelFilter, LogHandle, MetricHandle, SpanHandle};
use crate::errors::{Result, TelemetryError};
use crate::events::{
    BeginThreadSpanEvent, EndThreadSpanEvent, FloatMetricEvent, IntegerMetricEvent, LogEvent,
    LogInteropEvent, LogStaticStrEvent, LogStringEvent, MetricEvent, ThreadEvent,
};
use crate::process::ProcessInfo;
use crate::queue::{HeterogeneousQueue, QueueEvent};
use crate::sink::EventSink;
use crate::stream::{EventStream, LogStream, MetricsStream, ThreadStream};
use crate::time::{self, DualTime};

static NEXT_DISPATCH_ID: AtomicU64 = AtomicU64::new(1);

/// This thread's stream in one dispatch
struct LocalThreadStream {
    dispatch_id: u64,
    dispatch: Weak<Dispatch>,
    stream: Weak<Mutex<ThreadStream>>,
}

/// Per-thread cache of the thread's streams. Dropped when the thread exits,
/// which flushes and unregisters every stream it still owns.
struct LocalThreadStreams(Vec<LocalThreadStream>);

impl Drop for LocalThreadStreams {
    fn drop(&mut self) {
        for local in self.0.drain(..) {
            if let (Some(dispatch), Some(stream)) = (local.dispatch.upgrade(), local.stream.upgrade()) {
                dispatch.retire_thread_stream(&stream);
            }
        }
    }
}

thread_local! {
    static LOCAL_THREAD_STREAMS: RefCell<LocalThreadStreams> =
        const { RefCell::new(LocalThreadStreams(Vec::new())) };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A block detached from its stream, waiting to be sealed
struct Detached<E> {
    block: EventBlock<E>,
    end: DualTime,
}

fn detach_current<E: QueueEvent>(stream: &mut EventStream<E>, buffer_size: usize) -> Detached<E> {
    let now = DualTime::now();
    let new_block = EventBlock::new(stream.stream_id().to_string(), now, buffer_size);
    Detached {
        block: stream.swap_blocks(new_block),
        end: now,
    }
}

/// Append `event`, swapping blocks first when the record would reach the
/// fullness threshold. The record that crosses the threshold opens the next
/// block. Runs under the stream lock.
fn push_event<E: QueueEvent>(
    stream: &mut EventStream<E>,
    event: E,
    buffer_size: usize,
) -> Option<Detached<E>> {
    let record_size = HeterogeneousQueue::serialized_size(&event);
    let detached = if !stream.is_empty() && stream.would_fill(record_size) {
        Some(detach_current(stream, buffer_size))
    } else {
        None
    };
    let pushed = stream.current_block_mut().push(event);
    debug_assert!(pushed.is_ok(), "the current block of a stream is never sealed");
    detached
}

/// Detach the current block once the stream reports full. Empty blocks stay.
fn detach_if_full<E: QueueEvent>(stream: &mut EventStream<E>, buffer_size: usize) -> Option<Detached<E>> {
    if stream.is_empty() || !stream.is_full() {
        return None;
    }
    Some(detach_current(stream, buffer_size))
}

/// Mark a non-empty stream full and detach its current block.
fn force_detach<E: QueueEvent>(stream: &mut EventStream<E>, buffer_size: usize) -> Option<Detached<E>> {
    if !stream.is_empty() {
        stream.mark_full();
    }
    detach_if_full(stream, buffer_size)
}

/// Stamp the end time. Called with no lock held.
fn seal<E: QueueEvent>(detached: Detached<E>) -> Option<Arc<EventBlock<E>>> {
    let Detached { mut block, end } = detached;
    match block.close(end) {
        Ok(()) => {
            debug!(
                "Sealed block {} of stream {} with {} records ({} bytes)",
                block.block_id(),
                block.stream_id(),
                block.nb_objects(),
                block.size_bytes()
            );
            Some(Arc::new(block))
        }
        Err(e) => {
            error!("Failed to seal detached block: {}", e);
            None
        }
    }
}

struct Dispatch {
    id: u64,
    process_id: String,
    config: Config,
    log_stream: Mutex<LogStream>,
    metrics_stream: Mutex<MetricsStream>,
    thread_streams: Mutex<Vec<Arc<Mutex<ThreadStream>>>>,
    sink: Arc<dyn EventSink>,
}

impl Dispatch {
    /// Build the dispatch and announce the process and its two process-wide
    /// streams. Nothing is shared yet, so the sink runs lock-free.
    fn start(config: Config, sink: Arc<dyn EventSink>) -> Self {
        let process_id = ProcessInfo::new_process_id();
        let start = DualTime::now();

        let log_stream = LogStream::new(
            process_id.clone(),
            start,
            config.log_buffer_size,
            config.block_padding,
            &["log".to_string()],
            HashMap::new(),
        );
        let metrics_stream = MetricsStream::new(
            process_id.clone(),
            start,
            config.metrics_buffer_size,
            config.block_padding,
            &["metrics".to_string()],
            HashMap::new(),
        );

        sink.on_startup(ProcessInfo::collect(process_id.clone(), start));
        sink.on_init_log_stream(&log_stream);
        sink.on_init_metrics_stream(&metrics_stream);

        Self {
            id: NEXT_DISPATCH_ID.fetch_add(1, Ordering::Relaxed),
            process_id,
            config,
            log_stream: Mutex::new(log_stream),
            metrics_stream: Mutex::new(metrics_stream),
            thread_streams: Mutex::new(Vec::new()),
            sink,
        }
    }

    fn queue_log(&self, event: LogEvent) {
        let detached = {
            let mut stream = lock(&self.log_stream);
            push_event(&mut stream, event, self.config.log_buffer_size)
        };
        if let Some(block) = detached.and_then(seal) {
            self.sink.on_process_log_block(block);
        }
    }

    fn queue_metric(&self, event: MetricEvent) {
        let detached = {
            let mut stream = lock(&self.metrics_stream);
            push_event(&mut stream, event, self.config.metrics_buffer_size)
        };
        if let Some(block) = detached.and_then(seal) {
            self.sink.on_process_metrics_block(block);
        }
    }

    fn queue_thread_event(self: &Arc<Self>, event: ThreadEvent) {
        let stream = self.current_thread_stream();
        let detached = {
            let mut stream = lock(&stream);
            push_event(&mut stream, event, self.config.thread_buffer_size)
        };
        if let Some(block) = detached.and_then(seal) {
            self.sink.on_process_thread_block(block);
        }
    }

    fn flush_log_buffer(&self) {
        let detached = {
            let mut stream = lock(&self.log_stream);
            force_detach(&mut stream, self.config.log_buffer_size)
        };
        if let Some(block) = detached.and_then(seal) {
            self.sink.on_process_log_block(block);
        }
    }

    fn flush_metrics_buffer(&self) {
        let detached = {
            let mut stream = lock(&self.metrics_stream);
            force_detach(&mut stream, self.config.metrics_buffer_size)
        };
        if let Some(block) = detached.and_then(seal) {
            self.sink.on_process_metrics_block(block);
        }
    }

    fn cached_thread_stream(&self) -> Option<Arc<Mutex<ThreadStream>>> {
        LOCAL_THREAD_STREAMS
            .try_with(|cell| {
                cell.borrow()
                    .0
                    .iter()
                    .find(|local| local.dispatch_id == self.id)
                    .and_then(|local| local.stream.upgrade())
            })
            .ok()
            .flatten()
    }

    fn current_thread_stream(self: &Arc<Self>) -> Arc<Mutex<ThreadStream>> {
        if let Some(stream) = self.cached_thread_stream() {
            return stream;
        }
        let stream = self.new_thread_stream();
        // Fails only while the thread is exiting; the stream then stays in
        // the registry until a sweep.
        let _ = LOCAL_THREAD_STREAMS.try_with(|cell| {
            let mut cache = cell.borrow_mut();
            cache.0.retain(|local| local.stream.strong_count() > 0);
            cache.0.push(LocalThreadStream {
                dispatch_id: self.id,
                dispatch: Arc::downgrade(self),
                stream: Arc::downgrade(&stream),
            });
        });
        stream
    }

    fn new_thread_stream(&self) -> Arc<Mutex<ThreadStream>> {
        let current = std::thread::current();
        let mut properties = HashMap::new();
        properties.insert("thread-id".to_string(), format!("{:?}", current.id()));
        if let Some(name) = current.name() {
            properties.insert("thread-name".to_string(), name.to_string());
        }

        let stream = ThreadStream::new(
            self.process_id.clone(),
            DualTime::now(),
            self.config.thread_buffer_size,
            self.config.block_padding,
            &["cpu".to_string()],
            properties,
        );
        // Announce before publishing so no block of this stream can precede it.
        self.sink.on_init_thread_stream(&stream);

        let stream = Arc::new(Mutex::new(stream));
        lock(&self.thread_streams).push(Arc::clone(&stream));
        stream
    }

    /// Unregister a stream whose thread is exiting and deliver what it holds.
    fn retire_thread_stream(&self, stream: &Arc<Mutex<ThreadStream>>) {
        lock(&self.thread_streams).retain(|registered| !Arc::ptr_eq(registered, stream));
        let detached = {
            let mut stream = lock(stream);
            force_detach(&mut stream, self.config.thread_buffer_size)
        };
        if let Some(block) = detached.and_then(seal) {
            self.sink.on_process_thread_block(block);
        }
    }

    fn flush_thread_buffer(&self) {
        let Some(stream) = self.cached_thread_stream() else {
            return;
        };
        let detached = {
            let mut stream = lock(&stream);
            force_detach(&mut stream, self.config.thread_buffer_size)
        };
        if let Some(block) = detached.and_then(seal) {
            self.sink.on_process_thread_block(block);
        }
    }

    fn for_each_thread_stream<F>(&self, mut callback: F) -> usize
    where
        F: FnMut(&mut ThreadStream),
    {
        let streams = lock(&self.thread_streams);
        for stream in streams.iter() {
            callback(&mut lock(stream));
        }
        streams.len()
    }

    fn flush_thread_streams(&self) -> usize {
        let mut detached = Vec::new();
        self.for_each_thread_stream(|stream| {
            if let Some(block) = force_detach(stream, self.config.thread_buffer_size) {
                detached.push(block);
            }
        });
        let mut flushed = 0;
        for block in detached.into_iter().filter_map(seal) {
            self.sink.on_process_thread_block(block);
            flushed += 1;
        }
        flushed
    }
}

/// Handle given to instrumented code.
///
/// Cloning is cheap and every clone refers to the same coordinator. Records
/// pushed while no dispatch is running (before `init`, after `shutdown`) are
/// discarded without error and counted in [`Telemetry::dropped_events`].
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<Shared>,
}

struct Shared {
    config: Config,
    descriptors: Arc<DescriptorTable>,
    dispatch: RwLock<Option<Arc<Dispatch>>>,
    initializing: AtomicBool,
    max_level: AtomicU8,
    dropped: AtomicU64,
    warned_dropped: AtomicBool,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("process_id", &self.process_id())
            .field("dropped", &self.dropped_events())
            .finish()
    }
}

impl Telemetry {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Shared {
                max_level: AtomicU8::new(config.max_level as u8),
                config,
                descriptors: Arc::new(DescriptorTable::new()),
                dispatch: RwLock::new(None),
                initializing: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                warned_dropped: AtomicBool::new(false),
            }),
        })
    }

    /// Start the dispatch. A second call while running is rejected.
    pub fn init(&self, sink: Arc<dyn EventSink>) -> Result<()> {
        if self.inner.initializing.swap(true, Ordering::AcqRel) {
            return Err(TelemetryError::AlreadyInitialized);
        }
        if self.dispatch().is_some() {
            self.inner.initializing.store(false, Ordering::Release);
            info!("Event dispatch already initialized");
            return Err(TelemetryError::AlreadyInitialized);
        }

        let dispatch = Arc::new(Dispatch::start(self.inner.config.clone(), sink));
        info!("Event dispatch started for process {}", dispatch.process_id);
        *self
            .inner
            .dispatch
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(dispatch);
        self.inner.initializing.store(false, Ordering::Release);
        Ok(())
    }

    /// Notify the sink and stop dispatching.
    ///
    /// Records still sitting in current blocks are dropped, not flushed. Call
    /// the flush operations first to deliver them.
    pub fn shutdown(&self) {
        let dispatch = self
            .inner
            .dispatch
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispatch) = dispatch {
            info!("Event dispatch for process {} shutting down", dispatch.process_id);
            dispatch.sink.on_shutdown();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.dispatch().is_some()
    }

    pub fn process_id(&self) -> Option<String> {
        self.dispatch().map(|dispatch| dispatch.process_id.clone())
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn descriptors(&self) -> &Arc<DescriptorTable> {
        &self.inner.descriptors
    }

    /// Records discarded because no dispatch was running
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn max_level(&self) -> LevelFilter {
        match self.inner.max_level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    pub fn set_max_level(&self, filter: LevelFilter) {
        self.inner.max_level.store(filter as u8, Ordering::Relaxed);
    }

    pub fn log_enabled(&self, level: Level) -> bool {
        self.max_level().enables(level)
    }

    /// Advisory signal from the sink, false when not running.
    pub fn is_sink_busy(&self) -> bool {
        self.dispatch()
            .map(|dispatch| dispatch.sink.is_busy())
            .unwrap_or(false)
    }

    fn dispatch(&self) -> Option<Arc<Dispatch>> {
        self.inner
            .dispatch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn running(&self) -> Option<Arc<Dispatch>> {
        let dispatch = self.dispatch();
        if dispatch.is_none() {
            let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if !self.inner.warned_dropped.swap(true, Ordering::Relaxed) {
                warn!(
                    "Telemetry event discarded, dispatch not running ({} dropped so far)",
                    dropped
                );
            }
        }
        dispatch
    }

    /// Log through a registered descriptor. Arguments that format to a static
    /// string store no text; anything else is formatted and stored inline.
    /// Handles unknown to the descriptor table are ignored.
    pub fn log(&self, desc: LogHandle, args: fmt::Arguments<'_>) {
        let Some(descriptor) = self.inner.descriptors.resolve_log(desc) else {
            return;
        };
        if !self.log_enabled(descriptor.level) {
            return;
        }
        let Some(dispatch) = self.running() else {
            return;
        };
        let time = time::now();
        let event = match args.as_str() {
            Some(_) => LogEvent::from(LogStaticStrEvent { desc, time }),
            None => {
                let mut msg = args.to_string();
                truncate_on_char_boundary(&mut msg, self.inner.config.max_message_len);
                LogEvent::from(LogStringEvent { desc, time, msg })
            }
        };
        dispatch.queue_log(event);
    }

    /// Log a record that has no registered descriptor.
    pub fn log_interop(&self, level: Level, target: &str, msg: &str) {
        if !self.log_enabled(level) {
            return;
        }
        let Some(dispatch) = self.running() else {
            return;
        };
        let max_len = self.inner.config.max_message_len;
        let mut target = target.to_string();
        let mut msg = msg.to_string();
        truncate_on_char_boundary(&mut target, max_len);
        truncate_on_char_boundary(&mut msg, max_len);
        dispatch.queue_log(LogEvent::from(LogInteropEvent {
            time: time::now(),
            level,
            target,
            msg,
        }));
    }

    pub fn int_metric(&self, desc: MetricHandle, value: u64) {
        if let Some(dispatch) = self.running() {
            dispatch.queue_metric(MetricEvent::from(IntegerMetricEvent {
                desc,
                time: time::now(),
                value,
            }));
        }
    }

    pub fn float_metric(&self, desc: MetricHandle, value: f64) {
        if let Some(dispatch) = self.running() {
            dispatch.queue_metric(MetricEvent::from(FloatMetricEvent {
                desc,
                time: time::now(),
                value,
            }));
        }
    }

    pub fn on_begin_scope(&self, desc: SpanHandle) {
        if let Some(dispatch) = self.running() {
            dispatch.queue_thread_event(ThreadEvent::from(BeginThreadSpanEvent {
                desc,
                time: time::now(),
            }));
        }
    }

    pub fn on_end_scope(&self, desc: SpanHandle) {
        if let Some(dispatch) = self.running() {
            dispatch.queue_thread_event(ThreadEvent::from(EndThreadSpanEvent {
                desc,
                time: time::now(),
            }));
        }
    }

    /// The calling thread's span stream, created and announced on first use.
    pub fn current_thread_stream(&self) -> Option<Arc<Mutex<ThreadStream>>> {
        self.dispatch().map(|dispatch| dispatch.current_thread_stream())
    }

    /// Visit every registered thread stream, returning how many were visited.
    ///
    /// Each stream is locked while visited; the callback must not push events.
    pub fn for_each_thread_stream<F>(&self, callback: F) -> usize
    where
        F: FnMut(&mut ThreadStream),
    {
        self.dispatch()
            .map(|dispatch| dispatch.for_each_thread_stream(callback))
            .unwrap_or(0)
    }

    pub fn flush_log_buffer(&self) {
        if let Some(dispatch) = self.dispatch() {
            dispatch.flush_log_buffer();
        }
    }

    pub fn flush_metrics_buffer(&self) {
        if let Some(dispatch) = self.dispatch() {
            dispatch.flush_metrics_buffer();
        }
    }

    /// Flush the calling thread's stream if it has one.
    pub fn flush_thread_buffer(&self) {
        if let Some(dispatch) = self.dispatch() {
            dispatch.flush_thread_buffer();
        }
    }

    /// Flush every non-empty thread stream, returning the blocks delivered.
    pub fn flush_thread_streams(&self) -> usize {
        self.dispatch()
            .map(|dispatch| dispatch.flush_thread_streams())
            .unwrap_or(0)
    }

    /// Flush every channel.
    pub fn flush_all(&self) {
        if let Some(dispatch) = self.dispatch() {
            dispatch.flush_log_buffer();
            dispatch.flush_metrics_buffer();
            dispatch.flush_thread_streams();
        }
    }
}
