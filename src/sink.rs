//! Consumer interface for stream lifecycle events and sealed blocks

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::SendError};
use tracing::{debug, error, warn};

use crate::block::{LogBlock, MetricsBlock, ThreadBlock};
use crate::errors::Result;
use crate::process::ProcessInfo;
use crate::stream::{LogStream, MetricsStream, StreamInfo, ThreadStream};

/// Receiver of everything the dispatch produces.
///
/// Callbacks run on the producing thread with no dispatch lock held. Blocks
/// arrive sealed; the sink owns them from the call onward.
pub trait EventSink: Send + Sync {
    fn on_startup(&self, process_info: ProcessInfo);
    fn on_shutdown(&self);

    fn on_init_log_stream(&self, stream: &LogStream);
    fn on_init_metrics_stream(&self, stream: &MetricsStream);
    fn on_init_thread_stream(&self, stream: &ThreadStream);

    fn on_process_log_block(&self, block: Arc<LogBlock>);
    fn on_process_metrics_block(&self, block: Arc<MetricsBlock>);
    fn on_process_thread_block(&self, block: Arc<ThreadBlock>);

    /// Advisory only, the dispatch never waits on it.
    fn is_busy(&self) -> bool {
        false
    }
}

pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn on_startup(&self, _: ProcessInfo) {}
    fn on_shutdown(&self) {}
    fn on_init_log_stream(&self, _: &LogStream) {}
    fn on_init_metrics_stream(&self, _: &MetricsStream) {}
    fn on_init_thread_stream(&self, _: &ThreadStream) {}
    fn on_process_log_block(&self, _: Arc<LogBlock>) {}
    fn on_process_metrics_block(&self, _: Arc<MetricsBlock>) {}
    fn on_process_thread_block(&self, _: Arc<ThreadBlock>) {}
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Log,
    Metrics,
    Thread,
}

#[derive(Debug)]
pub enum SinkEvent {
    Startup(ProcessInfo),
    InitStream(ChannelKind, StreamInfo),
    LogBlock(Arc<LogBlock>),
    MetricsBlock(Arc<MetricsBlock>),
    ThreadBlock(Arc<ThreadBlock>),
    Shutdown,
}

impl SinkEvent {
    fn is_block(&self) -> bool {
        matches!(
            self,
            SinkEvent::LogBlock(_) | SinkEvent::MetricsBlock(_) | SinkEvent::ThreadBlock(_)
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            SinkEvent::Startup(_) => "startup",
            SinkEvent::InitStream(..) => "init_stream",
            SinkEvent::LogBlock(_) => "log_block",
            SinkEvent::MetricsBlock(_) => "metrics_block",
            SinkEvent::ThreadBlock(_) => "thread_block",
            SinkEvent::Shutdown => "shutdown",
        }
    }
}

/// Sink forwarding every event into a tokio channel.
///
/// Sending never blocks the producer. At most `capacity` blocks wait in the
/// channel; a block arriving beyond that is dropped and counted. Lifecycle
/// events (startup, stream announcements, shutdown) are never dropped while
/// the receiver is alive, and keep their order relative to blocks.
#[derive(Debug)]
pub struct ChannelSink {
    sender: UnboundedSender<SinkEvent>,
    pending_blocks: Arc<AtomicUsize>,
    capacity: usize,
    dropped: AtomicU64,
}

/// Receiving half of a [`ChannelSink`]
#[derive(Debug)]
pub struct SinkReceiver {
    receiver: UnboundedReceiver<SinkEvent>,
    pending_blocks: Arc<AtomicUsize>,
}

impl SinkReceiver {
    pub async fn recv(&mut self) -> Option<SinkEvent> {
        let event = self.receiver.recv().await?;
        if event.is_block() {
            self.pending_blocks.fetch_sub(1, Ordering::AcqRel);
        }
        Some(event)
    }
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, SinkReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending_blocks = Arc::new(AtomicUsize::new(0));
        (
            Self {
                sender,
                pending_blocks: Arc::clone(&pending_blocks),
                capacity,
                dropped: AtomicU64::new(0),
            },
            SinkReceiver {
                receiver,
                pending_blocks,
            },
        )
    }

    /// Events discarded because the channel was full or closed
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send_block(&self, event: SinkEvent) {
        let reserved = self
            .pending_blocks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < self.capacity).then_some(pending + 1)
            });
        if reserved.is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "Sink channel full, dropping {} ({} dropped so far)",
                event.kind(),
                dropped
            );
            return;
        }
        if let Err(SendError(event)) = self.sender.send(event) {
            self.pending_blocks.fetch_sub(1, Ordering::AcqRel);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Sink channel closed, dropping {}", event.kind());
        }
    }

    fn send_lifecycle(&self, event: SinkEvent) {
        if let Err(SendError(event)) = self.sender.send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Sink channel closed, dropping {}", event.kind());
        }
    }
}

impl EventSink for ChannelSink {
    fn on_startup(&self, process_info: ProcessInfo) {
        self.send_lifecycle(SinkEvent::Startup(process_info));
    }

    fn on_shutdown(&self) {
        self.send_lifecycle(SinkEvent::Shutdown);
    }

    fn on_init_log_stream(&self, stream: &LogStream) {
        self.send_lifecycle(SinkEvent::InitStream(ChannelKind::Log, stream.describe()));
    }

    fn on_init_metrics_stream(&self, stream: &MetricsStream) {
        self.send_lifecycle(SinkEvent::InitStream(ChannelKind::Metrics, stream.describe()));
    }

    fn on_init_thread_stream(&self, stream: &ThreadStream) {
        self.send_lifecycle(SinkEvent::InitStream(ChannelKind::Thread, stream.describe()));
    }

    fn on_process_log_block(&self, block: Arc<LogBlock>) {
        self.send_block(SinkEvent::LogBlock(block));
    }

    fn on_process_metrics_block(&self, block: Arc<MetricsBlock>) {
        self.send_block(SinkEvent::MetricsBlock(block));
    }

    fn on_process_thread_block(&self, block: Arc<ThreadBlock>) {
        self.send_block(SinkEvent::ThreadBlock(block));
    }

    fn is_busy(&self) -> bool {
        self.pending_blocks.load(Ordering::Acquire) >= self.capacity
    }
}

/// Receiving half of a [`ChannelSink`], typically a transport
#[async_trait]
pub trait SinkEventHandler: Send {
    async fn handle(&mut self, event: SinkEvent) -> Result<()>;
}

/// Drive `handler` until shutdown or until every sender is gone.
pub async fn forward<H: SinkEventHandler>(mut receiver: SinkReceiver, mut handler: H) -> H {
    while let Some(event) = receiver.recv().await {
        let shutdown = matches!(event, SinkEvent::Shutdown);
        if let Err(e) = handler.handle(event).await {
            error!("Sink handler failed: {}", e);
        }
        if shutdown {
            break;
        }
    }
    handler
}
