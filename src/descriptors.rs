//! Call-site descriptors and the handle table that records refer to
//!
//! A record never carries its descriptor's strings. Each call site registers
//! its descriptor once and gets back a small integer handle which is what the
//! record serializes. The table is append-only, so a handle stays valid for
//! the life of the table and can be exported for offline decoding.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Level::Error),
            2 => Some(Level::Warn),
            3 => Some(Level::Info),
            4 => Some(Level::Debug),
            5 => Some(Level::Trace),
            _ => None,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Error => write!(f, "ERROR"),
            Level::Warn => write!(f, "WARN"),
            Level::Info => write!(f, "INFO"),
            Level::Debug => write!(f, "DEBUG"),
            Level::Trace => write!(f, "TRACE"),
        }
    }
}

impl From<&str> for Level {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "TRACE" | "VERBOSE" => Level::Trace,
            "DEBUG" => Level::Debug,
            "INFO" | "INFORMATION" => Level::Info,
            "WARN" | "WARNING" => Level::Warn,
            "ERROR" | "ERR" | "FATAL" | "CRITICAL" => Level::Error,
            _ => Level::Info,
        }
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::INFO => Level::Info,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::TRACE => Level::Trace,
        }
    }
}

/// Most verbose level still recorded
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LevelFilter {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LevelFilter {
    pub fn enables(self, level: Level) -> bool {
        level as u8 <= self as u8
    }
}

impl From<&str> for LevelFilter {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "OFF" | "NONE" => LevelFilter::Off,
            "ERROR" => LevelFilter::Error,
            "WARN" | "WARNING" => LevelFilter::Warn,
            "DEBUG" => LevelFilter::Debug,
            "TRACE" | "ALL" => LevelFilter::Trace,
            _ => LevelFilter::Info,
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq, Hash)]
pub struct LogDescriptor {
    pub level: Level,
    pub fmt_str: &'static str,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq, Hash)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub unit: &'static str,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq, Hash)]
pub struct SpanDescriptor {
    pub name: &'static str,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LogHandle(pub u32);

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MetricHandle(pub u32);

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SpanHandle(pub u32);

#[derive(Debug)]
struct Arena<D> {
    entries: Vec<D>,
    index: HashMap<D, u32>,
}

impl<D: Clone + Eq + Hash> Arena<D> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn register(&mut self, descriptor: D) -> u32 {
        if let Some(id) = self.index.get(&descriptor) {
            return *id;
        }
        let id = self.entries.len() as u32;
        self.entries.push(descriptor.clone());
        self.index.insert(descriptor, id);
        id
    }

    fn resolve(&self, id: u32) -> Option<D> {
        self.entries.get(id as usize).cloned()
    }
}

/// Append-only table mapping handles to call-site descriptors
#[derive(Debug)]
pub struct DescriptorTable {
    logs: RwLock<Arena<LogDescriptor>>,
    metrics: RwLock<Arena<MetricDescriptor>>,
    spans: RwLock<Arena<SpanDescriptor>>,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(Arena::new()),
            metrics: RwLock::new(Arena::new()),
            spans: RwLock::new(Arena::new()),
        }
    }

    /// Registering an identical descriptor twice returns the first handle.
    pub fn register_log(&self, descriptor: LogDescriptor) -> LogHandle {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        LogHandle(logs.register(descriptor))
    }

    pub fn register_metric(&self, descriptor: MetricDescriptor) -> MetricHandle {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        MetricHandle(metrics.register(descriptor))
    }

    pub fn register_span(&self, descriptor: SpanDescriptor) -> SpanHandle {
        let mut spans = self.spans.write().unwrap_or_else(PoisonError::into_inner);
        SpanHandle(spans.register(descriptor))
    }

    pub fn resolve_log(&self, handle: LogHandle) -> Option<LogDescriptor> {
        let logs = self.logs.read().unwrap_or_else(PoisonError::into_inner);
        logs.resolve(handle.0)
    }

    pub fn resolve_metric(&self, handle: MetricHandle) -> Option<MetricDescriptor> {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        metrics.resolve(handle.0)
    }

    pub fn resolve_span(&self, handle: SpanHandle) -> Option<SpanDescriptor> {
        let spans = self.spans.read().unwrap_or_else(PoisonError::into_inner);
        spans.resolve(handle.0)
    }

    /// Copy of every registered descriptor, indexed by handle value.
    pub fn snapshot(&self) -> DescriptorSnapshot {
        DescriptorSnapshot {
            logs: self.logs.read().unwrap_or_else(PoisonError::into_inner).entries.clone(),
            metrics: self
                .metrics
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .entries
                .clone(),
            spans: self.spans.read().unwrap_or_else(PoisonError::into_inner).entries.clone(),
        }
    }
}

/// Side-channel export of a descriptor table
#[derive(Clone, Debug, Serialize)]
pub struct DescriptorSnapshot {
    pub logs: Vec<LogDescriptor>,
    pub metrics: Vec<MetricDescriptor>,
    pub spans: Vec<SpanDescriptor>,
}
