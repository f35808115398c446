//! Load generator exercising the telemetry engine end to end

use std::sync::Arc;

use async_trait::async_trait;
use blockscope::sink::forward;
use blockscope::{
    ChannelKind, ChannelSink, Config, Level, LogDescriptor, MetricDescriptor, Result, SinkEvent,
    SinkEventHandler, SpanDescriptor, Telemetry, TelemetryLayer,
};
use clap::Parser;
use rand::Rng;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(version, about = "Drive the telemetry engine with synthetic producers")]
struct Args {
    /// Producer threads
    #[arg(long, env = "DEMO_THREADS", default_value_t = 4)]
    threads: usize,

    /// Iterations per producer thread
    #[arg(long, env = "DEMO_ITERATIONS", default_value_t = 10_000)]
    iterations: usize,

    /// Override BLOCKSCOPE_LOG_BUFFER_SIZE
    #[arg(long)]
    log_buffer_size: Option<usize>,

    /// Override BLOCKSCOPE_THREAD_BUFFER_SIZE
    #[arg(long)]
    thread_buffer_size: Option<usize>,

    /// Skip the final flush so open blocks are lost at shutdown
    #[arg(long)]
    no_flush: bool,
}

#[derive(Debug, Default, Serialize)]
struct ChannelStats {
    streams: usize,
    blocks: usize,
    records: usize,
    bytes: usize,
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    process_id: Option<String>,
    log: ChannelStats,
    metrics: ChannelStats,
    thread: ChannelStats,
    decode_errors: usize,
    sink_dropped: u64,
    dispatch_dropped: u64,
}

impl Summary {
    fn channel(&mut self, kind: ChannelKind) -> &mut ChannelStats {
        match kind {
            ChannelKind::Log => &mut self.log,
            ChannelKind::Metrics => &mut self.metrics,
            ChannelKind::Thread => &mut self.thread,
        }
    }
}

#[async_trait]
impl SinkEventHandler for Summary {
    async fn handle(&mut self, event: SinkEvent) -> Result<()> {
        let (kind, records, bytes, decoded) = match event {
            SinkEvent::Startup(process) => {
                self.process_id = Some(process.process_id);
                return Ok(());
            }
            SinkEvent::InitStream(kind, _) => {
                self.channel(kind).streams += 1;
                return Ok(());
            }
            SinkEvent::Shutdown => return Ok(()),
            SinkEvent::LogBlock(block) => {
                (ChannelKind::Log, block.nb_objects(), block.size_bytes(), block.for_each(|_| {}))
            }
            SinkEvent::MetricsBlock(block) => (
                ChannelKind::Metrics,
                block.nb_objects(),
                block.size_bytes(),
                block.for_each(|_| {}),
            ),
            SinkEvent::ThreadBlock(block) => (
                ChannelKind::Thread,
                block.nb_objects(),
                block.size_bytes(),
                block.for_each(|_| {}),
            ),
        };
        if decoded.is_err() {
            self.decode_errors += 1;
        }
        let stats = self.channel(kind);
        stats.blocks += 1;
        stats.records += records;
        stats.bytes += bytes;
        decoded
    }
}

fn produce(telemetry: Telemetry, iterations: usize) {
    let descriptors = telemetry.descriptors();
    let frame_log = descriptors.register_log(LogDescriptor {
        level: Level::Info,
        fmt_str: "frame {} done",
        target: "demo::producer",
        file: file!(),
        line: line!(),
    });
    let idle_log = descriptors.register_log(LogDescriptor {
        level: Level::Info,
        fmt_str: "idle",
        target: "demo::producer",
        file: file!(),
        line: line!(),
    });
    let queue_depth = descriptors.register_metric(MetricDescriptor {
        name: "queue_depth",
        unit: "items",
        target: "demo::producer",
        file: file!(),
        line: line!(),
    });
    let latency = descriptors.register_metric(MetricDescriptor {
        name: "latency",
        unit: "ms",
        target: "demo::producer",
        file: file!(),
        line: line!(),
    });
    let work_item = descriptors.register_span(SpanDescriptor {
        name: "work_item",
        target: "demo::producer",
        file: file!(),
        line: line!(),
    });

    let mut rng = rand::rng();
    for frame in 0..iterations {
        telemetry.on_begin_scope(work_item);
        telemetry.int_metric(queue_depth, rng.random_range(0..256));
        telemetry.float_metric(latency, rng.random::<f64>() * 20.0);
        if rng.random_range(0..10) == 0 {
            telemetry.log(frame_log, format_args!("frame {} done", frame));
        } else if rng.random_range(0..50) == 0 {
            telemetry.log(idle_log, format_args!("idle"));
        }
        telemetry.on_end_scope(work_item);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(size) = args.log_buffer_size {
        config.log_buffer_size = size;
    }
    if let Some(size) = args.thread_buffer_size {
        config.thread_buffer_size = size;
    }

    let telemetry = match Telemetry::new(config) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    };

    initialize_tracing(&telemetry);

    info!("Starting blockscope demo v{}", env!("CARGO_PKG_VERSION"));

    let (sink, receiver) = ChannelSink::new(telemetry.config().sink_channel_capacity);
    let sink = Arc::new(sink);
    let consumer = tokio::spawn(forward(receiver, Summary::default()));
    telemetry.init(sink.clone())?;

    info!(
        "Running {} producers for {} iterations each",
        args.threads, args.iterations
    );
    let producers: Vec<_> = (0..args.threads)
        .map(|index| {
            let telemetry = telemetry.clone();
            let iterations = args.iterations;
            std::thread::Builder::new()
                .name(format!("producer-{}", index))
                .spawn(move || produce(telemetry, iterations))
        })
        .collect::<std::io::Result<_>>()?;

    let joined = tokio::task::spawn_blocking(move || {
        producers
            .into_iter()
            .map(|producer| producer.join().is_ok())
            .fold(true, |all_ok, ok| all_ok && ok)
    })
    .await
    .unwrap_or(false);
    if !joined {
        error!("A producer thread panicked");
    }

    if !args.no_flush {
        telemetry.flush_all();
    }
    let dispatch_dropped = telemetry.dropped_events();
    telemetry.shutdown();

    let mut summary = match consumer.await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Sink consumer failed: {}", e);
            std::process::exit(1);
        }
    };
    summary.sink_dropped = sink.dropped_events();
    summary.dispatch_dropped = dispatch_dropped;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Initialize structured logging, mirroring events into the log channel
fn initialize_tracing(telemetry: &Telemetry) {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(TelemetryLayer::new(telemetry.clone()))
        .init();
}
