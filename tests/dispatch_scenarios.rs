use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use blockscope::{
    Config, EventSink, Level, LevelFilter, LogBlock, LogDescriptor, LogEvent, LogHandle,
    LogStream, MetricDescriptor, MetricEvent, MetricsBlock, MetricsStream, ProcessInfo,
    SpanDescriptor, Telemetry, ThreadBlock, ThreadEvent, ThreadStream,
};

#[derive(Default)]
struct RecordingSink {
    startups: Mutex<Vec<ProcessInfo>>,
    shutdowns: Mutex<usize>,
    thread_streams: Mutex<Vec<String>>,
    log_blocks: Mutex<Vec<Arc<LogBlock>>>,
    metric_blocks: Mutex<Vec<Arc<MetricsBlock>>>,
    thread_blocks: Mutex<Vec<Arc<ThreadBlock>>>,
}

impl RecordingSink {
    fn log_records(&self) -> Vec<LogEvent> {
        let mut records = Vec::new();
        for block in self.log_blocks.lock().unwrap().iter() {
            block.for_each(|event| records.push(event)).unwrap();
        }
        records
    }

    fn metric_records(&self) -> Vec<MetricEvent> {
        let mut records = Vec::new();
        for block in self.metric_blocks.lock().unwrap().iter() {
            block.for_each(|event| records.push(event)).unwrap();
        }
        records
    }
}

impl EventSink for RecordingSink {
    fn on_startup(&self, process_info: ProcessInfo) {
        self.startups.lock().unwrap().push(process_info);
    }

    fn on_shutdown(&self) {
        *self.shutdowns.lock().unwrap() += 1;
    }

    fn on_init_log_stream(&self, _: &LogStream) {}

    fn on_init_metrics_stream(&self, _: &MetricsStream) {}

    fn on_init_thread_stream(&self, stream: &ThreadStream) {
        self.thread_streams
            .lock()
            .unwrap()
            .push(stream.stream_id().to_string());
    }

    fn on_process_log_block(&self, block: Arc<LogBlock>) {
        self.log_blocks.lock().unwrap().push(block);
    }

    fn on_process_metrics_block(&self, block: Arc<MetricsBlock>) {
        self.metric_blocks.lock().unwrap().push(block);
    }

    fn on_process_thread_block(&self, block: Arc<ThreadBlock>) {
        self.thread_blocks.lock().unwrap().push(block);
    }
}

fn scenario_config() -> Config {
    Config {
        log_buffer_size: 256,
        metrics_buffer_size: 256,
        thread_buffer_size: 256,
        block_padding: 128,
        max_message_len: 48,
        max_level: LevelFilter::Trace,
        sink_channel_capacity: 4,
    }
}

fn start() -> (Telemetry, Arc<RecordingSink>) {
    let telemetry = Telemetry::new(scenario_config()).unwrap();
    let sink = Arc::new(RecordingSink::default());
    telemetry.init(sink.clone()).unwrap();
    (telemetry, sink)
}

fn event_log(telemetry: &Telemetry) -> LogHandle {
    telemetry.descriptors().register_log(LogDescriptor {
        level: Level::Info,
        fmt_str: "event-{}",
        target: "scenario",
        file: file!(),
        line: line!(),
    })
}

fn messages(records: &[LogEvent]) -> Vec<String> {
    records
        .iter()
        .map(|event| match event {
            LogEvent::String(event) => event.msg.clone(),
            other => panic!("unexpected record {:?}", other),
        })
        .collect()
}

#[test]
fn test_sixth_fixed_record_seals_first_five() {
    let (telemetry, sink) = start();
    let desc = event_log(&telemetry);

    // Each record is 24 bytes: tag, length prefix, handle, time, 7 bytes of text.
    for index in 0..5 {
        telemetry.log(desc, format_args!("event-{}", index));
    }
    assert!(sink.log_blocks.lock().unwrap().is_empty());

    telemetry.log(desc, format_args!("event-{}", 5));

    let blocks = sink.log_blocks.lock().unwrap().clone();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].nb_objects(), 5);
    assert_eq!(blocks[0].size_bytes(), 120);
    assert!(blocks[0].end_time().is_ok());
    assert_eq!(
        messages(&sink.log_records()),
        vec!["event-0", "event-1", "event-2", "event-3", "event-4"]
    );
}

#[test]
fn test_shutdown_drops_open_blocks() {
    let (telemetry, sink) = start();
    let desc = event_log(&telemetry);
    let gauge = telemetry.descriptors().register_metric(MetricDescriptor {
        name: "gauge",
        unit: "count",
        target: "scenario",
        file: file!(),
        line: line!(),
    });

    for index in 0..8 {
        telemetry.log(desc, format_args!("event-{}", index));
    }
    for value in 0..7 {
        telemetry.int_metric(gauge, value);
    }
    telemetry.shutdown();

    // Still-open blocks: 3 log records and 1 metric record.
    assert_eq!(sink.log_records().len(), 8 - 3);
    assert_eq!(sink.metric_records().len(), 7 - 1);
    assert_eq!(*sink.shutdowns.lock().unwrap(), 1);

    telemetry.int_metric(gauge, 99);
    assert_eq!(sink.metric_records().len(), 6);
    assert_eq!(telemetry.dropped_events(), 1);
}

#[test]
fn test_thread_stream_identity() {
    let (telemetry, sink) = start();

    let first = telemetry.current_thread_stream().unwrap();
    let again = telemetry.current_thread_stream().unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    let others: Vec<String> = (0..2)
        .map(|_| {
            let telemetry = telemetry.clone();
            std::thread::spawn(move || {
                let stream = telemetry.current_thread_stream().unwrap();
                let same = telemetry.current_thread_stream().unwrap();
                assert!(Arc::ptr_eq(&stream, &same));
                let id = stream.lock().unwrap().stream_id().to_string();
                id
            })
            .join()
            .unwrap()
        })
        .collect();

    let announced = sink.thread_streams.lock().unwrap().clone();
    assert_eq!(announced.len(), 3);
    let unique: HashSet<_> = announced.iter().collect();
    assert_eq!(unique.len(), 3);
    assert!(others.iter().all(|id| announced.contains(id)));
    // Exited threads unregister their streams.
    assert_eq!(telemetry.for_each_thread_stream(|_| {}), 1);
}

#[test]
fn test_span_markers_round_trip_through_thread_block() {
    let (telemetry, sink) = start();
    let outer = telemetry.descriptors().register_span(SpanDescriptor {
        name: "outer",
        target: "scenario",
        file: file!(),
        line: line!(),
    });
    let inner = telemetry.descriptors().register_span(SpanDescriptor {
        name: "inner",
        target: "scenario",
        file: file!(),
        line: line!(),
    });

    telemetry.on_begin_scope(outer);
    telemetry.on_begin_scope(inner);
    telemetry.on_end_scope(inner);
    telemetry.on_end_scope(outer);
    telemetry.flush_thread_buffer();

    let blocks = sink.thread_blocks.lock().unwrap().clone();
    assert_eq!(blocks.len(), 1);
    let mut sequence = Vec::new();
    let mut last_time = i64::MIN;
    blocks[0]
        .for_each(|event| {
            assert!(event.time() >= last_time);
            last_time = event.time();
            sequence.push(match event {
                ThreadEvent::Begin(event) => ("begin", event.desc),
                ThreadEvent::End(event) => ("end", event.desc),
            });
        })
        .unwrap();
    assert_eq!(
        sequence,
        vec![("begin", outer), ("begin", inner), ("end", inner), ("end", outer)]
    );

    let encoded = blocks[0].encode().unwrap();
    let decoded = ThreadBlock::decode(&encoded);
    assert_eq!(decoded.nb_objects(), 4);
    assert_eq!(decoded.end_time().unwrap(), blocks[0].end_time().unwrap());
}

#[test]
fn test_concurrent_producers_lose_nothing_before_flush() {
    let (telemetry, sink) = start();
    let counter = telemetry.descriptors().register_metric(MetricDescriptor {
        name: "counter",
        unit: "count",
        target: "scenario",
        file: file!(),
        line: line!(),
    });

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let telemetry = telemetry.clone();
            std::thread::spawn(move || {
                for value in 0..1000 {
                    telemetry.int_metric(counter, value);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    telemetry.flush_all();

    let blocks = sink.metric_blocks.lock().unwrap().clone();
    assert!(blocks.iter().all(|block| block.size_bytes() < 128));
    assert_eq!(sink.metric_records().len(), 4000);
    assert_eq!(sink.startups.lock().unwrap().len(), 1);
}
