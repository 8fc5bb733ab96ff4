use std::io;
use std::sync::{Arc, Mutex};

use rayon::prelude::*;

use super::*;
use crate::engine::{ExecutionEngine, LocalEngine};

fn engine() -> LocalEngine {
    LocalEngine::new(4).unwrap()
}

fn two_numbers() -> MetricsRecord {
    MetricsRecord::new(vec![
        Box::new(NumberField::new("a", "Alpha")),
        Box::new(NumberField::new("b", "Beta")),
    ])
    .unwrap()
}

#[test]
fn duplicate_keys_are_rejected() {
    let err = MetricsRecord::new(vec![
        Box::new(NumberField::new("a", "first")),
        Box::new(NumberField::new("a", "second")),
    ])
    .unwrap_err();
    assert_eq!(err, MetricsError::DuplicateKey("a".to_string()));
}

#[test]
fn record_metrics_adds_and_ignores_unknown_keys() {
    let record = two_numbers();
    record.record_metrics([("a", 2.0), ("zzz", 9.0), ("a", 3.0), ("b", 1.0)]);

    assert_eq!(record.value("a"), Some(5.0));
    assert_eq!(record.value("b"), Some(1.0));
    assert_eq!(record.value("zzz"), None);
    assert_eq!(record.len(), 2);
}

#[test]
fn lines_follow_insertion_order() {
    let record = two_numbers();
    record.record_metrics([("b", 1.5), ("a", 4.0)]);

    assert_eq!(record.lines(), vec!["Alpha: 4".to_string(), "Beta: 1.5".to_string()]);
}

#[test]
fn accumulator_field_sums_worker_contributions() {
    let engine = engine();
    let record = standard_record(&engine).unwrap();
    let tiles = record.accumulator(keys::NUM_TILES).unwrap();

    engine.install(Box::new(move || {
        (0..64).into_par_iter().for_each(|_| tiles.add(1.0));
    }));

    assert_eq!(record.value(keys::NUM_TILES), Some(64.0));
    assert_eq!(record.value(keys::NUM_TILES), Some(64.0));
}

#[test]
fn only_distributed_fields_expose_an_accumulator() {
    let engine = engine();
    let record = standard_record(&engine).unwrap();

    assert!(record.accumulator(keys::CALCULATION).is_some());
    assert!(record.accumulator(keys::ACTUAL_TIME).is_none());
    assert!(record.accumulator("missing").is_none());
}

#[test]
fn standard_record_has_the_expected_fields() {
    let engine = engine();
    let record = standard_record(&engine).unwrap();
    let keys: Vec<&str> = record.fields().map(|f| f.key()).collect();
    assert_eq!(
        keys,
        vec!["num_tiles", "partitions", "tile_fetch", "calculation", "actual_time"]
    );
}

#[test]
fn json_sink_collects_every_field() {
    let record = two_numbers();
    record.record_metrics([("a", 1.0), ("b", f64::NAN)]);

    let mut sink = JsonSink::new();
    record.write_metrics(&mut sink);
    assert_eq!(sink.get("a"), Some(1.0));

    let value = sink.into_value();
    assert_eq!(value["a"], 1.0);
    assert!(value["b"].is_null());
}

/// Shared buffer that a `fmt` subscriber writes its output into.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture(f: impl FnOnce()) -> String {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    logs.text()
}

#[test]
fn tracing_sink_logs_one_line_per_field_in_order() {
    let record = two_numbers();
    record.record_metrics([("a", 4.0), ("b", 0.5)]);

    let out = capture(|| record.write_metrics(&mut TracingSink));

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("Alpha: 4"));
    assert!(lines[0].contains("metric=\"a\""));
    assert!(lines[1].contains("Beta: 0.5"));
    assert!(lines[1].contains("metric=\"b\""));
}

#[test]
fn print_metrics_matches_lines() {
    let record = two_numbers();
    record.record_metrics([("a", 2.0), ("b", 3.0)]);

    let out = capture(|| record.print_metrics());

    for line in record.lines() {
        assert!(out.contains(&line), "missing {line:?} in {out:?}");
    }
}
