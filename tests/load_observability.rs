use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use data_inspector::LoadError;
use data_inspector::execution::{LoadOptions, load_file};
use data_inspector::ingestion::{
    CompositeObserver, FileObserver, IngestionSeverity, LoadObserver, LoadStats, LoadTarget,
};

#[derive(Default)]
struct RecordingObserver {
    successes: Mutex<Vec<(Option<String>, usize)>>,
    failures: Mutex<Vec<IngestionSeverity>>,
    alerts: Mutex<Vec<IngestionSeverity>>,
}

impl LoadObserver for RecordingObserver {
    fn on_success(&self, target: &LoadTarget, stats: LoadStats) {
        self.successes
            .lock()
            .unwrap()
            .push((target.format_tag.clone(), stats.nodes));
    }

    fn on_failure(&self, _target: &LoadTarget, severity: IngestionSeverity, _error: &LoadError) {
        self.failures.lock().unwrap().push(severity);
    }

    fn on_alert(&self, _target: &LoadTarget, severity: IngestionSeverity, _error: &LoadError) {
        self.alerts.lock().unwrap().push(severity);
    }
}

fn tmp_file(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("data-inspector-observability-{nanos}-{name}"))
}

#[test]
fn observer_receives_failure_and_alert_on_critical_io_error() {
    let obs = Arc::new(RecordingObserver::default());
    let opts = LoadOptions {
        observer: Some(obs.clone()),
        alert_at_or_above: IngestionSeverity::Critical,
        ..Default::default()
    };

    let _ = load_file("tests/fixtures/does_not_exist.csv", &opts).unwrap_err();

    assert_eq!(*obs.failures.lock().unwrap(), vec![IngestionSeverity::Critical]);
    assert_eq!(*obs.alerts.lock().unwrap(), vec![IngestionSeverity::Critical]);
}

#[test]
fn corrupt_data_fails_without_alert() {
    let obs = Arc::new(RecordingObserver::default());
    let opts = LoadOptions {
        observer: Some(obs.clone()),
        alert_at_or_above: IngestionSeverity::Critical,
        ..Default::default()
    };
    let path = tmp_file("bad.json");
    std::fs::write(&path, b"{\"unterminated\": ").unwrap();

    let _ = load_file(&path, &opts).unwrap_err();

    assert_eq!(*obs.failures.lock().unwrap(), vec![IngestionSeverity::Error]);
    assert!(obs.alerts.lock().unwrap().is_empty());
    let _ = std::fs::remove_file(path);
}

#[test]
fn success_reports_format_and_node_count() {
    let obs = Arc::new(RecordingObserver::default());
    let opts = LoadOptions {
        observer: Some(obs.clone()),
        ..Default::default()
    };

    let record = load_file("tests/fixtures/people.csv", &opts).unwrap();

    let successes = obs.successes.lock().unwrap().clone();
    assert_eq!(successes, vec![(Some("csv".to_string()), record.node_count())]);
    assert!(obs.failures.lock().unwrap().is_empty());
}

#[test]
fn composite_fans_out_and_file_observer_appends() {
    let recording = Arc::new(RecordingObserver::default());
    let log_path = tmp_file("events.log");
    let composite = CompositeObserver::new(vec![
        recording.clone() as Arc<dyn LoadObserver>,
        Arc::new(FileObserver::new(&log_path)),
    ]);
    let opts = LoadOptions {
        observer: Some(Arc::new(composite)),
        alert_at_or_above: IngestionSeverity::Error,
        ..Default::default()
    };

    let _ = load_file("tests/fixtures/sample.json", &opts).unwrap();
    let _ = load_file("tests/fixtures/missing.json", &opts).unwrap_err();

    assert_eq!(recording.successes.lock().unwrap().len(), 1);
    assert_eq!(*recording.alerts.lock().unwrap(), vec![IngestionSeverity::Critical]);

    let log = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains(" ok format=json"));
    assert!(lines[1].contains(" fail severity=Critical"));
    assert!(lines[2].contains(" ALERT severity=Critical"));
    let _ = std::fs::remove_file(log_path);
}
