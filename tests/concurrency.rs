use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use data_inspector::execution::{ExecutionOptions, Inspector, LoadOptions, LoadState};
use data_inspector::ingestion::{FormatRegistry, LoadContext, Loaded, LoaderPlugin};
use data_inspector::types::NativeValue;
use data_inspector::{LoadError, LoadResult};

fn tmp_file(name: &str, contents: &[u8]) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let path = std::env::temp_dir().join(format!("data-inspector-concurrency-{nanos}-{name}"));
    std::fs::write(&path, contents).unwrap();
    path
}

/// Sleeps inside `load`, checking for cancellation, then returns a small list.
struct SlowPlugin {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl LoaderPlugin for SlowPlugin {
    fn format_tag(&self) -> &'static str {
        "slow"
    }

    fn description(&self) -> &'static str {
        "Slow test format"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["slow"]
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let steps = 10;
        for i in 0..steps {
            ctx.check_cancelled()?;
            std::thread::sleep(self.delay / steps);
            ctx.report((i + 1) as f32 / steps as f32);
        }
        Ok(Loaded::new(NativeValue::List(vec![NativeValue::Int(1), NativeValue::Int(2)])))
    }
}

fn inspector(calls: &Arc<AtomicUsize>, delay: Duration, threads: usize) -> Inspector {
    let registry = FormatRegistry::builder()
        .register(SlowPlugin {
            calls: Arc::clone(calls),
            delay,
        })
        .builtin_plugins()
        .build();
    Inspector::with_registry(
        ExecutionOptions {
            num_threads: Some(threads),
            max_concurrent_reads: threads,
        },
        Arc::new(registry),
    )
    .unwrap()
}

#[test]
fn concurrent_loads_of_one_path_run_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let inspector = inspector(&calls, Duration::from_millis(300), 4);
    let path = tmp_file("shared.slow", b"x");

    let first = inspector.begin_load(&path, LoadOptions::default());
    let second = inspector.begin_load(&path, LoadOptions::default());
    let a = first.get_result().unwrap();
    let b = second.get_result().unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let snap = inspector.metrics().snapshot();
    assert_eq!(snap.loads_started, 1);
    assert_eq!(snap.loads_deduplicated, 1);
    assert_eq!(snap.loads_ready, 1);

    // A finished load is not reused.
    let third = inspector.load(&path, LoadOptions::default()).unwrap();
    assert!(!Arc::ptr_eq(&a, &third));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let _ = std::fs::remove_file(path);
}

#[test]
fn cancel_ends_in_cancelled_state() {
    let calls = Arc::new(AtomicUsize::new(0));
    let inspector = inspector(&calls, Duration::from_millis(500), 2);
    let path = tmp_file("cancel.slow", b"x");

    let handle = inspector.begin_load(&path, LoadOptions::default());
    let progress = handle.subscribe_progress();
    handle.cancel();

    let err = handle.get_result().unwrap_err();
    assert!(matches!(err, LoadError::Cancelled));
    assert_eq!(handle.state(), LoadState::Cancelled);

    let events: Vec<_> = progress.collect();
    assert_eq!(events.last().map(|e| e.stage), Some(LoadState::Cancelled));
    assert!(events.iter().all(|e| e.stage != LoadState::Ready));
    assert_eq!(inspector.metrics().snapshot().loads_cancelled, 1);
    let _ = std::fs::remove_file(path);
}

#[test]
fn progress_is_monotonic_and_ends_ready() {
    let calls = Arc::new(AtomicUsize::new(0));
    let inspector = inspector(&calls, Duration::from_millis(100), 2);
    let path = tmp_file("progress.slow", b"x");

    let handle = inspector.begin_load(&path, LoadOptions::default());
    let events: Vec<_> = handle.subscribe_progress().collect();
    let record = handle.get_result().unwrap();

    assert_eq!(record.node_count(), 1);
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    let last = events.last().unwrap();
    assert_eq!(last.stage, LoadState::Ready);
    assert_eq!(last.percent, 100.0);
    assert_eq!(handle.state(), LoadState::Ready);
    let _ = std::fs::remove_file(path);
}

#[test]
fn dropping_a_progress_stream_does_not_affect_the_load() {
    let calls = Arc::new(AtomicUsize::new(0));
    let inspector = inspector(&calls, Duration::from_millis(100), 2);
    let path = tmp_file("dropped.slow", b"x");

    let handle = inspector.begin_load(&path, LoadOptions::default());
    drop(handle.subscribe_progress());
    assert!(handle.get_result().is_ok());
    let _ = std::fs::remove_file(path);
}

#[test]
fn many_files_load_in_parallel() {
    let inspector = Inspector::new(ExecutionOptions {
        num_threads: Some(4),
        max_concurrent_reads: 2,
    })
    .unwrap();
    let paths: Vec<PathBuf> = (0..8)
        .map(|i| tmp_file(&format!("f{i}.json"), format!("{{\"i\": {i}}}").as_bytes()))
        .collect();

    let handles: Vec<_> = paths
        .iter()
        .map(|p| inspector.begin_load(p, LoadOptions::default()))
        .collect();
    for h in &handles {
        let record = h.wait_timeout(Duration::from_secs(30)).unwrap().unwrap();
        assert_eq!(record.format_tag, "json");
    }
    let snap = inspector.metrics().snapshot();
    assert_eq!(snap.loads_ready, 8);
    assert!(snap.max_active_loads <= 2);
    for p in paths {
        let _ = std::fs::remove_file(p);
    }
}
