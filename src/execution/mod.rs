//! Concurrent loading: a worker pool, a read throttle, in-flight deduplication and progress.
//!
//! [`Inspector::begin_load`] returns a [`LoadHandle`] immediately; the load runs on the
//! inspector's rayon pool through the `Detecting → Loading → Normalizing → Ready` pipeline.
//!
//! - Loads of the same (canonicalized) path that overlap share one run and one
//!   `Arc<FileRecord>`.
//! - At most [`ExecutionOptions::max_concurrent_reads`] loads are in their `Loading` stage.
//! - Progress is broadcast to every [`ProgressStream`] subscriber.
//! - Live counters are available from [`Inspector::metrics`].

mod cancel;
mod metrics;
mod pipeline;
mod progress;
mod semaphore;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use serde::Deserialize;

use crate::error::{LoadError, LoadResult};
use crate::ingestion::registry::{FormatInfo, FormatRegistry};
use crate::model::FileRecord;

pub use cancel::CancellationToken;
pub use metrics::{LoadMetrics, LoadMetricsSnapshot};
pub use pipeline::{LoadOptions, LoadState, load_file, load_file_with};
pub use progress::{ProgressEvent, ProgressStream};

use pipeline::{PipelineEnv, execute, notify_observer};
use progress::ProgressHub;
use semaphore::Semaphore;

/// Configuration for an [`Inspector`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Number of worker threads; `None` uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Upper bound on loads reading from disk at the same time.
    pub max_concurrent_reads: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            num_threads: Some(n),
            max_concurrent_reads: n.max(1),
        }
    }
}

#[derive(Debug)]
struct Outcome {
    state: LoadState,
    result: Option<LoadResult<Arc<FileRecord>>>,
}

/// State shared by every handle attached to one load.
struct SharedLoad {
    path: PathBuf,
    outcome: Mutex<Outcome>,
    done: Condvar,
    progress: ProgressHub,
    cancel: CancellationToken,
}

impl SharedLoad {
    fn lock(&self) -> MutexGuard<'_, Outcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, state: LoadState, percent: f32, message: &str) {
        {
            let mut outcome = self.lock();
            if outcome.state.is_terminal() {
                return;
            }
            outcome.state = state;
        }
        self.progress.emit(state, percent, message);
    }

    fn complete(&self, result: LoadResult<Arc<FileRecord>>) {
        let (state, message) = match &result {
            Ok(record) => (LoadState::Ready, format!("{} nodes", record.node_count())),
            Err(LoadError::Cancelled) => (LoadState::Cancelled, "cancelled".to_string()),
            Err(e) => (LoadState::Failed, e.to_string()),
        };
        {
            let mut outcome = self.lock();
            outcome.state = state;
            outcome.result = Some(result);
        }
        self.done.notify_all();
        self.progress.finish(state, message);
    }
}

/// Handle to an in-flight or finished load. Cheap to clone.
#[derive(Clone)]
pub struct LoadHandle {
    shared: Arc<SharedLoad>,
}

impl fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle")
            .field("path", &self.shared.path)
            .field("state", &self.state())
            .finish()
    }
}

impl LoadHandle {
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn state(&self) -> LoadState {
        self.shared.lock().state
    }

    /// Progress events from now until the terminal event.
    pub fn subscribe_progress(&self) -> ProgressStream {
        self.shared.progress.subscribe()
    }

    /// Request cancellation. Affects every handle attached to this load.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Block until the load finishes.
    pub fn get_result(&self) -> LoadResult<Arc<FileRecord>> {
        let mut outcome = self.shared.lock();
        loop {
            if let Some(result) = &outcome.result {
                return result.clone();
            }
            outcome = self
                .shared
                .done
                .wait(outcome)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`Self::get_result`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<LoadResult<Arc<FileRecord>>> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.shared.lock();
        loop {
            if let Some(result) = &outcome.result {
                return Some(result.clone());
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            outcome = self
                .shared
                .done
                .wait_timeout(outcome, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Runs loads on a worker pool.
///
/// # Example
///
/// ```no_run
/// use data_inspector::execution::{ExecutionOptions, Inspector, LoadOptions};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let inspector = Inspector::new(ExecutionOptions::default())?;
/// let handle = inspector.begin_load("scan.fits", LoadOptions::default());
/// for event in handle.subscribe_progress() {
///     println!("{} {:.0}% {}", event.stage, event.percent, event.message);
/// }
/// let record = handle.get_result()?;
/// println!("{}", record.root.kind);
/// # Ok(())
/// # }
/// ```
pub struct Inspector {
    pool: ThreadPool,
    registry: Arc<FormatRegistry>,
    throttle: Arc<Semaphore>,
    metrics: Arc<LoadMetrics>,
    in_flight: Arc<Mutex<HashMap<PathBuf, Weak<SharedLoad>>>>,
}

impl fmt::Debug for Inspector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inspector")
            .field("threads", &self.pool.current_num_threads())
            .field("registry", &self.registry)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

impl Inspector {
    /// Inspector with the built-in format plugins.
    pub fn new(opts: ExecutionOptions) -> Result<Self, ThreadPoolBuildError> {
        Self::with_registry(opts, Arc::new(FormatRegistry::with_builtin_plugins()))
    }

    pub fn with_registry(
        opts: ExecutionOptions,
        registry: Arc<FormatRegistry>,
    ) -> Result<Self, ThreadPoolBuildError> {
        let n_threads = opts
            .num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("inspect-{i}"))
            .build()?;
        Ok(Self {
            pool,
            registry,
            throttle: Arc::new(Semaphore::new(opts.max_concurrent_reads)),
            metrics: Arc::new(LoadMetrics::new()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }

    /// Live load counters.
    pub fn metrics(&self) -> Arc<LoadMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn list_supported_formats(&self) -> Vec<FormatInfo> {
        self.registry.supported_formats()
    }

    /// Start loading `path` and return immediately.
    ///
    /// If a load of the same path is still running, the returned handle attaches to it and
    /// `opts` is ignored.
    pub fn begin_load(&self, path: impl AsRef<Path>, opts: LoadOptions) -> LoadHandle {
        let path = path.as_ref();
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = in_flight.get(&key).and_then(Weak::upgrade) {
            if !existing.lock().state.is_terminal() {
                log::debug!("{}: attaching to in-flight load", path.display());
                self.metrics.on_deduplicated();
                return LoadHandle { shared: existing };
            }
        }

        let shared = Arc::new(SharedLoad {
            path: path.to_path_buf(),
            outcome: Mutex::new(Outcome {
                state: LoadState::Detecting,
                result: None,
            }),
            done: Condvar::new(),
            progress: ProgressHub::new(),
            cancel: opts.cancel.clone(),
        });
        in_flight.insert(key.clone(), Arc::downgrade(&shared));
        drop(in_flight);
        self.metrics.on_load_started();

        let job = LoadJob {
            key,
            shared: Arc::clone(&shared),
            opts,
            registry: Arc::clone(&self.registry),
            throttle: Arc::clone(&self.throttle),
            metrics: Arc::clone(&self.metrics),
            in_flight: Arc::clone(&self.in_flight),
        };
        self.pool.spawn(move || job.run());
        LoadHandle { shared }
    }

    /// Load and block until the result is available.
    pub fn load(&self, path: impl AsRef<Path>, opts: LoadOptions) -> LoadResult<Arc<FileRecord>> {
        self.begin_load(path, opts).get_result()
    }
}

struct LoadJob {
    key: PathBuf,
    shared: Arc<SharedLoad>,
    opts: LoadOptions,
    registry: Arc<FormatRegistry>,
    throttle: Arc<Semaphore>,
    metrics: Arc<LoadMetrics>,
    in_flight: Arc<Mutex<HashMap<PathBuf, Weak<SharedLoad>>>>,
}

impl LoadJob {
    fn run(self) {
        let started = Instant::now();
        let path = self.shared.path.clone();
        let shared = &self.shared;
        let on_stage =
            |state: LoadState, percent: f32, message: &str| shared.advance(state, percent, message);
        let env = PipelineEnv {
            on_stage: &on_stage,
            read_throttle: Some(self.throttle.as_ref()),
            metrics: Some(self.metrics.as_ref()),
            ..PipelineEnv::new(&self.registry)
        };

        let mut format_tag = None;
        let run = || execute(&path, &self.opts, &env, &mut format_tag);
        let result = panic::catch_unwind(AssertUnwindSafe(run))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                log::error!("{}: loader panicked: {message}", path.display());
                Err(LoadError::corrupt(
                    format_tag.clone().unwrap_or_else(|| "unknown".to_string()),
                    format!("loader panicked: {message}"),
                ))
            });

        match &result {
            Ok(record) => self.metrics.on_ready(record.node_count(), record.file_size_bytes),
            Err(LoadError::Cancelled) => self.metrics.on_cancelled(),
            Err(_) => self.metrics.on_failed(),
        }
        notify_observer(&self.opts, &path, format_tag, result.as_ref(), started.elapsed());

        self.shared.complete(result.map(Arc::new));
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(&self.key)
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(&self.shared)))
        {
            in_flight.remove(&self.key);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::plugin::{LoadContext, Loaded, LoaderPlugin};
    use crate::types::NativeValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tmp_file(name: &str, contents: &[u8]) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("data_inspector_exec_{nanos}_{name}"));
        std::fs::write(&path, contents).unwrap();
        path
    }

    struct PanickingPlugin;

    impl LoaderPlugin for PanickingPlugin {
        fn format_tag(&self) -> &'static str {
            "boom"
        }
        fn description(&self) -> &'static str {
            "always panics"
        }
        fn extensions(&self) -> &'static [&'static str] {
            &["boom"]
        }
        fn load(&self, _ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
            panic!("plugin bug");
        }
    }

    struct CountingPlugin {
        calls: Arc<AtomicUsize>,
    }

    impl LoaderPlugin for CountingPlugin {
        fn format_tag(&self) -> &'static str {
            "slow"
        }
        fn description(&self) -> &'static str {
            "counts calls"
        }
        fn extensions(&self) -> &'static [&'static str] {
            &["slow"]
        }
        fn load(&self, _ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            Ok(Loaded::new(NativeValue::Int(1)))
        }
    }

    fn opts(threads: usize) -> ExecutionOptions {
        ExecutionOptions {
            num_threads: Some(threads),
            max_concurrent_reads: threads,
        }
    }

    #[test]
    fn panicking_plugins_fail_the_load() {
        let registry = Arc::new(FormatRegistry::builder().register(PanickingPlugin).build());
        let inspector = Inspector::with_registry(opts(1), registry).unwrap();
        let path = tmp_file("x.boom", b"data");
        let handle = inspector.begin_load(&path, LoadOptions::default());
        let err = handle.get_result().unwrap_err();
        assert!(err.to_string().contains("plugin bug"));
        assert_eq!(handle.state(), LoadState::Failed);
        assert_eq!(inspector.metrics().snapshot().loads_failed, 1);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn concurrent_loads_of_one_path_share_a_record() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(
            FormatRegistry::builder()
                .register(CountingPlugin {
                    calls: Arc::clone(&calls),
                })
                .build(),
        );
        let inspector = Inspector::with_registry(opts(2), registry).unwrap();
        let path = tmp_file("shared.slow", b"x");
        let a = inspector.begin_load(&path, LoadOptions::default());
        let b = inspector.begin_load(&path, LoadOptions::default());
        let (ra, rb) = (a.get_result().unwrap(), b.get_result().unwrap());
        assert!(Arc::ptr_eq(&ra, &rb));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(inspector.metrics().snapshot().loads_deduplicated, 1);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn wait_timeout_gives_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(
            FormatRegistry::builder()
                .register(CountingPlugin { calls })
                .build(),
        );
        let inspector = Inspector::with_registry(opts(1), registry).unwrap();
        let path = tmp_file("timeout.slow", b"x");
        let handle = inspector.begin_load(&path, LoadOptions::default());
        assert!(handle.wait_timeout(Duration::from_millis(1)).is_none());
        assert!(handle.wait_timeout(Duration::from_secs(10)).is_some());
        let _ = std::fs::remove_file(path);
    }
}
