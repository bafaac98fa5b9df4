use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Live counters for an [`crate::execution::Inspector`].
///
/// Updated by the load workers; callers can snapshot them at any time.
#[derive(Debug, Default)]
pub struct LoadMetrics {
    loads_started: AtomicU64,
    loads_deduplicated: AtomicU64,
    loads_ready: AtomicU64,
    loads_failed: AtomicU64,
    loads_cancelled: AtomicU64,
    nodes_produced: AtomicU64,
    bytes_read: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_loads: AtomicUsize,
    max_active_loads: AtomicUsize,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_load_started(&self) {
        self.loads_started.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_deduplicated(&self) {
        self.loads_deduplicated.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_read_start(&self) {
        let now = self.active_loads.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_loads.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn on_read_end(&self) {
        self.active_loads.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn on_ready(&self, nodes: usize, bytes: u64) {
        self.loads_ready.fetch_add(1, Ordering::SeqCst);
        self.nodes_produced.fetch_add(nodes as u64, Ordering::SeqCst);
        self.bytes_read.fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn on_failed(&self) {
        self.loads_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_cancelled(&self) {
        self.loads_cancelled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_throttle_wait(&self, d: Duration) {
        let add = d.as_nanos().min(u64::MAX as u128) as u64;
        self.throttle_wait_ns.fetch_add(add, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> LoadMetricsSnapshot {
        LoadMetricsSnapshot {
            loads_started: self.loads_started.load(Ordering::SeqCst),
            loads_deduplicated: self.loads_deduplicated.load(Ordering::SeqCst),
            loads_ready: self.loads_ready.load(Ordering::SeqCst),
            loads_failed: self.loads_failed.load(Ordering::SeqCst),
            loads_cancelled: self.loads_cancelled.load(Ordering::SeqCst),
            nodes_produced: self.nodes_produced.load(Ordering::SeqCst),
            bytes_read: self.bytes_read.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_active_loads: self.max_active_loads.load(Ordering::SeqCst),
        }
    }
}

/// Immutable snapshot of [`LoadMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMetricsSnapshot {
    pub loads_started: u64,
    /// `begin_load` calls that attached to an in-flight load.
    pub loads_deduplicated: u64,
    pub loads_ready: u64,
    pub loads_failed: u64,
    pub loads_cancelled: u64,
    pub nodes_produced: u64,
    pub bytes_read: u64,
    pub throttle_wait: Duration,
    pub max_active_loads: usize,
}

impl fmt::Display for LoadMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loads={}/{} (failed={}, cancelled={}, deduplicated={}), nodes={}, bytes={}, \
             max_active_loads={}, throttle_wait={:?}",
            self.loads_ready,
            self.loads_started,
            self.loads_failed,
            self.loads_cancelled,
            self.loads_deduplicated,
            self.nodes_produced,
            self.bytes_read,
            self.max_active_loads,
            self.throttle_wait
        )
    }
}
