use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{LoadError, load_error_involves_io};

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IngestionSeverity {
    /// Informational event (e.g. a cancelled load).
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (the load failed).
    Error,
    /// Critical error (typically I/O or other infrastructure failures).
    Critical,
}

impl IngestionSeverity {
    /// Severity of a load failure.
    ///
    /// I/O failures are critical, including parse failures whose source chain holds an I/O
    /// error; cancellation is informational.
    pub fn for_error(error: &LoadError) -> Self {
        match error {
            LoadError::Cancelled => Self::Info,
            e if load_error_involves_io(e) => Self::Critical,
            _ => Self::Error,
        }
    }
}

/// What was being loaded.
#[derive(Debug, Clone)]
pub struct LoadTarget {
    pub path: PathBuf,
    /// Resolved format tag; `None` if the failure happened before resolution.
    pub format_tag: Option<String>,
}

/// Summary reported on a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub nodes: usize,
    pub warnings: usize,
    pub elapsed: Duration,
}

/// Observer interface for load outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait LoadObserver: Send + Sync {
    /// Called when a load reaches `Ready`.
    fn on_success(&self, _target: &LoadTarget, _stats: LoadStats) {}

    /// Called when a load fails or is cancelled.
    fn on_failure(&self, _target: &LoadTarget, _severity: IngestionSeverity, _error: &LoadError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, target: &LoadTarget, severity: IngestionSeverity, error: &LoadError) {
        self.on_failure(target, severity, error)
    }
}

/// Fans callbacks out to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn LoadObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn LoadObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl LoadObserver for CompositeObserver {
    fn on_success(&self, target: &LoadTarget, stats: LoadStats) {
        for o in &self.observers {
            o.on_success(target, stats);
        }
    }

    fn on_failure(&self, target: &LoadTarget, severity: IngestionSeverity, error: &LoadError) {
        for o in &self.observers {
            o.on_failure(target, severity, error);
        }
    }

    fn on_alert(&self, target: &LoadTarget, severity: IngestionSeverity, error: &LoadError) {
        for o in &self.observers {
            o.on_alert(target, severity, error);
        }
    }
}

fn format_label(target: &LoadTarget) -> &str {
    target.format_tag.as_deref().unwrap_or("?")
}

/// Emits load events through the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl LoadObserver for LogObserver {
    fn on_success(&self, target: &LoadTarget, stats: LoadStats) {
        log::info!(
            "[load][ok] format={} path={} nodes={} warnings={} elapsed_ms={}",
            format_label(target),
            target.path.display(),
            stats.nodes,
            stats.warnings,
            stats.elapsed.as_millis()
        );
    }

    fn on_failure(&self, target: &LoadTarget, severity: IngestionSeverity, error: &LoadError) {
        let level = match severity {
            IngestionSeverity::Info => log::Level::Info,
            IngestionSeverity::Warning => log::Level::Warn,
            IngestionSeverity::Error | IngestionSeverity::Critical => log::Level::Error,
        };
        log::log!(
            level,
            "[load][{:?}] format={} path={} err={}",
            severity,
            format_label(target),
            target.path.display(),
            error
        );
    }

    fn on_alert(&self, target: &LoadTarget, severity: IngestionSeverity, error: &LoadError) {
        log::error!(
            "[ALERT][load][{:?}] format={} path={} err={}",
            severity,
            format_label(target),
            target.path.display(),
            error
        );
    }
}

/// Appends load events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl LoadObserver for FileObserver {
    fn on_success(&self, target: &LoadTarget, stats: LoadStats) {
        self.append_line(&format!(
            "{} ok format={} path={} nodes={} warnings={}",
            unix_ts(),
            format_label(target),
            target.path.display(),
            stats.nodes,
            stats.warnings
        ));
    }

    fn on_failure(&self, target: &LoadTarget, severity: IngestionSeverity, error: &LoadError) {
        self.append_line(&format!(
            "{} fail severity={:?} format={} path={} err={}",
            unix_ts(),
            severity,
            format_label(target),
            target.path.display(),
            error
        ));
    }

    fn on_alert(&self, target: &LoadTarget, severity: IngestionSeverity, error: &LoadError) {
        self.append_line(&format!(
            "{} ALERT severity={:?} format={} path={} err={}",
            unix_ts(),
            severity,
            format_label(target),
            target.path.display(),
            error
        ));
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_follows_error_kind() {
        let io: LoadError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(IngestionSeverity::for_error(&io), IngestionSeverity::Critical);
        assert_eq!(
            IngestionSeverity::for_error(&LoadError::corrupt("npy", "bad magic")),
            IngestionSeverity::Error
        );
        assert_eq!(IngestionSeverity::for_error(&LoadError::Cancelled), IngestionSeverity::Info);
        assert!(IngestionSeverity::Critical > IngestionSeverity::Error);
    }
}
