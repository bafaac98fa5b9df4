//! The load pipeline: `Detecting → Loading → Normalizing → Ready`.
//!
//! [`load_file`] runs it on the calling thread; [`super::Inspector`] runs the same pipeline on
//! its worker pool with deduplication, read throttling and progress streams.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::error::{LoadError, LoadResult};
use crate::ingestion::observability::{IngestionSeverity, LoadObserver, LoadStats, LoadTarget};
use crate::ingestion::plugin::LoadContext;
use crate::ingestion::registry::{FormatRegistry, peek_file};
use crate::model::{FileRecord, LoadStatus};
use crate::normalize::{Limits, Normalizer};
use crate::stats::StatsOptions;

use super::CancellationToken;
use super::metrics::LoadMetrics;
use super::semaphore::Semaphore;

/// Lifecycle of one load. `Ready`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    Detecting,
    Loading,
    Normalizing,
    Ready,
    Failed,
    Cancelled,
}

impl LoadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Detecting => "detecting",
            Self::Loading => "loading",
            Self::Normalizing => "normalizing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Options for one load.
///
/// Use [`Default`] for common cases.
#[derive(Clone)]
pub struct LoadOptions {
    /// Format tag that bypasses detection (`"npy"`, `"csv"`, ...).
    pub format: Option<String>,
    pub limits: Limits,
    /// Used by [`FileRecord::stats`] on the resulting record.
    pub stats: StatsOptions,
    pub cancel: CancellationToken,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn LoadObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: IngestionSeverity,
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("format", &self.format)
            .field("limits", &self.limits)
            .field("stats", &self.stats)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            format: None,
            limits: Limits::default(),
            stats: StatsOptions::default(),
            cancel: CancellationToken::new(),
            observer: None,
            alert_at_or_above: IngestionSeverity::Critical,
        }
    }
}

fn no_stage(_: LoadState, _: f32, _: &str) {}

/// What the pipeline reports to while it runs.
pub(crate) struct PipelineEnv<'a> {
    pub(crate) registry: &'a FormatRegistry,
    pub(crate) on_stage: &'a (dyn Fn(LoadState, f32, &str) + Sync),
    pub(crate) read_throttle: Option<&'a Semaphore>,
    pub(crate) metrics: Option<&'a LoadMetrics>,
}

impl<'a> PipelineEnv<'a> {
    pub(crate) fn new(registry: &'a FormatRegistry) -> Self {
        Self {
            registry,
            on_stage: &no_stage,
            read_throttle: None,
            metrics: None,
        }
    }
}

// Progress bands (percent) per stage.
const LOADING_START: f32 = 5.0;
const NORMALIZING_START: f32 = 70.0;
const NORMALIZING_END: f32 = 99.0;

/// Run the pipeline; `format_tag` is set as soon as a plugin is resolved.
pub(crate) fn execute(
    path: &Path,
    opts: &LoadOptions,
    env: &PipelineEnv<'_>,
    format_tag: &mut Option<String>,
) -> LoadResult<FileRecord> {
    let started = Instant::now();
    let cancel = &opts.cancel;
    (env.on_stage)(LoadState::Detecting, 0.0, "detecting format");
    cancel.check()?;

    let file_size_bytes = fs::metadata(path)?.len();
    let peeked = peek_file(path)?;
    let plugin = env.registry.resolve(path, &peeked, opts.format.as_deref())?;
    *format_tag = Some(plugin.format_tag().to_string());
    log::debug!(
        "{}: format={} loader={}",
        path.display(),
        plugin.format_tag(),
        plugin.loader_name()
    );
    cancel.check()?;

    (env.on_stage)(
        LoadState::Loading,
        LOADING_START,
        &format!("reading {} data", plugin.format_tag()),
    );
    let loaded = {
        let permit = env.read_throttle.map(Semaphore::acquire);
        if let (Some(p), Some(m)) = (&permit, env.metrics) {
            if p.waited() > Duration::ZERO {
                m.on_throttle_wait(p.waited());
            }
        }
        if let Some(m) = env.metrics {
            m.on_read_start();
        }
        let report = |fraction: f32| {
            let pct = LOADING_START + fraction * (NORMALIZING_START - LOADING_START);
            (env.on_stage)(LoadState::Loading, pct, "reading");
        };
        let ctx = LoadContext::new(path, cancel)
            .with_max_rows(opts.limits.max_rows)
            .with_progress(&report);
        let out = plugin.load(&ctx);
        if let Some(m) = env.metrics {
            m.on_read_end();
        }
        out?
    };
    cancel.check()?;

    (env.on_stage)(LoadState::Normalizing, NORMALIZING_START, "building tree");
    let report = |fraction: f32| {
        let pct = NORMALIZING_START + fraction * (NORMALIZING_END - NORMALIZING_START);
        (env.on_stage)(LoadState::Normalizing, pct, "building tree");
    };
    let normalized = Normalizer::new(&opts.limits, &loaded.graph, cancel)
        .with_progress(&report)
        .normalize(&loaded.value)?;
    cancel.check()?;

    let status = if loaded.warnings.is_empty() {
        LoadStatus::Complete
    } else {
        LoadStatus::Partial
    };
    for w in &loaded.warnings {
        log::warn!("{}: {w}", path.display());
    }
    let mut warnings = loaded.warnings;
    warnings.extend(normalized.warnings);

    let record = FileRecord {
        path: path.to_path_buf(),
        format_tag: plugin.format_tag().to_string(),
        loader_used: plugin.loader_name().to_string(),
        root: normalized.root,
        warnings,
        load_duration_ms: started.elapsed().as_millis() as u64,
        file_size_bytes,
        status,
        attributes: loaded.attributes,
        stats_options: opts.stats.clone(),
    };
    log::info!(
        "{}: loaded as {} ({} nodes, {} warnings) in {} ms",
        path.display(),
        record.format_tag,
        normalized.node_count,
        record.warnings.len(),
        record.load_duration_ms
    );
    Ok(record)
}

/// Report a finished load to `opts.observer`, alerting at or above the configured severity.
pub(crate) fn notify_observer(
    opts: &LoadOptions,
    path: &Path,
    format_tag: Option<String>,
    result: Result<&FileRecord, &LoadError>,
    elapsed: Duration,
) {
    let Some(obs) = opts.observer.as_ref() else {
        return;
    };
    let target = LoadTarget {
        path: path.to_path_buf(),
        format_tag,
    };
    match result {
        Ok(record) => obs.on_success(
            &target,
            LoadStats {
                nodes: record.node_count(),
                warnings: record.warnings.len(),
                elapsed,
            },
        ),
        Err(e) => {
            let sev = IngestionSeverity::for_error(e);
            obs.on_failure(&target, sev, e);
            if sev >= opts.alert_at_or_above {
                obs.on_alert(&target, sev, e);
            }
        }
    }
}

fn default_registry() -> &'static FormatRegistry {
    static REGISTRY: OnceLock<FormatRegistry> = OnceLock::new();
    REGISTRY.get_or_init(FormatRegistry::with_builtin_plugins)
}

/// Load `path` on the calling thread with the built-in plugins.
///
/// # Example
///
/// ```no_run
/// use data_inspector::execution::{LoadOptions, load_file};
///
/// # fn main() -> Result<(), data_inspector::LoadError> {
/// let record = load_file("weights.npy", &LoadOptions::default())?;
/// println!("{} nodes, root kind {}", record.node_count(), record.root.kind);
/// # Ok(())
/// # }
/// ```
pub fn load_file(path: impl AsRef<Path>, opts: &LoadOptions) -> LoadResult<FileRecord> {
    load_file_with(default_registry(), path, opts)
}

/// Like [`load_file`], with an explicit registry.
pub fn load_file_with(
    registry: &FormatRegistry,
    path: impl AsRef<Path>,
    opts: &LoadOptions,
) -> LoadResult<FileRecord> {
    let path = path.as_ref();
    let started = Instant::now();
    let mut format_tag = None;
    let result = execute(path, opts, &PipelineEnv::new(registry), &mut format_tag);
    notify_observer(opts, path, format_tag, result.as_ref(), started.elapsed());
    result
}
