use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Convenience result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Error type returned by loading, format resolution and normalization.
///
/// This is a single error enum shared by every loader plugin. It is `Clone` so that every
/// [`crate::execution::LoadHandle`] attached to a deduplicated load can observe the same failure.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// No loader plugin matches the file (by override, extension or content signature).
    #[error("format unsupported for '{}': {reason}", .path.display())]
    FormatUnsupported { path: PathBuf, reason: String },

    /// The bytes do not parse as the resolved format.
    #[error("corrupt {format} data: {message}")]
    CorruptData {
        format: String,
        message: String,
        #[source]
        source: Option<Arc<dyn StdError + Send + Sync + 'static>>,
    },

    /// The caller cancelled the load.
    #[error("load cancelled")]
    Cancelled,
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl LoadError {
    /// A parse failure without an underlying error value.
    pub fn corrupt(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptData {
            format: format.into(),
            message: message.into(),
            source: None,
        }
    }

    /// A parse failure caused by `err` (kept as the error source).
    pub fn corrupt_with<E>(format: impl Into<String>, message: impl Into<String>, err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::CorruptData {
            format: format.into(),
            message: message.into(),
            source: Some(Arc::new(err)),
        }
    }

    /// Classify this error within the [`ErrorKind`] taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::IoError,
            Self::FormatUnsupported { .. } => ErrorKind::FormatUnsupported,
            Self::CorruptData { .. } => ErrorKind::CorruptData,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Error returned by the statistics engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    /// The node has no numeric meaning (mapping, text column, unsupported node, ...).
    #[error("statistics unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StatsError {
    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::StatsUnavailable
    }
}

/// Error returned when reading an [`crate::config::InspectorConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// The complete outcome taxonomy.
///
/// Only some kinds are errors: [`ErrorKind::PartialLoad`] is a qualified success recorded on the
/// [`crate::model::FileRecord`], and [`ErrorKind::DepthOrSizeLimitExceeded`] is recorded as node
/// metadata plus a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FormatUnsupported,
    CorruptData,
    PartialLoad,
    IoError,
    DepthOrSizeLimitExceeded,
    StatsUnavailable,
    Cancelled,
}

/// Returns true if an I/O error appears anywhere in `e`'s source chain.
pub(crate) fn error_chain_contains_io(e: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(err) = cur {
        if err.is::<std::io::Error>() {
            return true;
        }
        cur = err.source();
    }
    false
}

/// Like [`error_chain_contains_io`], but looks through the shared source of a [`LoadError`].
pub(crate) fn load_error_involves_io(e: &LoadError) -> bool {
    match e {
        LoadError::Io(_) => true,
        LoadError::CorruptData {
            source: Some(src), ..
        } => error_chain_contains_io(&**src),
        _ => false,
    }
}
