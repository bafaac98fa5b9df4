use std::collections::BTreeMap;
use std::path::Path;

use crate::error::LoadResult;
use crate::execution::CancellationToken;
use crate::types::{NativeValue, ObjectGraph};

/// Reads one family of file formats into a [`NativeValue`].
///
/// Plugins are stateless and shared across load workers. Every plugin declares the extensions it
/// owns; plugins whose files carry a recognizable signature also implement [`Self::sniff`] so a
/// renamed file can still be resolved from its content.
pub trait LoaderPlugin: Send + Sync {
    /// Stable format identifier (`"npy"`, `"csv"`, ...).
    fn format_tag(&self) -> &'static str;

    /// Human-readable description for format listings.
    fn description(&self) -> &'static str;

    /// Lowercase extensions without the leading dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Short name of the implementation, recorded as `loader_used`.
    fn loader_name(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// Whether [`Self::sniff`] implements a content signature for this format.
    fn has_signature(&self) -> bool {
        false
    }

    /// Signature probe over the first bytes of a file.
    fn sniff(&self, _peeked: &[u8]) -> bool {
        false
    }

    /// Whether this plugin accepts a file with `extension` whose first bytes are `peeked`.
    ///
    /// The extension must be one of [`Self::extensions`]. Plugins with a signature also require
    /// non-empty `peeked` bytes to match it, so a mislabeled file can be resolved by content.
    fn can_handle(&self, peeked: &[u8], extension: Option<&str>) -> bool {
        let ext_ok = extension
            .is_some_and(|ext| self.extensions().iter().any(|e| e.eq_ignore_ascii_case(ext)));
        ext_ok && (peeked.is_empty() || !self.has_signature() || self.sniff(peeked))
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded>;
}

fn no_progress(_: f32) {}

/// Inputs to [`LoaderPlugin::load`].
pub struct LoadContext<'a> {
    pub path: &'a Path,
    pub cancel: &'a CancellationToken,
    /// Row-oriented loaders stop reading after this many rows.
    pub max_rows: usize,
    progress: &'a dyn Fn(f32),
}

impl<'a> LoadContext<'a> {
    pub fn new(path: &'a Path, cancel: &'a CancellationToken) -> Self {
        Self {
            path,
            cancel,
            max_rows: usize::MAX,
            progress: &no_progress,
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Route plugin progress (0.0..=1.0) to `progress`.
    pub fn with_progress(mut self, progress: &'a dyn Fn(f32)) -> Self {
        self.progress = progress;
        self
    }

    pub fn check_cancelled(&self) -> LoadResult<()> {
        self.cancel.check()
    }

    pub fn report(&self, fraction: f32) {
        (self.progress)(fraction.clamp(0.0, 1.0));
    }
}

/// A plugin's result: the value, any object graph it references, and diagnostics.
#[derive(Debug, Default)]
pub struct Loaded {
    pub value: NativeValue,
    pub graph: ObjectGraph,
    /// Format-level attributes (`dtype`, `sheets`, `keys_count`, ...).
    pub attributes: BTreeMap<String, String>,
    /// Non-empty for a partial load.
    pub warnings: Vec<String>,
}

impl Loaded {
    pub fn new(value: NativeValue) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn with_graph(mut self, graph: ObjectGraph) -> Self {
        self.graph = graph;
        self
    }

    pub fn attr(mut self, key: &str, value: impl ToString) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Name of the first local file entry of a zip archive, read from its header.
///
/// Used to tell zip-based formats apart without opening the archive.
pub(crate) fn zip_first_entry_name(peeked: &[u8]) -> Option<&str> {
    if peeked.len() < 30 || &peeked[..4] != b"PK\x03\x04" {
        return None;
    }
    let name_len = u16::from_le_bytes([peeked[26], peeked[27]]) as usize;
    let name = peeked.get(30..30 + name_len)?;
    std::str::from_utf8(name).ok()
}

/// Lowercase extension of `path`, if any.
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_entry_name_is_read_from_local_header() {
        let mut header = b"PK\x03\x04".to_vec();
        header.extend_from_slice(&[0u8; 22]);
        header.extend_from_slice(&(9u16).to_le_bytes());
        header.extend_from_slice(&[0u8; 2]);
        header.extend_from_slice(b"arr_0.npy");
        assert_eq!(zip_first_entry_name(&header), Some("arr_0.npy"));
        assert_eq!(zip_first_entry_name(b"not a zip"), None);
    }
}
