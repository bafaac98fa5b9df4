//! The format-independent tree handed to consumers.
//!
//! A load produces one [`FileRecord`] whose `root` is a [`DataNode`]. Nodes never perform I/O:
//! everything a consumer can ask for (children, metadata, the retained sample) is already in
//! memory. Statistics are the only lazily computed part and are memoized per node.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use crate::error::StatsError;
use crate::stats::{StatisticsEngine, StatsOptions, StatsResult};
use crate::types::{ElementType, Value};

/// Identity of a node within its tree (pre-order index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structural category of a [`DataNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    Scalar,
    Array,
    Table,
    Mapping,
    Sequence,
    Mesh,
    Binary,
    Unsupported,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scalar => "scalar",
            Self::Array => "array",
            Self::Table => "table",
            Self::Mapping => "mapping",
            Self::Sequence => "sequence",
            Self::Mesh => "mesh",
            Self::Binary => "binary",
            Self::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// Extent of a value before truncation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginalExtent {
    pub shape: Vec<usize>,
    pub elements: u64,
}

/// Descriptive metadata attached to every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeMetadata {
    /// Shape of the retained data (empty for scalars).
    pub shape: Vec<usize>,
    pub element_type: Option<ElementType>,
    /// Estimated size of the original value in bytes.
    pub byte_size: u64,
    pub truncated: bool,
    /// Always present when `truncated` is set.
    pub original_extent: Option<OriginalExtent>,
    /// Why a node is [`NodeKind::Unsupported`].
    pub reason: Option<String>,
    pub vertex_count: Option<usize>,
    pub face_count: Option<usize>,
    /// Free-form attributes (object type, image color type, FITS cards, ...).
    pub attributes: BTreeMap<String, String>,
}

/// Payload retained for a leaf whose value is not stored inline.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Sample {
    #[default]
    Empty,
    /// Numeric values in row-major order; nulls are NaN.
    Numeric(Vec<f64>),
    Bool(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
    Bytes(Vec<u8>),
}

impl Sample {
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Numeric(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Text(v) => v.len(),
            Self::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            Self::Numeric(v) => Some(v),
            _ => None,
        }
    }
}

/// Where a node's data came from, plus the sample kept in memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    /// Slash-separated path of keys from the root (`/weights/[0]`).
    pub locator: String,
    #[serde(skip)]
    pub sample: Sample,
}

/// One node of the inspection tree.
#[derive(Debug, Serialize)]
pub struct DataNode {
    pub id: NodeId,
    pub key: String,
    pub kind: NodeKind,
    /// Inline value for scalars and small binary leaves.
    pub value: Option<Value>,
    pub source: Option<SourceRef>,
    pub metadata: NodeMetadata,
    pub children: Vec<DataNode>,
    #[serde(skip)]
    pub(crate) stats: OnceLock<Result<Arc<StatsResult>, StatsError>>,
}

impl DataNode {
    pub fn new(id: NodeId, key: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id,
            key: key.into(),
            kind,
            value: None,
            source: None,
            metadata: NodeMetadata::default(),
            children: Vec::new(),
            stats: OnceLock::new(),
        }
    }

    pub fn children(&self) -> &[DataNode] {
        &self.children
    }

    pub fn child(&self, key: &str) -> Option<&DataNode> {
        self.children.iter().find(|c| c.key == key)
    }

    /// Resolve a slash-separated key path relative to this node.
    ///
    /// Empty segments are ignored, so `"/a/b"`, `"a/b"` and `"a//b"` are equivalent.
    pub fn find(&self, path: &str) -> Option<&DataNode> {
        path.split('/')
            .filter(|seg| !seg.is_empty())
            .try_fold(self, |node, seg| node.child(seg))
    }

    /// The retained sample (empty for container nodes).
    pub fn sample(&self) -> &Sample {
        const EMPTY: &Sample = &Sample::Empty;
        self.source.as_ref().map(|s| &s.sample).unwrap_or(EMPTY)
    }

    pub fn is_truncated(&self) -> bool {
        self.metadata.truncated
    }

    /// Pre-order traversal of this node and all descendants.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// Cached statistics, if they have been computed.
    pub fn cached_stats(&self) -> Option<&Result<Arc<StatsResult>, StatsError>> {
        self.stats.get()
    }
}

/// Iterator returned by [`DataNode::walk`].
pub struct Walk<'a> {
    stack: Vec<&'a DataNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a DataNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Whether the plugin produced the complete value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadStatus {
    Complete,
    /// Best-effort result; see [`FileRecord::warnings`].
    Partial,
}

/// The immutable result of a successful load.
#[derive(Debug, Serialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub format_tag: String,
    pub loader_used: String,
    pub root: DataNode,
    pub warnings: Vec<String>,
    pub load_duration_ms: u64,
    pub file_size_bytes: u64,
    pub status: LoadStatus,
    /// Attributes reported by the loader plugin.
    pub attributes: BTreeMap<String, String>,
    #[serde(skip)]
    pub(crate) stats_options: StatsOptions,
}

impl FileRecord {
    /// Statistics for `node` using the options the record was loaded with.
    pub fn stats(&self, node: &DataNode) -> Result<Arc<StatsResult>, StatsError> {
        StatisticsEngine::new(self.stats_options.clone()).stats(node)
    }

    /// Total number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.root.walk().count()
    }
}
