//! Conversion of plugin output ([`NativeValue`]) into [`DataNode`] trees.
//!
//! The normalizer is the only place where size limits, depth limits and cycle detection are
//! enforced, so every plugin gets the same guarantees: the resulting tree is finite, sibling keys
//! are unique and oversized values keep a bounded prefix.

pub mod sampler;

use std::collections::{HashMap, HashSet};

use crate::error::LoadResult;
use crate::execution::CancellationToken;
use crate::model::{DataNode, NodeId, NodeKind, OriginalExtent, Sample, SourceRef};
use crate::types::{
    DataSet, DataType, ElementType, Mesh, NativeValue, NumericArray, ObjectGraph, ObjectId, Value,
};

pub use sampler::Limits;

use sampler::{array_prefix_view, element_count, truncate_str};

/// Samples are copied in blocks of this many elements between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Object types whose state is shown in place of the object itself.
const TRANSPARENT_TYPES: &[&str] = &[
    "builtins.dict",
    "builtins.list",
    "builtins.tuple",
    "builtins.set",
    "builtins.frozenset",
    "collections.OrderedDict",
    "numpy.ndarray",
];

/// A finished tree plus the warnings raised while building it.
#[derive(Debug)]
pub struct Normalized {
    pub root: DataNode,
    pub warnings: Vec<String>,
    pub node_count: u64,
}

/// Walks a [`NativeValue`] into a [`DataNode`] tree.
pub struct Normalizer<'a> {
    limits: &'a Limits,
    graph: &'a ObjectGraph,
    cancel: &'a CancellationToken,
    progress: Option<&'a dyn Fn(f32)>,
    next_id: u64,
    on_path: HashSet<ObjectId>,
    warnings: Vec<String>,
}

impl<'a> Normalizer<'a> {
    pub fn new(limits: &'a Limits, graph: &'a ObjectGraph, cancel: &'a CancellationToken) -> Self {
        Self {
            limits,
            graph,
            cancel,
            progress: None,
            next_id: 0,
            on_path: HashSet::new(),
            warnings: Vec::new(),
        }
    }

    /// Report progress (0.0..=1.0) after each top-level child.
    pub fn with_progress(mut self, progress: &'a dyn Fn(f32)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn normalize(mut self, value: &NativeValue) -> LoadResult<Normalized> {
        let root = self.node("", value, "/", 0)?;
        if let Some(progress) = self.progress {
            progress(1.0);
        }
        Ok(Normalized {
            root,
            warnings: self.warnings,
            node_count: self.next_id,
        })
    }

    fn alloc(&mut self, key: &str, kind: NodeKind, locator: &str) -> DataNode {
        let mut node = DataNode::new(NodeId(self.next_id), key, kind);
        self.next_id += 1;
        node.source = Some(SourceRef {
            locator: locator.to_string(),
            sample: Sample::Empty,
        });
        node
    }

    fn warn(&mut self, message: String) {
        log::debug!("{message}");
        self.warnings.push(message);
    }

    fn unsupported(&mut self, key: &str, locator: &str, reason: impl Into<String>) -> DataNode {
        let mut node = self.alloc(key, NodeKind::Unsupported, locator);
        node.metadata.reason = Some(reason.into());
        node
    }

    fn node(
        &mut self,
        key: &str,
        value: &NativeValue,
        locator: &str,
        depth: usize,
    ) -> LoadResult<DataNode> {
        self.cancel.check()?;

        if depth > self.limits.max_depth {
            self.warn(format!("{locator}: depth limit {} exceeded", self.limits.max_depth));
            return Ok(self.unsupported(key, locator, "depth limit exceeded"));
        }

        match value {
            NativeValue::Null => Ok(self.scalar(key, locator, Value::Null, 0)),
            NativeValue::Bool(b) => Ok(self.scalar(key, locator, Value::Bool(*b), 1)),
            NativeValue::Int(i) => Ok(self.scalar(key, locator, Value::Int64(*i), 8)),
            NativeValue::Float(f) => Ok(self.scalar(key, locator, Value::Float64(*f), 8)),
            NativeValue::Str(s) => Ok(self.string(key, locator, s)),
            NativeValue::Bytes(b) => Ok(self.binary(key, locator, b)),
            NativeValue::Array(arr) => self.array(key, locator, arr),
            NativeValue::Table(ds) => self.table(key, locator, ds),
            NativeValue::Map(entries) => {
                let mut node = self.alloc(key, NodeKind::Mapping, locator);
                self.map_children(&mut node, entries, locator, depth)?;
                Ok(node)
            }
            NativeValue::List(items) => match numeric_vector(items) {
                Some(arr) => self.array(key, locator, &arr),
                None => self.sequence(key, locator, items, depth),
            },
            NativeValue::Mesh(mesh) => self.mesh(key, locator, mesh),
            NativeValue::Object(id) => self.object(key, locator, *id, depth),
            NativeValue::Opaque { type_name, reason } => {
                log::warn!("{locator}: unsupported {type_name}: {reason}");
                let mut node = self.unsupported(key, locator, reason.clone());
                node.metadata.attributes.insert("type".to_string(), type_name.clone());
                Ok(node)
            }
        }
    }

    fn scalar(&mut self, key: &str, locator: &str, value: Value, byte_size: u64) -> DataNode {
        let mut node = self.alloc(key, NodeKind::Scalar, locator);
        node.metadata.element_type = Some(value.element_type());
        node.metadata.byte_size = byte_size;
        node.value = Some(value);
        node
    }

    fn string(&mut self, key: &str, locator: &str, s: &str) -> DataNode {
        let (kept, cut) = truncate_str(s, self.limits.max_string_bytes);
        let mut node = self.scalar(key, locator, Value::Utf8(kept.to_string()), s.len() as u64);
        if cut {
            self.mark_truncated(&mut node, vec![s.len()], s.len() as u64, "string bytes", locator);
        }
        node
    }

    fn binary(&mut self, key: &str, locator: &str, bytes: &[u8]) -> DataNode {
        let mut node = self.alloc(key, NodeKind::Binary, locator);
        node.metadata.element_type = Some(ElementType::Bytes);
        node.metadata.byte_size = bytes.len() as u64;
        let (kept, cut) = Limits::prefix(bytes.len(), self.limits.max_binary_bytes);
        node.metadata.shape = vec![kept];
        if cut {
            set_sample(&mut node, Sample::Bytes(bytes[..kept].to_vec()));
            self.mark_truncated(&mut node, vec![bytes.len()], bytes.len() as u64, "bytes", locator);
        } else {
            node.value = Some(Value::Bytes(bytes.to_vec()));
        }
        node
    }

    fn mark_truncated(
        &mut self,
        node: &mut DataNode,
        shape: Vec<usize>,
        elements: u64,
        unit: &str,
        locator: &str,
    ) {
        let kept = match node.kind {
            NodeKind::Scalar => match &node.value {
                Some(Value::Utf8(s)) => s.len(),
                _ => 1,
            },
            _ => element_count(&node.metadata.shape),
        };
        self.warn(format!("{locator}: truncated to {kept} of {elements} {unit}"));
        node.metadata.truncated = true;
        node.metadata.original_extent = Some(OriginalExtent { shape, elements });
    }

    fn copy_checked<T>(
        &self,
        iter: impl Iterator<Item = T>,
        capacity: usize,
    ) -> LoadResult<Vec<T>> {
        let mut out = Vec::with_capacity(capacity);
        for v in iter {
            out.push(v);
            if out.len() % CANCEL_CHECK_INTERVAL == 0 {
                self.cancel.check()?;
            }
        }
        Ok(out)
    }

    fn array(&mut self, key: &str, locator: &str, arr: &NumericArray) -> LoadResult<DataNode> {
        let mut node = self.alloc(key, NodeKind::Array, locator);
        let shape = arr.shape().to_vec();
        let total = element_count(&shape);
        node.metadata.element_type = Some(arr.element_type);
        node.metadata.byte_size =
            (total as u64).saturating_mul(arr.element_type.byte_width() as u64);

        match self.limits.array_prefix(&shape) {
            Some(kept) => {
                let view = array_prefix_view(&arr.data, &kept);
                let values = self.copy_checked(view.iter().copied(), view.len())?;
                node.metadata.shape = kept;
                set_sample(&mut node, Sample::Numeric(values));
                self.mark_truncated(&mut node, shape, total as u64, "elements", locator);
            }
            None => {
                let values = self.copy_checked(arr.data.iter().copied(), total)?;
                node.metadata.shape = shape;
                set_sample(&mut node, Sample::Numeric(values));
            }
        }
        Ok(node)
    }

    fn table(&mut self, key: &str, locator: &str, ds: &DataSet) -> LoadResult<DataNode> {
        let mut node = self.alloc(key, NodeKind::Table, locator);
        let rows = ds.source_row_count();
        let cols = ds.column_count();
        let (kept_rows, rows_cut) = Limits::prefix(rows, self.limits.max_rows.min(ds.row_count()));
        let (kept_cols, cols_cut) = Limits::prefix(cols, self.limits.max_columns);
        node.metadata.shape = vec![kept_rows, kept_cols];
        node.metadata.byte_size = ds
            .schema
            .fields
            .iter()
            .map(|f| (rows as u64).saturating_mul(f.data_type.element_type().byte_width() as u64))
            .sum();
        if rows_cut || cols_cut {
            let elements = (rows as u64).saturating_mul(cols as u64);
            self.mark_truncated(&mut node, vec![rows, cols], elements, "cells", locator);
        }

        let mut keys = KeyDeduper::default();
        for (idx, field) in ds.schema.fields.iter().take(kept_cols).enumerate() {
            let col_key = keys.unique(&field.name, locator, &mut self.warnings);
            let col_locator = child_locator(locator, &col_key);
            let mut col = self.alloc(&col_key, NodeKind::Array, &col_locator);
            col.metadata.element_type = Some(field.data_type.element_type());
            col.metadata.shape = vec![kept_rows];
            let width = field.data_type.element_type().byte_width() as u64;
            col.metadata.byte_size = (rows as u64).saturating_mul(width);
            if rows_cut {
                col.metadata.truncated = true;
                col.metadata.original_extent = Some(OriginalExtent {
                    shape: vec![rows],
                    elements: rows as u64,
                });
            }
            let cells = ds.column_prefix(idx, kept_rows);
            let sample = match field.data_type {
                DataType::Int64 | DataType::Float64 => Sample::Numeric(self.copy_checked(
                    cells.map(|v| v.as_f64().unwrap_or(f64::NAN)),
                    kept_rows,
                )?),
                DataType::Bool => Sample::Bool(self.copy_checked(
                    cells.map(|v| match v {
                        Value::Bool(b) => Some(*b),
                        _ => None,
                    }),
                    kept_rows,
                )?),
                DataType::Utf8 | DataType::Binary => {
                    let max = self.limits.max_string_bytes;
                    Sample::Text(self.copy_checked(cells.map(|v| cell_text(v, max)), kept_rows)?)
                }
            };
            set_sample(&mut col, sample);
            node.children.push(col);
        }
        Ok(node)
    }

    fn map_children(
        &mut self,
        node: &mut DataNode,
        entries: &[(String, NativeValue)],
        locator: &str,
        depth: usize,
    ) -> LoadResult<()> {
        let (kept, cut) = Limits::prefix(entries.len(), self.limits.max_children);
        node.metadata.shape = vec![kept];
        if cut {
            let total = entries.len();
            self.mark_truncated(node, vec![total], total as u64, "children", locator);
        }
        let mut keys = KeyDeduper::default();
        for (i, (k, v)) in entries.iter().take(kept).enumerate() {
            let key = keys.unique(k, locator, &mut self.warnings);
            let child_loc = child_locator(locator, &key);
            let child = self.node(&key, v, &child_loc, depth + 1)?;
            node.children.push(child);
            if depth == 0 {
                self.report(i + 1, kept);
            }
        }
        Ok(())
    }

    fn sequence(
        &mut self,
        key: &str,
        locator: &str,
        items: &[NativeValue],
        depth: usize,
    ) -> LoadResult<DataNode> {
        let mut node = self.alloc(key, NodeKind::Sequence, locator);
        let (kept, cut) = Limits::prefix(items.len(), self.limits.max_children);
        node.metadata.shape = vec![kept];
        if cut {
            self.mark_truncated(&mut node, vec![items.len()], items.len() as u64, "items", locator);
        }
        for (i, item) in items.iter().take(kept).enumerate() {
            let child_key = format!("[{i}]");
            let child_loc = child_locator(locator, &child_key);
            let child = self.node(&child_key, item, &child_loc, depth + 1)?;
            node.children.push(child);
            if depth == 0 {
                self.report(i + 1, kept);
            }
        }
        Ok(node)
    }

    fn mesh(&mut self, key: &str, locator: &str, mesh: &Mesh) -> LoadResult<DataNode> {
        let mut node = self.alloc(key, NodeKind::Mesh, locator);
        node.metadata.vertex_count = Some(mesh.vertex_count());
        node.metadata.face_count = Some(mesh.face_count());
        node.metadata.shape = vec![mesh.vertex_count()];

        let parts = [
            ("vertices", Some(&mesh.vertices)),
            ("faces", mesh.faces.as_ref()),
            ("normals", mesh.normals.as_ref()),
            ("colors", mesh.colors.as_ref()),
        ];
        for (name, part) in parts {
            if let Some(arr) = part {
                let child = self.array(name, &child_locator(locator, name), arr)?;
                node.metadata.byte_size += child.metadata.byte_size;
                node.children.push(child);
            }
        }
        Ok(node)
    }

    fn object(
        &mut self,
        key: &str,
        locator: &str,
        id: ObjectId,
        depth: usize,
    ) -> LoadResult<DataNode> {
        if self.on_path.contains(&id) {
            self.warn(format!("{locator}: cyclic reference"));
            return Ok(self.unsupported(key, locator, "cyclic reference"));
        }
        let graph = self.graph;
        let Some(obj) = graph.get(id) else {
            return Ok(self.unsupported(key, locator, "dangling object reference"));
        };

        self.on_path.insert(id);
        let out = if TRANSPARENT_TYPES.contains(&obj.type_name.as_str()) {
            self.node(key, &obj.state, locator, depth)
        } else if matches!(obj.state, NativeValue::Null) {
            Ok(self.unsupported(key, locator, format!("opaque object {}", obj.type_name)))
        } else {
            let mut node = self.alloc(key, NodeKind::Mapping, locator);
            node.metadata.attributes.insert("type".to_string(), obj.type_name.clone());
            let res = match &obj.state {
                NativeValue::Map(entries) => self.map_children(&mut node, entries, locator, depth),
                other => {
                    let child_loc = child_locator(locator, "state");
                    self.node("state", other, &child_loc, depth + 1).map(|child| {
                        node.metadata.shape = vec![1];
                        node.children.push(child);
                    })
                }
            };
            res.map(|()| node)
        };
        self.on_path.remove(&id);
        out
    }

    fn report(&self, done: usize, total: usize) {
        if let Some(progress) = self.progress {
            if total > 0 {
                progress(done as f32 / total as f32);
            }
        }
    }
}

fn set_sample(node: &mut DataNode, sample: Sample) {
    if let Some(src) = node.source.as_mut() {
        src.sample = sample;
    }
}

fn child_locator(parent: &str, key: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{key}")
    } else {
        format!("{parent}/{key}")
    }
}

fn cell_text(v: &Value, max_bytes: usize) -> Option<String> {
    match v {
        Value::Null => None,
        Value::Utf8(s) => Some(truncate_str(s, max_bytes).0.to_string()),
        Value::Int64(i) => Some(i.to_string()),
        Value::Float64(f) => Some(f.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Bytes(b) => Some(format!("<{} bytes>", b.len())),
    }
}

/// A non-empty list of plain numbers as a 1-d array.
fn numeric_vector(items: &[NativeValue]) -> Option<NumericArray> {
    if items.is_empty() {
        return None;
    }
    let mut all_int = true;
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        match item {
            NativeValue::Int(i) => values.push(*i as f64),
            NativeValue::Float(f) => {
                all_int = false;
                values.push(*f);
            }
            _ => return None,
        }
    }
    let element_type = if all_int { ElementType::Int64 } else { ElementType::Float64 };
    let len = values.len();
    NumericArray::from_shape_vec(element_type, &[len], values)
}

/// Makes sibling keys unique by appending `#n` to repeats.
#[derive(Default)]
struct KeyDeduper {
    seen: HashMap<String, usize>,
}

impl KeyDeduper {
    fn unique(&mut self, key: &str, locator: &str, warnings: &mut Vec<String>) -> String {
        if !self.seen.contains_key(key) {
            self.seen.insert(key.to_string(), 0);
            return key.to_string();
        }
        let mut n = self.seen.get(key).copied().unwrap_or(0);
        let renamed = loop {
            n += 1;
            let candidate = format!("{key}#{n}");
            if !self.seen.contains_key(&candidate) {
                break candidate;
            }
        };
        self.seen.insert(key.to_string(), n);
        self.seen.insert(renamed.clone(), 0);
        warnings.push(format!("{locator}: duplicate key '{key}' renamed to '{renamed}'"));
        renamed
    }
}
