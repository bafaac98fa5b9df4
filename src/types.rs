//! Core value types produced by loader plugins.
//!
//! Every plugin converts file bytes into a [`NativeValue`]. Tabular formats produce a
//! [`DataSet`] (a [`Schema`] of typed [`Field`]s plus row-major [`Value`] cells), array formats
//! produce a [`NumericArray`], and object-graph formats (pickle, torch) produce
//! [`NativeValue::Object`] references into an [`ObjectGraph`].

use ndarray::ArrayD;
use serde::Serialize;

/// Logical data type for a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
    /// Raw bytes.
    Binary,
}

impl DataType {
    /// The narrowest type able to hold values of both `self` and `other`.
    ///
    /// Integers widen to floats; any other disagreement widens to [`DataType::Utf8`].
    pub fn widen(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Int64, Self::Float64) | (Self::Float64, Self::Int64) => Self::Float64,
            _ => Self::Utf8,
        }
    }

    pub fn element_type(self) -> ElementType {
        match self {
            Self::Int64 => ElementType::Int64,
            Self::Float64 => ElementType::Float64,
            Self::Bool => ElementType::Bool,
            Self::Utf8 => ElementType::Utf8,
            Self::Binary => ElementType::Bytes,
        }
    }
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields describing the columns of a [`DataSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A single typed scalar: a table cell or the value of a scalar node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Numeric view of the value (`None` for non-numeric values and nulls).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Null => ElementType::Null,
            Self::Int64(_) => ElementType::Int64,
            Self::Float64(_) => ElementType::Float64,
            Self::Bool(_) => ElementType::Bool,
            Self::Utf8(_) => ElementType::Utf8,
            Self::Bytes(_) => ElementType::Bytes,
        }
    }
}

/// In-memory tabular dataset.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
    /// Rows in the source when only a prefix was read into `rows`.
    pub total_rows: Option<usize>,
}

impl DataSet {
    /// Create a dataset from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self {
            schema,
            rows,
            total_rows: None,
        }
    }

    /// Record that `rows` is a prefix of a source with `total` rows.
    pub fn with_total_rows(mut self, total: usize) -> Self {
        self.total_rows = Some(total.max(self.rows.len()));
        self
    }

    /// Number of rows held in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of rows in the source, including any that were not read.
    pub fn source_row_count(&self) -> usize {
        self.total_rows.unwrap_or(self.rows.len())
    }

    /// Number of columns in the dataset.
    pub fn column_count(&self) -> usize {
        self.schema.fields.len()
    }

    /// Iterate the cells of column `idx` over the first `limit` rows.
    ///
    /// Rows shorter than the schema yield [`Value::Null`].
    pub fn column_prefix(&self, idx: usize, limit: usize) -> impl Iterator<Item = &Value> {
        const NULL: &Value = &Value::Null;
        self.rows
            .iter()
            .take(limit)
            .map(move |row| row.get(idx).unwrap_or(NULL))
    }
}

/// Element type tag recorded on array-like nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    BFloat16,
    Float32,
    Float64,
    Utf8,
    Bytes,
    Null,
    /// Values of more than one type.
    Mixed,
}

impl ElementType {
    /// Short lowercase tag (`float32`, `uint8`, `utf8`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float16 => "float16",
            Self::BFloat16 => "bfloat16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Utf8 => "utf8",
            Self::Bytes => "bytes",
            Self::Null => "null",
            Self::Mixed => "mixed",
        }
    }

    /// Returns true for integer and floating point types.
    pub fn is_numeric(self) -> bool {
        !matches!(
            self,
            Self::Bool | Self::Utf8 | Self::Bytes | Self::Null | Self::Mixed
        )
    }

    /// Size of one element in the source representation, used for byte estimates.
    pub fn byte_width(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
            Self::Utf8 | Self::Bytes | Self::Mixed => 16,
            Self::Null => 0,
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Homogeneous numeric n-d array.
///
/// Values are widened to `f64`; `element_type` keeps the source type.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    pub element_type: ElementType,
    pub data: ArrayD<f64>,
}

impl NumericArray {
    pub fn new(element_type: ElementType, data: ArrayD<f64>) -> Self {
        Self { element_type, data }
    }

    /// Build a row-major array from a flat buffer.
    ///
    /// Returns `None` if `values.len()` does not match the shape.
    pub fn from_shape_vec(
        element_type: ElementType,
        shape: &[usize],
        values: Vec<f64>,
    ) -> Option<Self> {
        ArrayD::from_shape_vec(shape.to_vec(), values)
            .ok()
            .map(|data| Self::new(element_type, data))
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Element count of `shape`, or `None` when it does not fit in `usize`.
///
/// Shapes read from file headers go through this before any buffer arithmetic.
pub fn checked_element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Byte length of `shape` elements of `element_type`, or `None` on overflow.
pub fn checked_byte_len(shape: &[usize], element_type: ElementType) -> Option<usize> {
    checked_element_count(shape)?.checked_mul(element_type.byte_width())
}

/// A point set or polygon mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// `[n, 3]` vertex positions.
    pub vertices: NumericArray,
    /// `[m, k]` vertex indices per face (`k` = 3 after triangulation).
    pub faces: Option<NumericArray>,
    /// `[n, 3]` per-vertex normals.
    pub normals: Option<NumericArray>,
    /// `[n, c]` per-vertex colors.
    pub colors: Option<NumericArray>,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.shape().first().copied().unwrap_or(0)
    }

    pub fn face_count(&self) -> usize {
        self.faces
            .as_ref()
            .and_then(|f| f.shape().first().copied())
            .unwrap_or(0)
    }
}

/// Index of an object in an [`ObjectGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One node of an object graph: a type name plus its (possibly self-referencing) state.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphObject {
    pub type_name: String,
    pub state: NativeValue,
}

/// Arena of shared objects referenced by [`NativeValue::Object`].
///
/// Objects refer to each other by [`ObjectId`], so shared and cyclic structures are representable
/// without reference-counted cycles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectGraph {
    objects: Vec<GraphObject>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object with [`NativeValue::Null`] state; fill it later with [`Self::set_state`].
    pub fn reserve(&mut self, type_name: impl Into<String>) -> ObjectId {
        self.insert(type_name, NativeValue::Null)
    }

    pub fn insert(&mut self, type_name: impl Into<String>, state: NativeValue) -> ObjectId {
        self.objects.push(GraphObject {
            type_name: type_name.into(),
            state,
        });
        ObjectId(self.objects.len() - 1)
    }

    pub fn set_state(&mut self, id: ObjectId, state: NativeValue) {
        if let Some(obj) = self.objects.get_mut(id.0) {
            obj.state = state;
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&GraphObject> {
        self.objects.get(id.0)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut GraphObject> {
        self.objects.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// The in-memory value a loader plugin produces, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum NativeValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(NumericArray),
    Table(DataSet),
    /// Key-value structure in source order.
    Map(Vec<(String, NativeValue)>),
    /// Ordered heterogeneous collection.
    List(Vec<NativeValue>),
    Mesh(Mesh),
    /// Reference into the load's [`ObjectGraph`].
    Object(ObjectId),
    /// A sub-structure the plugin could not interpret.
    Opaque { type_name: String, reason: String },
}

impl NativeValue {
    pub fn opaque(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Opaque {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Short name of the variant, used in metadata and warnings.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Table(_) => "table",
            Self::Map(_) => "map",
            Self::List(_) => "list",
            Self::Mesh(_) => "mesh",
            Self::Object(_) => "object",
            Self::Opaque { .. } => "opaque",
        }
    }
}
