//! MATLAB level 5 `.mat` files.
//!
//! Each numeric variable becomes an array in a mapping keyed by variable name. MATLAB stores
//! matrices column-major, so values are reordered into row-major order. `matfile` skips cell,
//! struct, char and sparse variables. v7.3 files are HDF5 containers and are reported as
//! unsupported.

use std::fs::File;
use std::io::BufReader;

use matfile::{MatFile, NumericData};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};

use crate::error::{LoadError, LoadResult};
use crate::types::{ElementType, NativeValue, NumericArray};

use super::plugin::{LoadContext, Loaded, LoaderPlugin};
use super::registry::peek_file;

const V5_MAGIC: &[u8] = b"MATLAB 5.0 MAT-file";
const V73_MAGIC: &[u8] = b"MATLAB 7.3 MAT-file";
const HEADER_TEXT_LEN: usize = 116;

/// Loader for MATLAB v5/v7 MAT-files.
#[derive(Debug, Clone, Copy)]
pub struct MatPlugin;

impl LoaderPlugin for MatPlugin {
    fn format_tag(&self) -> &'static str {
        "mat"
    }

    fn description(&self) -> &'static str {
        "MATLAB MAT-file (level 5)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["mat"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        peeked.starts_with(V5_MAGIC)
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let head = peek_file(ctx.path)?;
        if head.starts_with(V73_MAGIC) {
            return Err(LoadError::FormatUnsupported {
                path: ctx.path.to_path_buf(),
                reason: "MATLAB v7.3 files are HDF5 containers".to_string(),
            });
        }
        let text = header_text(&head);

        let file = BufReader::new(File::open(ctx.path)?);
        let mat = MatFile::parse(file).map_err(|e| LoadError::corrupt("mat", format!("{e:?}")))?;

        let arrays = mat.arrays();
        let mut loaded = Loaded::default();
        let mut entries = Vec::with_capacity(arrays.len());
        for (i, array) in arrays.iter().enumerate() {
            ctx.check_cancelled()?;
            let value = match variable(array.size(), array.data()) {
                Ok(arr) => NativeValue::Array(arr),
                Err(reason) => {
                    loaded.warn(format!("variable '{}': {reason}", array.name()));
                    NativeValue::opaque("matlab", reason)
                }
            };
            entries.push((array.name().to_string(), value));
            ctx.report((i + 1) as f32 / arrays.len() as f32);
        }

        let count = entries.len();
        loaded.value = NativeValue::Map(entries);
        loaded = loaded.attr("variables", count);
        if !text.is_empty() {
            loaded = loaded.attr("header", text);
        }
        Ok(loaded)
    }
}

/// The descriptive text at the start of the file, without padding.
fn header_text(head: &[u8]) -> String {
    let raw = head.get(..HEADER_TEXT_LEN).unwrap_or(head);
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

fn widen<'a, T: Copy + Into<f64> + 'a>(values: impl IntoIterator<Item = &'a T>) -> Vec<f64> {
    values.into_iter().map(|&v| v.into()).collect()
}

fn widen_lossy<'a, T: Copy + 'a>(
    values: impl IntoIterator<Item = &'a T>,
    f: fn(T) -> f64,
) -> Vec<f64> {
    values.into_iter().map(|&v| f(v)).collect()
}

fn variable(size: &[usize], data: &NumericData) -> Result<NumericArray, String> {
    let (et, values, complex) = match data {
        NumericData::Double { real, imag } => (ElementType::Float64, real.clone(), imag.is_some()),
        NumericData::Single { real, imag } => (ElementType::Float32, widen(real), imag.is_some()),
        NumericData::Int8 { real, imag } => (ElementType::Int8, widen(real), imag.is_some()),
        NumericData::UInt8 { real, imag } => (ElementType::UInt8, widen(real), imag.is_some()),
        NumericData::Int16 { real, imag } => (ElementType::Int16, widen(real), imag.is_some()),
        NumericData::UInt16 { real, imag } => (ElementType::UInt16, widen(real), imag.is_some()),
        NumericData::Int32 { real, imag } => (ElementType::Int32, widen(real), imag.is_some()),
        NumericData::UInt32 { real, imag } => (ElementType::UInt32, widen(real), imag.is_some()),
        NumericData::Int64 { real, imag } => {
            (ElementType::Int64, widen_lossy(real, |v| v as f64), imag.is_some())
        }
        NumericData::UInt64 { real, imag } => {
            (ElementType::UInt64, widen_lossy(real, |v| v as f64), imag.is_some())
        }
    };
    if complex {
        return Err("complex values are not supported".to_string());
    }
    let stored = values.len();
    column_major(et, size, values)
        .ok_or_else(|| format!("size {size:?} does not match {stored} stored values"))
}

/// Row-major array from MATLAB's column-major buffer.
fn column_major(et: ElementType, size: &[usize], values: Vec<f64>) -> Option<NumericArray> {
    let data = ArrayD::from_shape_vec(IxDyn(size).f(), values).ok()?;
    Some(NumericArray::new(et, data.as_standard_layout().into_owned()))
}
