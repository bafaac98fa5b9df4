//! NumPy `.npy` arrays and `.npz` archives.
//!
//! `ndarray-npy` reads a typed array only when the requested element type matches the file's
//! descriptor, so each supported element type is tried in turn.

use std::fs::{self, File};
use std::io::Cursor;

use ndarray::{ArrayD, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, ReadNpyError, ReadNpyExt, ReadNpzError, ReadableElement};

use crate::error::{LoadError, LoadResult};
use crate::types::{ElementType, NativeValue, NumericArray};

use super::plugin::{LoadContext, Loaded, LoaderPlugin, zip_first_entry_name};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

trait NpyElement: ReadableElement + Copy {
    const ELEMENT: ElementType;
    fn to_f64(self) -> f64;
}

macro_rules! npy_numeric {
    ($($t:ty => $e:expr),+ $(,)?) => {
        $(
            impl NpyElement for $t {
                const ELEMENT: ElementType = $e;
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )+
    };
}

npy_numeric! {
    f64 => ElementType::Float64,
    f32 => ElementType::Float32,
    i64 => ElementType::Int64,
    i32 => ElementType::Int32,
    i16 => ElementType::Int16,
    i8 => ElementType::Int8,
    u64 => ElementType::UInt64,
    u32 => ElementType::UInt32,
    u16 => ElementType::UInt16,
    u8 => ElementType::UInt8,
}

impl NpyElement for bool {
    const ELEMENT: ElementType = ElementType::Bool;
    fn to_f64(self) -> f64 {
        if self { 1.0 } else { 0.0 }
    }
}

type NpyAttempt = fn(&[u8]) -> Result<Option<NumericArray>, ReadNpyError>;
type NpzAttempt = fn(&mut NpzReader<File>, usize) -> Result<Option<NumericArray>, ReadNpzError>;

fn npy_as<T: NpyElement>(bytes: &[u8]) -> Result<Option<NumericArray>, ReadNpyError> {
    match ArrayD::<T>::read_npy(Cursor::new(bytes)) {
        Ok(a) => Ok(Some(NumericArray::new(T::ELEMENT, a.mapv(T::to_f64)))),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn npz_as<T: NpyElement>(
    npz: &mut NpzReader<File>,
    index: usize,
) -> Result<Option<NumericArray>, ReadNpzError> {
    match npz.by_index::<OwnedRepr<T>, IxDyn>(index) {
        Ok(a) => Ok(Some(NumericArray::new(T::ELEMENT, a.mapv(T::to_f64)))),
        Err(ReadNpzError::Npy(ReadNpyError::WrongDescriptor(_))) => Ok(None),
        Err(e) => Err(e),
    }
}

const NPY_ATTEMPTS: [NpyAttempt; 11] = [
    npy_as::<f64>,
    npy_as::<f32>,
    npy_as::<i64>,
    npy_as::<i32>,
    npy_as::<i16>,
    npy_as::<i8>,
    npy_as::<u64>,
    npy_as::<u32>,
    npy_as::<u16>,
    npy_as::<u8>,
    npy_as::<bool>,
];

const NPZ_ATTEMPTS: [NpzAttempt; 11] = [
    npz_as::<f64>,
    npz_as::<f32>,
    npz_as::<i64>,
    npz_as::<i32>,
    npz_as::<i16>,
    npz_as::<i8>,
    npz_as::<u64>,
    npz_as::<u32>,
    npz_as::<u16>,
    npz_as::<u8>,
    npz_as::<bool>,
];

/// Decode `.npy` bytes; `Ok(None)` if the element type is not supported.
pub fn read_npy_bytes(bytes: &[u8]) -> LoadResult<Option<NumericArray>> {
    if !bytes.starts_with(NPY_MAGIC) {
        return Err(LoadError::corrupt("npy", "missing \\x93NUMPY magic"));
    }
    for attempt in NPY_ATTEMPTS {
        let found = attempt(bytes).map_err(|e| LoadError::corrupt_with("npy", e.to_string(), e))?;
        if let Some(arr) = found {
            return Ok(Some(arr));
        }
    }
    Ok(None)
}

/// Descriptor string from an `.npy` header, for diagnostics.
fn npy_descr(bytes: &[u8]) -> Option<&str> {
    let header = std::str::from_utf8(bytes.get(10..bytes.len().min(512))?).ok()?;
    let start = header.find("'descr'")? + "'descr'".len();
    let rest = &header[start..];
    let open = rest.find('\'')? + 1;
    let close = rest[open..].find('\'')? + open;
    Some(&rest[open..close])
}

/// Loader for single NumPy arrays.
#[derive(Debug, Clone, Copy)]
pub struct NpyPlugin;

impl LoaderPlugin for NpyPlugin {
    fn format_tag(&self) -> &'static str {
        "npy"
    }

    fn description(&self) -> &'static str {
        "NumPy array"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["npy"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        peeked.starts_with(NPY_MAGIC)
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let bytes = fs::read(ctx.path)?;
        ctx.check_cancelled()?;
        match read_npy_bytes(&bytes)? {
            Some(arr) => {
                let shape = format!("{:?}", arr.shape());
                let dtype = arr.element_type;
                Ok(Loaded::new(NativeValue::Array(arr))
                    .attr("dtype", dtype)
                    .attr("shape", shape))
            }
            None => {
                let descr = npy_descr(&bytes).unwrap_or("?").to_string();
                let mut loaded = Loaded::new(NativeValue::opaque(
                    format!("ndarray[{descr}]"),
                    format!("unsupported dtype '{descr}'"),
                ));
                loaded.warn(format!("array with dtype '{descr}' cannot be decoded"));
                Ok(loaded.attr("dtype", descr))
            }
        }
    }
}

/// Loader for NumPy `.npz` archives: one mapping entry per member array.
#[derive(Debug, Clone, Copy)]
pub struct NpzPlugin;

impl LoaderPlugin for NpzPlugin {
    fn format_tag(&self) -> &'static str {
        "npz"
    }

    fn description(&self) -> &'static str {
        "NumPy archive of arrays"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["npz"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        zip_first_entry_name(peeked).is_some_and(|name| name.ends_with(".npy"))
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let file = File::open(ctx.path)?;
        let corrupt = |e: ReadNpzError| LoadError::corrupt_with("npz", e.to_string(), e);
        let mut npz = NpzReader::new(file).map_err(corrupt)?;
        let names = npz.names().map_err(corrupt)?;

        let mut loaded = Loaded::default();
        let mut entries = Vec::with_capacity(names.len());
        'members: for (index, name) in names.iter().enumerate() {
            ctx.check_cancelled()?;
            for attempt in NPZ_ATTEMPTS {
                match attempt(&mut npz, index) {
                    Ok(Some(arr)) => {
                        entries.push((name.clone(), NativeValue::Array(arr)));
                        ctx.report((index + 1) as f32 / names.len() as f32);
                        continue 'members;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("npz member '{name}': {e}");
                        loaded.warn(format!("member '{name}' could not be read: {e}"));
                        entries.push((name.clone(), NativeValue::opaque("ndarray", e.to_string())));
                        continue 'members;
                    }
                }
            }
            loaded.warn(format!("member '{name}' has an unsupported dtype"));
            entries.push((name.clone(), NativeValue::opaque("ndarray", "unsupported dtype")));
        }

        loaded.value = NativeValue::Map(entries);
        Ok(loaded.attr("arrays", names.len()))
    }
}
