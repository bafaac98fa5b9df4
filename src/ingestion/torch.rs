//! PyTorch checkpoints saved with the zip serialization format (`torch.save` since 1.6).
//!
//! The archive holds `<prefix>/data.pkl`, a pickle whose persistent ids name raw storages stored
//! as `<prefix>/data/<key>`. Tensors are rebuilt from `torch._utils._rebuild_tensor_v2` calls.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{LoadError, LoadResult};
use crate::types::{ElementType, NativeValue, NumericArray, checked_element_count};

use super::pickle::{PickleHooks, VmState, unpickle};
use super::plugin::{LoadContext, Loaded, LoaderPlugin, zip_first_entry_name};
use super::safetensors::decode_le;

const STORAGE_TYPE: &str = "torch.storage";

fn zip_err(e: ZipError) -> LoadError {
    match e {
        ZipError::Io(io) => io.into(),
        other => LoadError::corrupt_with("torch", other.to_string(), other),
    }
}

fn storage_element_type(name: &str) -> Option<ElementType> {
    Some(match name.rsplit('.').next()? {
        "DoubleStorage" => ElementType::Float64,
        "FloatStorage" => ElementType::Float32,
        "HalfStorage" => ElementType::Float16,
        "BFloat16Storage" => ElementType::BFloat16,
        "LongStorage" => ElementType::Int64,
        "IntStorage" => ElementType::Int32,
        "ShortStorage" => ElementType::Int16,
        "CharStorage" => ElementType::Int8,
        "ByteStorage" => ElementType::UInt8,
        "BoolStorage" => ElementType::Bool,
        _ => return None,
    })
}

struct TorchHooks<'a> {
    archive: &'a mut ZipArchive<File>,
    prefix: String,
    storages: HashMap<String, Arc<Vec<f64>>>,
    tensors: usize,
    warnings: Vec<String>,
}

impl TorchHooks<'_> {
    fn storage_values(&mut self, key: &str, et: ElementType) -> Result<Arc<Vec<f64>>, String> {
        if let Some(values) = self.storages.get(key) {
            return Ok(Arc::clone(values));
        }
        let name = format!("{}data/{key}", self.prefix);
        let mut entry = self.archive.by_name(&name).map_err(|e| format!("storage '{name}': {e}"))?;
        let mut raw = Vec::new();
        entry
            .read_to_end(&mut raw)
            .map_err(|e| format!("storage '{name}': {e}"))?;
        let values = Arc::new(decode_le(&raw, et));
        self.storages.insert(key.to_string(), Arc::clone(&values));
        Ok(values)
    }

    fn rebuild_tensor(
        &mut self,
        args: &[NativeValue],
        vm: &VmState,
    ) -> Result<NativeValue, String> {
        let [storage, offset, size, stride, ..] = args else {
            return Err("too few arguments to _rebuild_tensor_v2".to_string());
        };
        let entries = vm.entries(storage).ok_or("tensor storage is not a persistent storage")?;
        let field = |k: &str| entries.iter().find(|(key, _)| key == k).map(|(_, v)| v);
        let (Some(NativeValue::Str(key)), Some(NativeValue::Str(dtype))) =
            (field("key"), field("dtype"))
        else {
            return Err("storage is missing its key or dtype".to_string());
        };
        let et = storage_element_type(dtype)
            .ok_or_else(|| format!("unsupported storage type {dtype}"))?;

        let ints = |v: &NativeValue| -> Option<Vec<i64>> {
            vm.items(v)?
                .iter()
                .map(|d| match d {
                    NativeValue::Int(i) => Some(*i),
                    _ => None,
                })
                .collect()
        };
        let shape = ints(size).ok_or("tensor size is not a tuple of integers")?;
        let stride = ints(stride).ok_or("tensor stride is not a tuple of integers")?;
        let NativeValue::Int(offset) = offset else {
            return Err("tensor storage offset is not an integer".to_string());
        };
        let shape: Vec<usize> = shape
            .iter()
            .map(|&d| usize::try_from(d).map_err(|_| format!("negative dimension {d}")))
            .collect::<Result<_, _>>()?;
        if !is_contiguous(&shape, &stride) {
            return Err(format!("non-contiguous layout (size {shape:?}, stride {stride:?})"));
        }

        let key = key.clone();
        let values = self.storage_values(&key, et)?;
        let start =
            usize::try_from(*offset).map_err(|_| format!("negative storage offset {offset}"))?;
        let end = checked_element_count(&shape)
            .and_then(|numel| numel.checked_add(start))
            .ok_or_else(|| format!("tensor size {shape:?} at offset {start} is too large"))?;
        let slice = values.get(start..end).ok_or_else(|| {
            format!(
                "storage '{key}' holds {} elements, tensor needs {end}",
                values.len()
            )
        })?;
        NumericArray::from_shape_vec(et, &shape, slice.to_vec())
            .map(NativeValue::Array)
            .ok_or_else(|| "tensor shape does not match its data".to_string())
    }
}

/// Row-major contiguity; strides of size-1 dimensions are irrelevant.
fn is_contiguous(shape: &[usize], stride: &[i64]) -> bool {
    if shape.len() != stride.len() {
        return false;
    }
    let mut expected: i64 = 1;
    for (&dim, &s) in shape.iter().zip(stride).rev() {
        if dim != 1 && s != expected {
            return false;
        }
        expected = expected.saturating_mul(dim as i64);
    }
    true
}

impl PickleHooks for TorchHooks<'_> {
    fn persistent_load(&mut self, pid: &NativeValue, vm: &mut VmState) -> NativeValue {
        let Some(items) = vm.items(pid) else {
            return NativeValue::opaque("persistent_id", "persistent id is not a tuple");
        };
        let (Some(NativeValue::Str(kind)), Some(storage_type), Some(key)) =
            (items.first(), items.get(1), items.get(2))
        else {
            return NativeValue::opaque("persistent_id", "malformed persistent id");
        };
        if kind != "storage" {
            let reason = format!("unknown persistent id kind '{kind}'");
            return NativeValue::opaque("persistent_id", reason);
        }
        let dtype = vm.global_name(storage_type).unwrap_or("?").to_string();
        let key = vm.key_string(key);
        let location = match items.get(3) {
            Some(NativeValue::Str(s)) => s.clone(),
            _ => String::new(),
        };
        let state = NativeValue::Map(vec![
            ("key".to_string(), NativeValue::Str(key)),
            ("dtype".to_string(), NativeValue::Str(dtype)),
            ("location".to_string(), NativeValue::Str(location)),
        ]);
        NativeValue::Object(vm.graph.insert(STORAGE_TYPE, state))
    }

    fn reduce(
        &mut self,
        callable: &str,
        args: &[NativeValue],
        vm: &mut VmState,
    ) -> Option<NativeValue> {
        match callable {
            "torch._utils._rebuild_tensor_v2" | "torch._utils._rebuild_tensor" => {
                self.tensors += 1;
                Some(match self.rebuild_tensor(args, vm) {
                    Ok(v) => v,
                    Err(reason) => {
                        self.warnings.push(format!("tensor #{}: {reason}", self.tensors));
                        NativeValue::opaque("torch.Tensor", reason)
                    }
                })
            }
            "torch._utils._rebuild_parameter" | "torch._utils._rebuild_parameter_with_state" => {
                args.first().cloned()
            }
            _ => None,
        }
    }
}

/// Loader for PyTorch zip checkpoints.
#[derive(Debug, Clone, Copy)]
pub struct TorchPlugin;

impl LoaderPlugin for TorchPlugin {
    fn format_tag(&self) -> &'static str {
        "torch"
    }

    fn description(&self) -> &'static str {
        "PyTorch checkpoint (zip format)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["pt", "pth"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        zip_first_entry_name(peeked).is_some_and(|name| name.ends_with("data.pkl"))
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let mut archive = ZipArchive::new(File::open(ctx.path)?).map_err(zip_err)?;
        let pkl_name = archive
            .file_names()
            .filter(|n| n.ends_with("data.pkl"))
            .min_by_key(|n| n.len())
            .map(str::to_owned)
            .ok_or_else(|| LoadError::corrupt("torch", "archive has no data.pkl"))?;
        let prefix = pkl_name.trim_end_matches("data.pkl").to_string();

        let mut pickle = Vec::new();
        archive
            .by_name(&pkl_name)
            .map_err(zip_err)?
            .read_to_end(&mut pickle)?;
        ctx.report(0.1);

        let mut hooks = TorchHooks {
            archive: &mut archive,
            prefix: prefix.clone(),
            storages: HashMap::new(),
            tensors: 0,
            warnings: Vec::new(),
        };
        let out = unpickle(&pickle, &mut hooks, ctx.cancel)?;
        let (tensors, storages, warnings) = (hooks.tensors, hooks.storages.len(), hooks.warnings);

        let mut loaded = Loaded::new(out.value).with_graph(out.graph);
        for w in warnings {
            loaded.warn(w);
        }
        Ok(loaded
            .attr("archive", prefix.trim_end_matches('/'))
            .attr("tensors", tensors)
            .attr("storages", storages)
            .attr("pickle_protocol", out.protocol))
    }
}
