//! `.safetensors` files: an 8-byte little-endian header length, a JSON header describing each
//! tensor, then the raw little-endian tensor buffer.

use std::fs;

use serde::Deserialize;

use crate::error::{LoadError, LoadResult};
use crate::types::{ElementType, NativeValue, NumericArray, checked_byte_len};

use super::plugin::{LoadContext, Loaded, LoaderPlugin};

/// Headers larger than this are treated as corrupt.
const MAX_HEADER_LEN: u64 = 100 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct TensorInfo {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: [usize; 2],
}

/// Loader for Hugging Face safetensors checkpoints.
#[derive(Debug, Clone, Copy)]
pub struct SafetensorsPlugin;

impl LoaderPlugin for SafetensorsPlugin {
    fn format_tag(&self) -> &'static str {
        "safetensors"
    }

    fn description(&self) -> &'static str {
        "safetensors tensor checkpoint"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["safetensors"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        header_len(peeked).is_some_and(|n| n > 1 && n < MAX_HEADER_LEN)
            && peeked.get(8) == Some(&b'{')
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let bytes = fs::read(ctx.path)?;
        let n = header_len(&bytes)
            .ok_or_else(|| LoadError::corrupt("safetensors", "file shorter than 8 bytes"))?;
        if n > MAX_HEADER_LEN || 8 + n as usize > bytes.len() {
            return Err(LoadError::corrupt(
                "safetensors",
                format!("header length {n} exceeds file size {}", bytes.len()),
            ));
        }
        let header_end = 8 + n as usize;
        let header: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(&bytes[8..header_end]).map_err(|e| {
                LoadError::corrupt_with("safetensors", format!("invalid header: {e}"), e)
            })?;
        let buffer = &bytes[header_end..];

        let mut loaded = Loaded::default();
        let mut entries = Vec::with_capacity(header.len());
        let total = header.len().max(1);
        for (i, (name, info)) in header.into_iter().enumerate() {
            ctx.check_cancelled()?;
            if name == "__metadata__" {
                entries.push((name, metadata_map(info)));
                continue;
            }
            let value = match serde_json::from_value::<TensorInfo>(info) {
                Ok(info) => match decode_tensor(&info, buffer) {
                    Ok(v) => v,
                    Err(reason) => {
                        loaded.warn(format!("tensor '{name}': {reason}"));
                        NativeValue::opaque(format!("tensor[{}]", info.dtype), reason)
                    }
                },
                Err(e) => {
                    loaded.warn(format!("tensor '{name}': invalid header entry: {e}"));
                    NativeValue::opaque("tensor", format!("invalid header entry: {e}"))
                }
            };
            entries.push((name, value));
            ctx.report((i + 1) as f32 / total as f32);
        }

        let tensors = entries.iter().filter(|(k, _)| k != "__metadata__").count();
        loaded.value = NativeValue::Map(entries);
        Ok(loaded.attr("tensors", tensors).attr("header_bytes", n))
    }
}

fn header_len(bytes: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}

fn metadata_map(v: serde_json::Value) -> NativeValue {
    match v {
        serde_json::Value::Object(obj) => NativeValue::Map(
            obj.into_iter()
                .map(|(k, v)| {
                    let s = match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, NativeValue::Str(s))
                })
                .collect(),
        ),
        other => NativeValue::Str(other.to_string()),
    }
}

fn dtype_of(tag: &str) -> Option<ElementType> {
    Some(match tag {
        "F64" => ElementType::Float64,
        "F32" => ElementType::Float32,
        "F16" => ElementType::Float16,
        "BF16" => ElementType::BFloat16,
        "I64" => ElementType::Int64,
        "I32" => ElementType::Int32,
        "I16" => ElementType::Int16,
        "I8" => ElementType::Int8,
        "U64" => ElementType::UInt64,
        "U32" => ElementType::UInt32,
        "U16" => ElementType::UInt16,
        "U8" => ElementType::UInt8,
        "BOOL" => ElementType::Bool,
        _ => return None,
    })
}

fn decode_tensor(info: &TensorInfo, buffer: &[u8]) -> Result<NativeValue, String> {
    let et = dtype_of(&info.dtype).ok_or_else(|| format!("unsupported dtype {}", info.dtype))?;
    let [start, end] = info.data_offsets;
    let data = buffer.get(start..end).ok_or_else(|| {
        format!(
            "data offsets {start}..{end} outside buffer of {} bytes",
            buffer.len()
        )
    })?;
    let expected = checked_byte_len(&info.shape, et)
        .ok_or_else(|| format!("shape {:?} is too large", info.shape))?;
    if data.len() != expected {
        return Err(format!(
            "expected {expected} bytes for shape {:?}, found {}",
            info.shape,
            data.len()
        ));
    }
    let values = decode_le(data, et);
    NumericArray::from_shape_vec(et, &info.shape, values)
        .map(NativeValue::Array)
        .ok_or_else(|| "shape does not match data".to_string())
}

/// Decode a little-endian buffer of `et` elements into `f64`s.
pub(crate) fn decode_le(data: &[u8], et: ElementType) -> Vec<f64> {
    let width = et.byte_width().max(1);
    let b8 = |c: &[u8]| [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
    data.chunks_exact(width)
        .map(|c| match et {
            ElementType::Float64 => f64::from_le_bytes(b8(c)),
            ElementType::Float32 => f64::from(f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            ElementType::Float16 => f16_to_f64(u16::from_le_bytes([c[0], c[1]])),
            ElementType::BFloat16 => bf16_to_f64(u16::from_le_bytes([c[0], c[1]])),
            ElementType::Int64 => i64::from_le_bytes(b8(c)) as f64,
            ElementType::Int32 => f64::from(i32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            ElementType::Int16 => f64::from(i16::from_le_bytes([c[0], c[1]])),
            ElementType::Int8 => f64::from(c[0] as i8),
            ElementType::UInt64 => u64::from_le_bytes(b8(c)) as f64,
            ElementType::UInt32 => f64::from(u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            ElementType::UInt16 => f64::from(u16::from_le_bytes([c[0], c[1]])),
            ElementType::UInt8 => f64::from(c[0]),
            ElementType::Bool => f64::from(u8::from(c[0] != 0)),
            _ => f64::NAN,
        })
        .collect()
}

/// Like [`decode_le`], byte-swapping each element first when `big_endian`.
pub(crate) fn decode_buffer(raw: &[u8], et: ElementType, big_endian: bool) -> Vec<f64> {
    let width = et.byte_width();
    if big_endian && width > 1 {
        let swapped: Vec<u8> = raw
            .chunks_exact(width)
            .flat_map(|c| c.iter().rev().copied())
            .collect();
        decode_le(&swapped, et)
    } else {
        decode_le(raw, et)
    }
}

/// IEEE 754 half precision.
pub(crate) fn f16_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exp = i32::from((bits >> 10) & 0x1f);
    let frac = f64::from(bits & 0x3ff);
    match exp {
        0 => sign * frac * 2f64.powi(-24),
        0x1f if frac == 0.0 => sign * f64::INFINITY,
        0x1f => f64::NAN,
        _ => sign * (1.0 + frac / 1024.0) * 2f64.powi(exp - 15),
    }
}

/// bfloat16: the upper half of an `f32`.
pub(crate) fn bf16_to_f64(bits: u16) -> f64 {
    f64::from(f32::from_bits(u32::from(bits) << 16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_precision_decodes() {
        assert_eq!(f16_to_f64(0x3C00), 1.0);
        assert_eq!(f16_to_f64(0xC000), -2.0);
        assert_eq!(f16_to_f64(0x0000), 0.0);
        assert!(f16_to_f64(0x7C01).is_nan());
        assert_eq!(bf16_to_f64(0x3F80), 1.0);
    }

    #[test]
    fn big_endian_buffers_are_swapped() {
        assert_eq!(decode_buffer(&[0x01, 0x00], ElementType::Int16, true), vec![256.0]);
        assert_eq!(decode_buffer(&[0x01, 0x00], ElementType::Int16, false), vec![1.0]);
        assert_eq!(decode_buffer(&[0xff], ElementType::Int8, true), vec![-1.0]);
    }

    #[test]
    fn tensor_size_mismatch_is_reported() {
        let info = TensorInfo {
            dtype: "F32".into(),
            shape: vec![2],
            data_offsets: [0, 4],
        };
        assert!(decode_tensor(&info, &[0u8; 4]).is_err());
    }

    #[test]
    fn unknown_dtype_is_reported() {
        let info = TensorInfo {
            dtype: "F8_E4M3".into(),
            shape: vec![1],
            data_offsets: [0, 1],
        };
        assert!(decode_tensor(&info, &[0u8; 1]).unwrap_err().contains("F8_E4M3"));
    }

    #[test]
    fn overflowing_shape_is_reported() {
        let info = TensorInfo {
            dtype: "F64".into(),
            shape: vec![1 << 62, 8],
            data_offsets: [0, 8],
        };
        assert!(decode_tensor(&info, &[0u8; 8]).unwrap_err().contains("too large"));
    }
}
