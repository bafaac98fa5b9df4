//! JSON loading.
//!
//! Supported inputs:
//! - Any single JSON document (object, array or scalar at the top level)
//! - Newline-delimited JSON (NDJSON): `{"a":1}\n{"a":2}\n`, loaded as a list of documents
//!
//! Object keys keep their source order.

use std::fmt;
use std::fs;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};

use crate::error::{LoadError, LoadResult};
use crate::types::NativeValue;

use super::plugin::{LoadContext, Loaded, LoaderPlugin};

/// Loader for `.json` and `.ndjson` files.
#[derive(Debug, Clone, Copy)]
pub struct JsonPlugin;

impl LoaderPlugin for JsonPlugin {
    fn format_tag(&self) -> &'static str {
        "json"
    }

    fn description(&self) -> &'static str {
        "JSON document or newline-delimited JSON"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json", "ndjson", "jsonl", "geojson"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        let text = peeked.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(peeked);
        matches!(
            text.iter().find(|b| !b.is_ascii_whitespace()),
            Some(b'{') | Some(b'[')
        )
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let text = fs::read_to_string(ctx.path)?;
        ctx.check_cancelled()?;
        let value = parse_json_text(&text)?;
        let count = match &value {
            NativeValue::Map(entries) => Some(("keys_count", entries.len())),
            NativeValue::List(items) => Some(("items_count", items.len())),
            _ => None,
        };
        let loaded = Loaded::new(value);
        Ok(match count {
            Some((key, n)) => loaded.attr(key, n),
            None => loaded,
        })
    }
}

/// Containers nested deeper than this are skipped and kept as an opaque placeholder.
///
/// The normalizer's own depth limit is far below this, so well-formed documents are cut there
/// with a `depth limit exceeded` node instead.
const MAX_NESTING: usize = 1024;

/// Parse a JSON document, falling back to NDJSON when the text is not one document.
pub fn parse_json_text(input: &str) -> LoadResult<NativeValue> {
    let trimmed = input.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Err(LoadError::corrupt("json", "json input is empty"));
    }

    match parse_document(trimmed) {
        Ok(v) => Ok(v),
        Err(first_err) => {
            // Fall back to NDJSON, but only if it has more than one line.
            if !trimmed.contains('\n') {
                return Err(LoadError::corrupt_with("json", first_err.to_string(), first_err));
            }
            let mut values = Vec::new();
            for (i, line) in trimmed.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let v = parse_document(line).map_err(|e| {
                    LoadError::corrupt_with(
                        "json",
                        format!("invalid ndjson at line {}: {e}", i + 1),
                        e,
                    )
                })?;
                values.push(v);
            }
            Ok(NativeValue::List(values))
        }
    }
}

/// One JSON document straight into a [`NativeValue`].
///
/// serde_json's recursion limit is off; `serde_stacker` grows the stack instead, so arbitrarily
/// deep input parses and the depth policy is applied by the normalizer.
fn parse_document(text: &str) -> Result<NativeValue, serde_json::Error> {
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let value = JsonSeed { depth: 0 }.deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

struct JsonSeed {
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for JsonSeed {
    type Value = NativeValue;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<NativeValue, D::Error> {
        deserializer.deserialize_any(JsonVisitor { depth: self.depth })
    }
}

struct JsonVisitor {
    depth: usize,
}

impl JsonVisitor {
    fn child(&self) -> JsonSeed {
        JsonSeed {
            depth: self.depth + 1,
        }
    }

    fn too_deep(&self) -> bool {
        self.depth >= MAX_NESTING
    }
}

fn nested_too_deep() -> NativeValue {
    NativeValue::opaque("json", format!("nested deeper than {MAX_NESTING} levels"))
}

impl<'de> Visitor<'de> for JsonVisitor {
    type Value = NativeValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<NativeValue, E> {
        Ok(NativeValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<NativeValue, E> {
        Ok(NativeValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<NativeValue, E> {
        Ok(i64::try_from(v)
            .map(NativeValue::Int)
            .unwrap_or(NativeValue::Float(v as f64)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<NativeValue, E> {
        Ok(NativeValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<NativeValue, E> {
        Ok(NativeValue::Str(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<NativeValue, E> {
        Ok(NativeValue::Str(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<NativeValue, E> {
        Ok(NativeValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<NativeValue, E> {
        Ok(NativeValue::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<NativeValue, A::Error> {
        if self.too_deep() {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            return Ok(nested_too_deep());
        }
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(v) = seq.next_element_seed(self.child())? {
            items.push(v);
        }
        Ok(NativeValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<NativeValue, A::Error> {
        if self.too_deep() {
            while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
            return Ok(nested_too_deep());
        }
        let mut entries = Vec::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value_seed(self.child())?;
            entries.push((key, value));
        }
        Ok(NativeValue::Map(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_keep_source_order() {
        let v = parse_json_text(r#"{"z": 1, "a": [1, 2], "m": null}"#).unwrap();
        let NativeValue::Map(entries) = v else {
            panic!("expected map");
        };
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn ndjson_becomes_a_list() {
        let v = parse_json_text("{\"a\":1}\n\n{\"a\":2}\n").unwrap();
        assert!(matches!(v, NativeValue::List(ref items) if items.len() == 2));
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = parse_json_text("{not json").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptData);
        assert!(parse_json_text("   ").is_err());
    }

    #[test]
    fn nesting_beyond_serde_json_default_limit_parses() {
        let depth = 500;
        let text = format!("{}1{}", "[".repeat(depth), "]".repeat(depth));
        let mut v = parse_json_text(&text).unwrap();
        let mut levels = 0;
        while let NativeValue::List(mut items) = v {
            levels += 1;
            v = items.pop().unwrap();
        }
        assert_eq!(levels, depth);
        assert_eq!(v, NativeValue::Int(1));
    }

    #[test]
    fn nesting_beyond_the_cap_is_opaque() {
        let depth = MAX_NESTING + 10;
        let text = format!("{}{}", "[".repeat(depth), "]".repeat(depth));
        let mut v = parse_json_text(&text).unwrap();
        while let NativeValue::List(mut items) = v {
            v = items.pop().unwrap();
        }
        assert!(matches!(v, NativeValue::Opaque { .. }));
    }

    #[test]
    fn large_unsigned_numbers_become_floats() {
        let v = parse_json_text("[18446744073709551615, -3]").unwrap();
        assert_eq!(
            v,
            NativeValue::List(vec![
                NativeValue::Float(18446744073709551615.0),
                NativeValue::Int(-3)
            ])
        );
    }

    #[test]
    fn sniff_skips_whitespace() {
        assert!(JsonPlugin.sniff(b"  \n{\"a\": 1}"));
        assert!(!JsonPlugin.sniff(b"a,b\n1,2"));
    }
}
