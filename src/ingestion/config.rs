//! YAML and TOML configuration files.

use std::fs;

use serde::Deserialize;

use crate::error::{LoadError, LoadResult};
use crate::types::NativeValue;

use super::plugin::{LoadContext, Loaded, LoaderPlugin};

/// Loader for `.yaml`/`.yml`; multi-document streams load as a list.
#[derive(Debug, Clone, Copy)]
pub struct YamlPlugin;

impl LoaderPlugin for YamlPlugin {
    fn format_tag(&self) -> &'static str {
        "yaml"
    }

    fn description(&self) -> &'static str {
        "YAML document(s)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["yaml", "yml"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        peeked.starts_with(b"---\n")
            || peeked.starts_with(b"---\r\n")
            || peeked.starts_with(b"%YAML")
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let text = fs::read_to_string(ctx.path)?;
        let mut docs = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(&text) {
            ctx.check_cancelled()?;
            let v = serde_yaml::Value::deserialize(doc)
                .map_err(|e| LoadError::corrupt_with("yaml", e.to_string(), e))?;
            docs.push(from_yaml(v));
        }
        let documents = docs.len();
        let value = match docs.len() {
            0 => NativeValue::Null,
            1 => docs.pop().unwrap_or_default(),
            _ => NativeValue::List(docs),
        };
        Ok(Loaded::new(value).attr("documents", documents))
    }
}

fn yaml_key(k: serde_yaml::Value) -> String {
    match k {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Null => "null".to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "<key>".to_string()),
    }
}

fn from_yaml(v: serde_yaml::Value) -> NativeValue {
    match v {
        serde_yaml::Value::Null => NativeValue::Null,
        serde_yaml::Value::Bool(b) => NativeValue::Bool(b),
        serde_yaml::Value::Number(n) => match n.as_i64() {
            Some(i) => NativeValue::Int(i),
            None => NativeValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_yaml::Value::String(s) => NativeValue::Str(s),
        serde_yaml::Value::Sequence(items) => {
            NativeValue::List(items.into_iter().map(from_yaml).collect())
        }
        serde_yaml::Value::Mapping(m) => {
            NativeValue::Map(m.into_iter().map(|(k, v)| (yaml_key(k), from_yaml(v))).collect())
        }
        serde_yaml::Value::Tagged(tagged) => from_yaml(tagged.value),
    }
}

/// Loader for `.toml`.
#[derive(Debug, Clone, Copy)]
pub struct TomlPlugin;

impl LoaderPlugin for TomlPlugin {
    fn format_tag(&self) -> &'static str {
        "toml"
    }

    fn description(&self) -> &'static str {
        "TOML document"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["toml"]
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let text = fs::read_to_string(ctx.path)?;
        let table: toml::Table = text.parse().map_err(|e: toml::de::Error| {
            LoadError::corrupt_with("toml", e.message().to_string(), e)
        })?;
        let keys = table.len();
        Ok(Loaded::new(from_toml(toml::Value::Table(table))).attr("keys_count", keys))
    }
}

fn from_toml(v: toml::Value) -> NativeValue {
    match v {
        toml::Value::String(s) => NativeValue::Str(s),
        toml::Value::Integer(i) => NativeValue::Int(i),
        toml::Value::Float(f) => NativeValue::Float(f),
        toml::Value::Boolean(b) => NativeValue::Bool(b),
        toml::Value::Datetime(d) => NativeValue::Str(d.to_string()),
        toml::Value::Array(items) => NativeValue::List(items.into_iter().map(from_toml).collect()),
        toml::Value::Table(t) => {
            NativeValue::Map(t.into_iter().map(|(k, v)| (k, from_toml(v))).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_mappings_keep_order_and_stringify_keys() {
        let v: serde_yaml::Value = serde_yaml::from_str("b: 1\n2: x\na: [1.5, true]\n").unwrap();
        let NativeValue::Map(entries) = from_yaml(v) else {
            panic!("expected map");
        };
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "2", "a"]);
    }

    #[test]
    fn toml_datetimes_become_strings() {
        let table: toml::Table = "when = 1979-05-27T07:32:00Z\nn = 3".parse().unwrap();
        let NativeValue::Map(entries) = from_toml(toml::Value::Table(table)) else {
            panic!("expected map");
        };
        assert_eq!(
            entries[0],
            ("when".to_string(), NativeValue::Str("1979-05-27T07:32:00Z".into()))
        );
        assert_eq!(entries[1], ("n".to_string(), NativeValue::Int(3)));
    }
}
