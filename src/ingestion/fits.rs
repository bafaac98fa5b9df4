//! FITS primary HDU: header cards plus the primary data array.
//!
//! The header is a sequence of 2880-byte blocks of 80-character cards terminated by `END`.
//! Data follows in big-endian order with the fastest-varying axis first (`NAXIS1`).

use std::fs;

use crate::error::{LoadError, LoadResult};
use crate::types::{ElementType, NativeValue, NumericArray, checked_byte_len};

use super::plugin::{LoadContext, Loaded, LoaderPlugin};
use super::safetensors::decode_buffer;

const BLOCK: usize = 2880;
const CARD: usize = 80;

fn corrupt(message: impl Into<String>) -> LoadError {
    LoadError::corrupt("fits", message)
}

/// One parsed header card.
#[derive(Debug, Clone, PartialEq)]
struct Card {
    keyword: String,
    value: NativeValue,
}

fn parse_card(raw: &str) -> Option<Card> {
    let keyword = raw.get(..8).unwrap_or(raw).trim_end().to_string();
    if keyword.is_empty() {
        return None;
    }
    let rest = raw.get(8..).unwrap_or("");
    if keyword == "COMMENT" || keyword == "HISTORY" {
        return Some(Card {
            keyword,
            value: NativeValue::Str(rest.trim().to_string()),
        });
    }
    let body = rest.strip_prefix("= ")?;
    Some(Card {
        keyword,
        value: parse_value(body),
    })
}

fn parse_value(body: &str) -> NativeValue {
    let body = body.trim_start();
    if let Some(quoted) = body.strip_prefix('\'') {
        // `''` escapes a quote inside a string value.
        let mut out = String::new();
        let mut chars = quoted.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push('\'');
                    continue;
                }
                break;
            }
            out.push(c);
        }
        return NativeValue::Str(out.trim_end().to_string());
    }
    let token = body.split('/').next().unwrap_or("").trim();
    match token {
        "" => NativeValue::Null,
        "T" => NativeValue::Bool(true),
        "F" => NativeValue::Bool(false),
        _ => {
            if let Ok(i) = token.parse::<i64>() {
                NativeValue::Int(i)
            } else if let Ok(f) = token.replace(['D', 'd'], "E").parse::<f64>() {
                NativeValue::Float(f)
            } else {
                NativeValue::Str(token.to_string())
            }
        }
    }
}

/// Header cards up to `END`, plus the offset of the first data byte.
fn read_header(bytes: &[u8]) -> LoadResult<(Vec<Card>, usize)> {
    let mut cards = Vec::new();
    for (i, raw) in bytes.chunks_exact(CARD).enumerate() {
        let text = String::from_utf8_lossy(raw);
        if text.trim_end() == "END" {
            let end = (i + 1) * CARD;
            return Ok((cards, end.div_ceil(BLOCK) * BLOCK));
        }
        if let Some(card) = parse_card(&text) {
            cards.push(card);
        }
    }
    Err(corrupt("header has no END card"))
}

fn element_type(bitpix: i64) -> Option<ElementType> {
    Some(match bitpix {
        8 => ElementType::UInt8,
        16 => ElementType::Int16,
        32 => ElementType::Int32,
        64 => ElementType::Int64,
        -32 => ElementType::Float32,
        -64 => ElementType::Float64,
        _ => return None,
    })
}

fn int_card(cards: &[Card], keyword: &str) -> Option<i64> {
    cards.iter().find(|c| c.keyword == keyword).and_then(|c| match c.value {
        NativeValue::Int(i) => Some(i),
        _ => None,
    })
}

fn float_card(cards: &[Card], keyword: &str) -> Option<f64> {
    cards.iter().find(|c| c.keyword == keyword).and_then(|c| match c.value {
        NativeValue::Int(i) => Some(i as f64),
        NativeValue::Float(f) => Some(f),
        _ => None,
    })
}

/// Header cards as a mapping; repeated `COMMENT`/`HISTORY` cards are collected into lists.
fn header_map(cards: &[Card]) -> NativeValue {
    let mut entries: Vec<(String, NativeValue)> = Vec::new();
    for card in cards {
        match entries.iter_mut().find(|(k, _)| *k == card.keyword) {
            Some((_, NativeValue::List(items))) => items.push(card.value.clone()),
            Some((_, slot)) => *slot = card.value.clone(),
            None if card.keyword == "COMMENT" || card.keyword == "HISTORY" => {
                entries.push((card.keyword.clone(), NativeValue::List(vec![card.value.clone()])));
            }
            None => entries.push((card.keyword.clone(), card.value.clone())),
        }
    }
    NativeValue::Map(entries)
}

/// Loader for FITS images (primary HDU only).
#[derive(Debug, Clone, Copy)]
pub struct FitsPlugin;

impl LoaderPlugin for FitsPlugin {
    fn format_tag(&self) -> &'static str {
        "fits"
    }

    fn description(&self) -> &'static str {
        "FITS image (primary HDU)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["fits", "fit", "fts"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        peeked.starts_with(b"SIMPLE  =")
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let bytes = fs::read(ctx.path)?;
        if !bytes.starts_with(b"SIMPLE  =") {
            return Err(corrupt("missing SIMPLE card"));
        }
        let (cards, data_start) = read_header(&bytes)?;
        let bitpix = int_card(&cards, "BITPIX").ok_or_else(|| corrupt("missing BITPIX"))?;
        let naxis = int_card(&cards, "NAXIS").ok_or_else(|| corrupt("missing NAXIS"))?;
        let et = element_type(bitpix).ok_or_else(|| corrupt(format!("invalid BITPIX {bitpix}")))?;

        if !(0..=999).contains(&naxis) {
            return Err(corrupt(format!("invalid NAXIS {naxis}")));
        }
        let mut axes = Vec::with_capacity(naxis as usize);
        for n in 1..=naxis {
            let len = int_card(&cards, &format!("NAXIS{n}"))
                .ok_or_else(|| corrupt(format!("missing NAXIS{n}")))?;
            axes.push(usize::try_from(len).map_err(|_| corrupt(format!("negative NAXIS{n}")))?);
        }
        let header = header_map(&cards);
        let mut loaded = Loaded::default().attr("bitpix", bitpix).attr("naxis", naxis);

        if axes.is_empty() {
            loaded.value = NativeValue::Map(vec![("header".to_string(), header)]);
            return Ok(loaded);
        }

        // NAXIS1 varies fastest, so the row-major shape is the reverse.
        let shape: Vec<usize> = axes.iter().rev().copied().collect();
        let byte_len = checked_byte_len(&shape, et)
            .ok_or_else(|| corrupt(format!("NAXIS shape {shape:?} is too large")))?;
        let raw = data_start
            .checked_add(byte_len)
            .and_then(|end| bytes.get(data_start..end))
            .ok_or_else(|| {
                corrupt(format!(
                    "data needs {byte_len} bytes after the header, file is shorter"
                ))
            })?;
        ctx.check_cancelled()?;

        let mut values = decode_buffer(raw, et, true);
        let scale = float_card(&cards, "BSCALE").unwrap_or(1.0);
        let zero = float_card(&cards, "BZERO").unwrap_or(0.0);
        let scaled = scale != 1.0 || zero != 0.0;
        if scaled {
            for v in &mut values {
                *v = *v * scale + zero;
            }
        }
        let out_type = if scaled { ElementType::Float64 } else { et };
        let arr = NumericArray::from_shape_vec(out_type, &shape, values)
            .ok_or_else(|| corrupt("data does not match NAXIS shape"))?;

        if bytes.len() - data_start > byte_len.div_ceil(BLOCK) * BLOCK {
            loaded.warn(
                "file has extension HDUs after the primary HDU; only the primary HDU is shown",
            );
        }
        loaded.value = NativeValue::Map(vec![
            ("header".to_string(), header),
            ("data".to_string(), NativeValue::Array(arr)),
        ]);
        Ok(loaded.attr("shape", format!("{shape:?}")))
    }
}
