//! Delimited text (CSV/TSV) loading.
//!
//! The first row is the header. Column types are inferred from the data: a column is `Int64` if
//! every non-empty cell parses as an integer, otherwise `Float64` if every cell parses as a
//! number, otherwise `Bool` if every cell is a boolean word, otherwise `Utf8`. Only rows up to
//! the row limit are kept, and types are inferred from those rows.

use std::fs::File;

use crate::error::{LoadError, LoadResult};
use crate::types::{DataSet, DataType, Field, NativeValue, Schema, Value};

use super::plugin::{LoadContext, Loaded, LoaderPlugin};

/// Records read between cancellation checks.
const BATCH_ROWS: usize = 1024;

/// Loader for comma- or tab-separated files.
#[derive(Debug, Clone, Copy)]
pub struct CsvPlugin {
    delimiter: u8,
}

impl CsvPlugin {
    pub fn csv() -> Self {
        Self { delimiter: b',' }
    }

    pub fn tsv() -> Self {
        Self { delimiter: b'\t' }
    }

    fn is_tsv(&self) -> bool {
        self.delimiter == b'\t'
    }
}

impl LoaderPlugin for CsvPlugin {
    fn format_tag(&self) -> &'static str {
        if self.is_tsv() { "tsv" } else { "csv" }
    }

    fn description(&self) -> &'static str {
        if self.is_tsv() {
            "Tab-separated values"
        } else {
            "Comma-separated values"
        }
    }

    fn extensions(&self) -> &'static [&'static str] {
        if self.is_tsv() { &["tsv", "tab"] } else { &["csv"] }
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let file = File::open(ctx.path)?;
        let total_bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .flexible(true)
            .from_reader(file);
        let format = self.format_tag();
        let corrupt = |e: csv::Error| LoadError::corrupt_with(format, e.to_string(), e);

        let headers: Vec<String> = rdr
            .headers()
            .map_err(corrupt)?
            .iter()
            .map(str::to_owned)
            .collect();
        if headers.is_empty() {
            return Err(LoadError::corrupt(format, "missing header row"));
        }

        let width = headers.len();
        let mut raw_rows: Vec<Vec<String>> = Vec::new();
        let mut total_rows = 0usize;
        let mut ragged = 0usize;
        let mut record = csv::StringRecord::new();
        loop {
            ctx.check_cancelled()?;
            let mut batch = 0;
            while batch < BATCH_ROWS {
                if !rdr.read_record(&mut record).map_err(corrupt)? {
                    break;
                }
                if record.len() != width {
                    ragged += 1;
                }
                // Rows past the limit are counted but not kept.
                if total_rows < ctx.max_rows {
                    raw_rows.push(record.iter().take(width).map(str::to_owned).collect());
                }
                total_rows += 1;
                batch += 1;
            }
            if total_bytes > 0 {
                ctx.report(rdr.position().byte() as f32 / total_bytes as f32);
            }
            if batch < BATCH_ROWS {
                break;
            }
        }

        let types: Vec<DataType> = (0..width)
            .map(|col| {
                infer_column_type(
                    raw_rows
                        .iter()
                        .map(|r| r.get(col).map(String::as_str).unwrap_or("")),
                )
            })
            .collect();

        let rows: Vec<Vec<Value>> = raw_rows
            .into_iter()
            .map(|raw| {
                (0..width)
                    .map(|col| {
                        parse_cell(raw.get(col).map(String::as_str).unwrap_or(""), types[col])
                    })
                    .collect()
            })
            .collect();

        let schema = Schema::new(
            headers
                .into_iter()
                .zip(types.iter())
                .map(|(name, &dt)| Field::new(name, dt))
                .collect(),
        );
        let mut table = DataSet::new(schema, rows);
        if table.row_count() < total_rows {
            table = table.with_total_rows(total_rows);
        }
        let mut loaded = Loaded::new(NativeValue::Table(table))
            .attr("rows", total_rows)
            .attr("columns", width);
        if ragged > 0 {
            loaded.warn(format!(
                "{ragged} row(s) did not have {width} fields; missing cells were filled with nulls"
            ));
        }
        Ok(loaded)
    }
}

/// Type of a single non-empty cell, `None` for empty cells.
pub(crate) fn infer_cell_type(raw: &str) -> Option<DataType> {
    let s = raw.trim();
    if s.is_empty() {
        None
    } else if s.parse::<i64>().is_ok() {
        Some(DataType::Int64)
    } else if s.parse::<f64>().is_ok() {
        Some(DataType::Float64)
    } else if parse_bool(s).is_some() {
        Some(DataType::Bool)
    } else {
        Some(DataType::Utf8)
    }
}

/// Widest type over all cells; all-empty columns are `Utf8`.
pub(crate) fn infer_column_type<'a>(cells: impl Iterator<Item = &'a str>) -> DataType {
    cells
        .filter_map(infer_cell_type)
        .reduce(DataType::widen)
        .unwrap_or(DataType::Utf8)
}

pub(crate) fn parse_cell(raw: &str, data_type: DataType) -> Value {
    let s = raw.trim();
    if s.is_empty() {
        return Value::Null;
    }
    match data_type {
        DataType::Int64 => s.parse().map(Value::Int64).unwrap_or(Value::Null),
        DataType::Float64 => s.parse().map(Value::Float64).unwrap_or(Value::Null),
        DataType::Bool => parse_bool(s).map(Value::Bool).unwrap_or(Value::Null),
        DataType::Utf8 | DataType::Binary => Value::Utf8(s.to_owned()),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_types_widen_per_column() {
        assert_eq!(infer_column_type(["1", "2", ""].into_iter()), DataType::Int64);
        assert_eq!(infer_column_type(["1", "2.5"].into_iter()), DataType::Float64);
        assert_eq!(infer_column_type(["true", "no"].into_iter()), DataType::Bool);
        assert_eq!(infer_column_type(["1", "x"].into_iter()), DataType::Utf8);
        assert_eq!(infer_column_type(["", " "].into_iter()), DataType::Utf8);
    }

    #[test]
    fn cells_parse_to_column_type() {
        assert_eq!(parse_cell(" 42 ", DataType::Int64), Value::Int64(42));
        assert_eq!(parse_cell("42", DataType::Float64), Value::Float64(42.0));
        assert_eq!(parse_cell("", DataType::Utf8), Value::Null);
        assert_eq!(parse_cell("Yes", DataType::Bool), Value::Bool(true));
    }
}
