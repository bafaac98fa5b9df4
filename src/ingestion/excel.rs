#![cfg(feature = "excel")]

//! Spreadsheet loading (`.xlsx`, `.xls`, `.ods`, ...).
//!
//! Every sheet becomes a table under a mapping keyed by sheet name. The first non-empty row of a
//! sheet is its header row.

use calamine::{Data, Reader, open_workbook_auto};

use crate::error::{LoadError, LoadResult};
use crate::types::{DataSet, DataType, Field, NativeValue, Schema, Value};

use super::plugin::{LoadContext, Loaded, LoaderPlugin, zip_first_entry_name};

const OLE_MAGIC: &[u8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Loader for workbooks supported by `calamine`.
#[derive(Debug, Clone, Copy)]
pub struct ExcelPlugin;

impl LoaderPlugin for ExcelPlugin {
    fn format_tag(&self) -> &'static str {
        "excel"
    }

    fn description(&self) -> &'static str {
        "Spreadsheet workbook (one table per sheet)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xlsx", "xlsm", "xlsb", "xls", "ods"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        if peeked.starts_with(OLE_MAGIC) {
            return true;
        }
        zip_first_entry_name(peeked).is_some_and(|name| {
            name == "[Content_Types].xml"
                || name == "mimetype"
                || name.starts_with("xl/")
                || name.starts_with("_rels/")
                || name.starts_with("docProps/")
        })
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let mut workbook = open_workbook_auto(ctx.path).map_err(excel_err)?;
        let sheets: Vec<String> = workbook.sheet_names().to_vec();
        if sheets.is_empty() {
            return Err(LoadError::corrupt("excel", "workbook has no sheets"));
        }

        let mut out = Vec::with_capacity(sheets.len());
        let mut loaded = Loaded::default();
        for (i, sheet) in sheets.iter().enumerate() {
            ctx.check_cancelled()?;
            let range = workbook.worksheet_range(sheet).map_err(excel_err)?;
            let ds = sheet_table(&range, ctx.max_rows);
            if ds.column_count() == 0 {
                loaded.warn(format!("sheet '{sheet}' has no header row"));
            }
            out.push((sheet.clone(), NativeValue::Table(ds)));
            ctx.report((i + 1) as f32 / sheets.len() as f32);
        }
        loaded.value = NativeValue::Map(out);
        Ok(loaded.attr("sheets", sheets.join(", ")))
    }
}

fn excel_err(e: calamine::Error) -> LoadError {
    match e {
        calamine::Error::Io(io) => io.into(),
        other => LoadError::corrupt_with("excel", other.to_string(), other),
    }
}

fn sheet_table(range: &calamine::Range<Data>, max_rows: usize) -> DataSet {
    let Some(header_idx) = range
        .rows()
        .position(|row| row.iter().any(|c| !matches!(c, Data::Empty)))
    else {
        return DataSet::new(Schema::new(Vec::new()), Vec::new());
    };

    let width = range.width();
    let mut rows_iter = range.rows().skip(header_idx);
    let header: Vec<String> = rows_iter
        .next()
        .map(|row| {
            (0..width)
                .map(|i| match row.get(i).map(cell_to_header_string) {
                    Some(h) if !h.trim().is_empty() => h.trim().to_string(),
                    _ => format!("column_{}", i + 1),
                })
                .collect()
        })
        .unwrap_or_default();
    let mut body: Vec<&[Data]> = rows_iter.collect();
    let total_rows = body.len();
    body.truncate(max_rows);

    let types: Vec<DataType> = (0..width)
        .map(|col| {
            body.iter()
                .filter_map(|row| row.get(col).and_then(cell_type))
                .reduce(DataType::widen)
                .unwrap_or(DataType::Utf8)
        })
        .collect();

    let rows = body
        .iter()
        .map(|row| {
            (0..width)
                .map(|col| convert_cell(row.get(col).unwrap_or(&Data::Empty), types[col]))
                .collect()
        })
        .collect();

    let fields = header
        .into_iter()
        .zip(types.iter())
        .map(|(name, &dt)| Field::new(name, dt))
        .collect();
    let ds = DataSet::new(Schema::new(fields), rows);
    if total_rows > max_rows {
        ds.with_total_rows(total_rows)
    } else {
        ds
    }
}

fn is_integral(f: f64) -> bool {
    f.fract() == 0.0 && f.abs() < 9.0e15
}

fn cell_type(c: &Data) -> Option<DataType> {
    match c {
        Data::Empty => None,
        Data::Int(_) => Some(DataType::Int64),
        Data::Float(f) if is_integral(*f) => Some(DataType::Int64),
        Data::Float(_) => Some(DataType::Float64),
        Data::Bool(_) => Some(DataType::Bool),
        _ => Some(DataType::Utf8),
    }
}

fn cell_to_header_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Float(f) if is_integral(*f) => (*f as i64).to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn convert_cell(c: &Data, data_type: DataType) -> Value {
    match (data_type, c) {
        (_, Data::Empty) => Value::Null,
        (DataType::Int64, Data::Int(i)) => Value::Int64(*i),
        (DataType::Int64, Data::Float(f)) => Value::Int64(*f as i64),
        (DataType::Float64, Data::Int(i)) => Value::Float64(*i as f64),
        (DataType::Float64, Data::Float(f)) => Value::Float64(*f),
        (DataType::Bool, Data::Bool(b)) => Value::Bool(*b),
        (_, Data::String(s)) => Value::Utf8(s.clone()),
        (_, other) => Value::Utf8(cell_to_header_string(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_floats_are_integers() {
        assert_eq!(cell_type(&Data::Float(3.0)), Some(DataType::Int64));
        assert_eq!(cell_type(&Data::Float(3.5)), Some(DataType::Float64));
        assert_eq!(convert_cell(&Data::Float(3.0), DataType::Int64), Value::Int64(3));
        assert_eq!(convert_cell(&Data::Empty, DataType::Utf8), Value::Null);
    }
}
