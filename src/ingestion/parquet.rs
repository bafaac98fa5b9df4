//! Parquet loading.
//!
//! Uses the Parquet record API (`RowIter`). Top-level columns become table columns; nested
//! groups, lists and maps are shown as their text rendering. Reading stops at the row limit; the
//! footer's row count is kept as the table's source extent.

use std::fs::File;

use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::Field;

use crate::error::{LoadError, LoadResult};
use crate::types::{DataSet, DataType, Schema, Value};
use crate::types::{Field as SchemaField, NativeValue};

use super::plugin::{LoadContext, Loaded, LoaderPlugin};

/// Rows read between cancellation checks.
const BATCH_ROWS: usize = 1024;

/// Loader for Apache Parquet files.
#[derive(Debug, Clone, Copy)]
pub struct ParquetPlugin;

impl LoaderPlugin for ParquetPlugin {
    fn format_tag(&self) -> &'static str {
        "parquet"
    }

    fn description(&self) -> &'static str {
        "Apache Parquet"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["parquet", "pq"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        peeked.starts_with(b"PAR1")
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let file = File::open(ctx.path)?;
        let reader = SerializedFileReader::new(file)
            .map_err(|e| LoadError::corrupt_with("parquet", e.to_string(), e))?;

        let meta = reader.metadata().file_metadata();
        let total_rows = usize::try_from(meta.num_rows()).unwrap_or(0);
        let created_by = meta.created_by().map(str::to_owned);
        let row_groups = reader.metadata().num_row_groups();
        let names: Vec<String> = meta
            .schema_descr()
            .root_schema()
            .get_fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();

        // The footer's row count only drives progress; rows are read up to the limit.
        let wanted = total_rows.min(ctx.max_rows);
        let mut rows: Vec<Vec<Value>> = Vec::new();
        for (idx0, row_res) in reader.into_iter().take(ctx.max_rows).enumerate() {
            if idx0 % BATCH_ROWS == 0 {
                ctx.check_cancelled()?;
                if wanted > 0 {
                    ctx.report(idx0 as f32 / wanted as f32);
                }
            }
            let row = row_res.map_err(|e| {
                LoadError::corrupt_with("parquet", format!("row {}: {e}", idx0 + 1), e)
            })?;
            let mut out_row = vec![Value::Null; names.len()];
            for (name, field) in row.get_column_iter() {
                if let Some(idx) = names.iter().position(|n| n == name) {
                    out_row[idx] = convert_parquet_field(field);
                }
            }
            rows.push(out_row);
        }

        let fields = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let dt = rows
                    .iter()
                    .filter_map(|r| value_type(&r[idx]))
                    .reduce(DataType::widen)
                    .unwrap_or(DataType::Utf8);
                SchemaField::new(name, dt)
            })
            .collect();

        let read_rows = rows.len();
        let mut table = DataSet::new(Schema::new(fields), rows);
        if read_rows < total_rows {
            log::debug!("parquet: read {read_rows} of {total_rows} rows");
            table = table.with_total_rows(total_rows);
        }
        let mut loaded = Loaded::new(NativeValue::Table(table))
            .attr("rows", total_rows.max(read_rows))
            .attr("row_groups", row_groups);
        if let Some(created_by) = created_by {
            loaded = loaded.attr("created_by", created_by);
        }
        Ok(loaded)
    }
}

fn value_type(v: &Value) -> Option<DataType> {
    match v {
        Value::Null => None,
        Value::Int64(_) => Some(DataType::Int64),
        Value::Float64(_) => Some(DataType::Float64),
        Value::Bool(_) => Some(DataType::Bool),
        Value::Utf8(_) => Some(DataType::Utf8),
        Value::Bytes(_) => Some(DataType::Binary),
    }
}

fn convert_parquet_field(f: &Field) -> Value {
    match f {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(*b),
        Field::Byte(v) => Value::Int64(i64::from(*v)),
        Field::Short(v) => Value::Int64(i64::from(*v)),
        Field::Int(v) => Value::Int64(i64::from(*v)),
        Field::Long(v) => Value::Int64(*v),
        Field::UByte(v) => Value::Int64(i64::from(*v)),
        Field::UShort(v) => Value::Int64(i64::from(*v)),
        Field::UInt(v) => Value::Int64(i64::from(*v)),
        Field::ULong(v) => i64::try_from(*v)
            .map(Value::Int64)
            .unwrap_or(Value::Float64(*v as f64)),
        Field::Float16(v) => Value::Float64(v.to_f64()),
        Field::Float(v) => Value::Float64(f64::from(*v)),
        Field::Double(v) => Value::Float64(*v),
        Field::Str(s) => Value::Utf8(s.clone()),
        Field::Bytes(b) => Value::Bytes(b.data().to_vec()),
        other => Value::Utf8(other.to_string()),
    }
}
