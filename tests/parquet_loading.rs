use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;

use data_inspector::execution::{CancellationToken, LoadOptions, load_file};
use data_inspector::ingestion::parquet::ParquetPlugin;
use data_inspector::ingestion::{LoadContext, LoaderPlugin};
use data_inspector::model::{NodeKind, Sample};
use data_inspector::normalize::Limits;
use data_inspector::types::{ElementType, NativeValue};

fn tmp_file(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("data-inspector-{name}-{nanos}.parquet"))
}

fn write_people_parquet(path: &Path) {
    let schema_str = r#"
    message schema {
      REQUIRED INT64 id;
      REQUIRED BINARY name (UTF8);
      REQUIRED DOUBLE score;
      REQUIRED BOOLEAN active;
    }
    "#;

    let schema = Arc::new(parse_message_type(schema_str).unwrap());
    let props = Arc::new(WriterProperties::builder().build());
    let file = File::create(path).unwrap();
    let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();

    let mut rg = writer.next_row_group().unwrap();
    while let Some(mut col) = rg.next_column().unwrap() {
        match col.untyped() {
            ColumnWriter::Int64ColumnWriter(w) => {
                w.write_batch(&[1_i64, 2_i64, 3_i64], None, None).unwrap();
            }
            ColumnWriter::ByteArrayColumnWriter(w) => {
                let names = [
                    ByteArray::from("Ada"),
                    ByteArray::from("Grace"),
                    ByteArray::from("Linus"),
                ];
                w.write_batch(&names, None, None).unwrap();
            }
            ColumnWriter::DoubleColumnWriter(w) => {
                w.write_batch(&[98.5_f64, 87.25_f64, 70.0_f64], None, None).unwrap();
            }
            ColumnWriter::BoolColumnWriter(w) => {
                w.write_batch(&[true, false, true], None, None).unwrap();
            }
            _ => panic!("unexpected column writer in test"),
        }
        col.close().unwrap();
    }
    rg.close().unwrap();
    writer.close().unwrap();
}

#[test]
fn parquet_loads_as_table() {
    let path = tmp_file("people");
    write_people_parquet(&path);

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "parquet");
    assert_eq!(record.root.kind, NodeKind::Table);
    assert_eq!(record.root.metadata.shape, vec![3, 4]);
    assert_eq!(record.attributes.get("rows").map(String::as_str), Some("3"));

    let id = record.root.child("id").unwrap();
    assert_eq!(id.metadata.element_type, Some(ElementType::Int64));
    let name = record.root.child("name").unwrap();
    assert_eq!(
        name.sample(),
        &Sample::Text(vec![
            Some("Ada".to_string()),
            Some("Grace".to_string()),
            Some("Linus".to_string())
        ])
    );

    let score = record.stats(record.root.child("score").unwrap()).unwrap();
    assert_eq!(score.count, 3);
    assert_eq!(score.min, 70.0);
    assert_eq!(score.max, 98.5);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn parquet_rows_are_truncated_to_the_limit() {
    let path = tmp_file("people-truncated");
    write_people_parquet(&path);

    let opts = LoadOptions {
        limits: Limits {
            max_rows: 2,
            ..Limits::default()
        },
        ..LoadOptions::default()
    };
    let record = load_file(&path, &opts).unwrap();
    assert!(record.root.is_truncated());
    assert_eq!(record.root.metadata.shape, vec![2, 4]);
    assert_eq!(record.attributes.get("rows").map(String::as_str), Some("3"));
    let score = record.root.child("score").unwrap();
    assert!(score.is_truncated());
    assert_eq!(score.metadata.original_extent.as_ref().unwrap().elements, 3);

    let stats = record.stats(score).unwrap();
    assert!(stats.sampled);
    assert_eq!(stats.sample_size, 2);
    assert_eq!(stats.population_size, 3);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn renamed_parquet_is_detected_by_signature() {
    let path = tmp_file("renamed").with_extension("bin");
    write_people_parquet(&path);

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "parquet");
    let _ = std::fs::remove_file(&path);
}

#[test]
fn parquet_loader_stops_reading_at_the_row_limit() {
    let path = tmp_file("people-prefix");
    write_people_parquet(&path);

    let cancel = CancellationToken::new();
    let ctx = LoadContext::new(&path, &cancel).with_max_rows(1);
    let loaded = ParquetPlugin.load(&ctx).unwrap();
    let NativeValue::Table(table) = &loaded.value else {
        panic!("expected a table, got {:?}", loaded.value);
    };
    assert_eq!(table.row_count(), 1);
    assert_eq!(table.source_row_count(), 3);
    assert_eq!(loaded.attributes.get("rows").map(String::as_str), Some("3"));

    let _ = std::fs::remove_file(&path);
}
