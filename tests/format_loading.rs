use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use data_inspector::execution::{LoadOptions, load_file};
use data_inspector::model::{LoadStatus, NodeKind, Sample};
use data_inspector::normalize::Limits;
use data_inspector::types::{ElementType, Value};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name)
}

fn tmp_file(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("data-inspector-formats-{nanos}-{name}"))
}

#[test]
fn csv_loads_as_typed_table() {
    let record = load_file(fixture("people.csv"), &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "csv");
    assert_eq!(record.loader_used, "CsvPlugin");
    assert_eq!(record.status, LoadStatus::Complete);
    assert_eq!(record.root.kind, NodeKind::Table);
    assert_eq!(record.root.metadata.shape, vec![4, 4]);

    let keys: Vec<&str> = record.root.children().iter().map(|c| c.key.as_str()).collect();
    assert_eq!(keys, vec!["id", "name", "score", "active"]);

    let id = record.root.child("id").unwrap();
    assert_eq!(id.metadata.element_type, Some(ElementType::Int64));
    assert_eq!(id.sample().as_numeric(), Some(&[1.0, 2.0, 3.0, 4.0][..]));

    let active = record.root.child("active").unwrap();
    assert_eq!(
        active.sample(),
        &Sample::Bool(vec![Some(true), Some(false), Some(true), Some(true)])
    );

    let score = record.stats(record.root.child("score").unwrap()).unwrap();
    assert_eq!(score.count, 3);
    assert_eq!(score.nan_count, 1);
    assert_eq!(score.max, 98.5);

    assert!(record.stats(record.root.child("name").unwrap()).is_err());
    assert_eq!(record.attributes.get("rows").map(String::as_str), Some("4"));
}

#[test]
fn tsv_uses_tab_delimiter() {
    let record = load_file(fixture("people.tsv"), &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "tsv");
    assert_eq!(record.root.metadata.shape, vec![2, 3]);
    let score = record.root.child("score").unwrap();
    assert_eq!(score.metadata.element_type, Some(ElementType::Float64));
}

#[test]
fn json_document_becomes_mapping() {
    let record = load_file(fixture("sample.json"), &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "json");
    assert_eq!(record.root.kind, NodeKind::Mapping);

    let seed = record.root.child("seed").unwrap();
    assert_eq!(seed.kind, NodeKind::Scalar);
    assert_eq!(seed.value, Some(Value::Int64(7)));

    let losses = record.root.child("losses").unwrap();
    assert_eq!(losses.kind, NodeKind::Array);
    assert_eq!(losses.metadata.shape, vec![5]);

    let units = record.root.find("layers/[1]/units").unwrap();
    assert_eq!(units.value, Some(Value::Int64(64)));
    assert_eq!(units.source.as_ref().unwrap().locator, "/layers/[1]/units");

    let notes = record.root.child("notes").unwrap();
    assert_eq!(notes.value, Some(Value::Null));
}

#[test]
fn yaml_and_toml_configs_become_mappings() {
    let yaml = load_file(fixture("config.yaml"), &LoadOptions::default()).unwrap();
    assert_eq!(yaml.format_tag, "yaml");
    assert_eq!(yaml.root.find("model/depth").unwrap().value, Some(Value::Int64(4)));
    let channels = yaml.root.find("model/channels").unwrap();
    assert_eq!(channels.kind, NodeKind::Array);
    assert_eq!(channels.metadata.element_type, Some(ElementType::Int64));
    assert_eq!(
        yaml.root.find("training/learning_rate").unwrap().value,
        Some(Value::Float64(0.001))
    );

    let toml = load_file(fixture("settings.toml"), &LoadOptions::default()).unwrap();
    assert_eq!(toml.format_tag, "toml");
    assert_eq!(toml.root.find("detector/enabled").unwrap().value, Some(Value::Bool(true)));
    let runs = toml.root.child("runs").unwrap();
    assert_eq!(runs.kind, NodeKind::Sequence);
    assert_eq!(runs.children().len(), 2);
    assert_eq!(
        toml.root.find("runs/[1]/label").unwrap().value,
        Some(Value::Utf8("flat".to_string()))
    );
}

#[test]
fn meshes_report_vertex_and_face_counts() {
    let cases = [
        ("cube.obj", "obj", 8, 12),
        ("tetra.off", "off", 4, 4),
        ("triangle.ply", "ply", 3, 1),
        ("points.xyz", "xyz", 4, 0),
    ];
    for (name, tag, vertices, faces) in cases {
        let record = load_file(fixture(name), &LoadOptions::default()).unwrap();
        assert_eq!(record.format_tag, tag, "{name}");
        assert_eq!(record.root.kind, NodeKind::Mesh, "{name}");
        assert_eq!(record.root.metadata.vertex_count, Some(vertices), "{name}");
        assert_eq!(record.root.metadata.face_count, Some(faces), "{name}");
        assert_eq!(
            record.root.child("vertices").unwrap().metadata.shape,
            vec![vertices, 3],
            "{name}"
        );
    }

    let ply = load_file(fixture("triangle.ply"), &LoadOptions::default()).unwrap();
    let colors = ply.root.child("colors").unwrap();
    assert_eq!(colors.metadata.element_type, Some(ElementType::UInt8));
    assert_eq!(colors.sample().as_numeric().unwrap()[..3], [255.0, 0.0, 0.0]);
}

#[test]
fn binary_stl_is_read() {
    let path = tmp_file("tri.stl");
    let mut bytes = vec![0u8; 80];
    bytes.extend_from_slice(&1u32.to_le_bytes());
    let floats = [0.0f32, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes.extend_from_slice(&[0, 0]);
    std::fs::write(&path, &bytes).unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "stl");
    assert_eq!(record.root.metadata.vertex_count, Some(3));
    assert_eq!(record.root.metadata.face_count, Some(1));
    assert!(record.root.child("normals").is_some());
    let _ = std::fs::remove_file(path);
}

#[test]
fn npy_array_keeps_shape_and_dtype() {
    use ndarray::ArrayD;
    use ndarray_npy::WriteNpyExt;

    let path = tmp_file("grid.npy");
    let arr = ArrayD::from_shape_vec(vec![2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    arr.write_npy(std::fs::File::create(&path).unwrap()).unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "npy");
    assert_eq!(record.root.kind, NodeKind::Array);
    assert_eq!(record.root.metadata.shape, vec![2, 3]);
    assert_eq!(record.root.metadata.element_type, Some(ElementType::Float32));
    assert_eq!(record.root.metadata.byte_size, 24);
    assert!(!record.root.is_truncated());
    assert_eq!(record.attributes.get("dtype").map(String::as_str), Some("float32"));
    let _ = std::fs::remove_file(path);
}

fn safetensors_bytes() -> Vec<u8> {
    let header = concat!(
        r#"{"__metadata__":{"format":"pt"},"#,
        r#""encoder.weight":{"dtype":"F32","shape":[2,2],"data_offsets":[0,16]},"#,
        r#""step":{"dtype":"I64","shape":[],"data_offsets":[16,24]}}"#
    )
    .as_bytes();
    let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
    bytes.extend_from_slice(header);
    for f in [1.0f32, -1.0, 0.5, 2.5] {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes.extend_from_slice(&1000i64.to_le_bytes());
    bytes
}

#[test]
fn safetensors_tensors_are_arrays() {
    let path = tmp_file("model.safetensors");
    std::fs::write(&path, safetensors_bytes()).unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "safetensors");
    assert_eq!(record.root.kind, NodeKind::Mapping);
    let weight = record.root.child("encoder.weight").unwrap();
    assert_eq!(weight.metadata.shape, vec![2, 2]);
    assert_eq!(weight.metadata.element_type, Some(ElementType::Float32));
    let stats = record.stats(weight).unwrap();
    assert_eq!(stats.min, -1.0);
    assert_eq!(stats.max, 2.5);
    assert_eq!(
        record.root.find("__metadata__/format").unwrap().value,
        Some(Value::Utf8("pt".to_string()))
    );
    assert_eq!(record.attributes.get("tensors").map(String::as_str), Some("2"));
    let _ = std::fs::remove_file(path);
}

#[test]
fn png_decodes_to_height_width_channels() {
    let path = tmp_file("pixels.png");
    let img = image::RgbImage::from_fn(4, 3, |x, y| image::Rgb([x as u8 * 10, y as u8 * 20, 255]));
    img.save(&path).unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "image");
    assert_eq!(record.root.kind, NodeKind::Array);
    assert_eq!(record.root.metadata.shape, vec![3, 4, 3]);
    assert_eq!(record.root.metadata.element_type, Some(ElementType::UInt8));
    assert_eq!(record.attributes.get("width").map(String::as_str), Some("4"));
    assert_eq!(record.attributes.get("channels").map(String::as_str), Some("3"));
    let _ = std::fs::remove_file(path);
}

fn fits_bytes() -> Vec<u8> {
    let cards = [
        "SIMPLE  =                    T",
        "BITPIX  =                   16",
        "NAXIS   =                    2",
        "NAXIS1  =                    3",
        "NAXIS2  =                    2",
        "OBJECT  = 'M31     '",
        "END",
    ];
    let mut bytes: Vec<u8> = cards.iter().flat_map(|c| format!("{c:<80}").into_bytes()).collect();
    bytes.resize(2880, b' ');
    for v in [1i16, 2, 3, -4, 5, 6] {
        bytes.extend_from_slice(&v.to_be_bytes());
    }
    bytes.resize(2 * 2880, 0);
    bytes
}

#[test]
fn fits_primary_hdu_has_header_and_data() {
    let path = tmp_file("frame.fits");
    std::fs::write(&path, fits_bytes()).unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "fits");
    assert_eq!(record.status, LoadStatus::Complete);
    assert_eq!(
        record.root.find("header/OBJECT").unwrap().value,
        Some(Value::Utf8("M31".to_string()))
    );
    let data = record.root.child("data").unwrap();
    assert_eq!(data.metadata.shape, vec![2, 3]);
    assert_eq!(data.metadata.element_type, Some(ElementType::Int16));
    assert_eq!(
        data.sample().as_numeric(),
        Some(&[1.0, 2.0, 3.0, -4.0, 5.0, 6.0][..])
    );
    let _ = std::fs::remove_file(path);
}

#[test]
fn pickled_dict_is_a_mapping() {
    // pickle.dumps({'a': 1, 'b': [1.5, None]}, protocol=2)
    let path = tmp_file("state.pkl");
    std::fs::write(
        &path,
        b"\x80\x02}q\x00(X\x01\x00\x00\x00aq\x01K\x01\
          X\x01\x00\x00\x00bq\x02]q\x03(G?\xf8\x00\x00\x00\x00\x00\x00Neu.",
    )
    .unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "pickle");
    assert_eq!(record.root.kind, NodeKind::Mapping);
    assert_eq!(record.root.child("a").unwrap().value, Some(Value::Int64(1)));
    let b = record.root.child("b").unwrap();
    assert_eq!(b.kind, NodeKind::Sequence);
    assert_eq!(b.children()[0].value, Some(Value::Float64(1.5)));
    assert_eq!(b.children()[1].value, Some(Value::Null));
    let _ = std::fs::remove_file(path);
}

#[test]
fn corrupt_npy_is_reported() {
    let path = tmp_file("broken.npy");
    std::fs::write(&path, b"\x93NUMPY\x01\x00garbage").unwrap();
    let err = load_file(&path, &LoadOptions::default()).unwrap_err();
    assert_eq!(err.kind(), data_inspector::ErrorKind::CorruptData);
    let _ = std::fs::remove_file(path);
}

#[test]
fn oversized_safetensors_shape_degrades_to_unsupported() {
    let path = tmp_file("huge.safetensors");
    let header = concat!(
        r#"{"huge":{"dtype":"F64","shape":[4611686018427387904,8],"data_offsets":[0,8]},"#,
        r#""ok":{"dtype":"U8","shape":[2],"data_offsets":[8,10]}}"#
    )
    .as_bytes();
    let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
    bytes.extend_from_slice(header);
    bytes.extend_from_slice(&[0u8; 8]);
    bytes.extend_from_slice(&[3, 4]);
    std::fs::write(&path, &bytes).unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.status, LoadStatus::Partial);
    let huge = record.root.child("huge").unwrap();
    assert_eq!(huge.kind, NodeKind::Unsupported);
    assert!(huge.metadata.reason.as_deref().unwrap().contains("too large"));
    let ok = record.root.child("ok").unwrap();
    assert_eq!(ok.kind, NodeKind::Array);
    assert_eq!(ok.sample().as_numeric(), Some(&[3.0, 4.0][..]));
    let _ = std::fs::remove_file(path);
}

#[test]
fn oversized_fits_axes_are_corrupt() {
    let path = tmp_file("huge.fits");
    let cards = [
        "SIMPLE  =                    T",
        "BITPIX  =                  -64",
        "NAXIS   =                    2",
        "NAXIS1  =        1099511627776",
        "NAXIS2  =        1099511627776",
        "END",
    ];
    let mut bytes: Vec<u8> = cards.iter().flat_map(|c| format!("{c:<80}").into_bytes()).collect();
    bytes.resize(2 * 2880, 0);
    std::fs::write(&path, &bytes).unwrap();

    let err = load_file(&path, &LoadOptions::default()).unwrap_err();
    assert_eq!(err.kind(), data_inspector::ErrorKind::CorruptData);
    let _ = std::fs::remove_file(path);
}

#[test]
fn deeply_nested_json_is_cut_at_the_depth_limit() {
    let path = tmp_file("deep.json");
    let depth = 300;
    let text = format!("{}1{}", "[".repeat(depth), "]".repeat(depth));
    std::fs::write(&path, text).unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "json");
    assert_eq!(record.root.kind, NodeKind::Sequence);
    let cut = record
        .root
        .walk()
        .find(|n| n.kind == NodeKind::Unsupported)
        .unwrap();
    assert_eq!(cut.metadata.reason.as_deref(), Some("depth limit exceeded"));
    let _ = std::fs::remove_file(path);
}

fn npy_member(descr: &str, shape: &str, data: &[u8]) -> Vec<u8> {
    let mut dict = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape}, }}");
    while (10 + dict.len() + 1) % 64 != 0 {
        dict.push(' ');
    }
    dict.push('\n');
    let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
    bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    bytes.extend_from_slice(dict.as_bytes());
    bytes.extend_from_slice(data);
    bytes
}

#[test]
fn npz_members_become_a_mapping_of_arrays() {
    use ndarray::ArrayD;
    use ndarray_npy::NpzWriter;

    let path = tmp_file("bundle.npz");
    let mut npz = NpzWriter::new(std::fs::File::create(&path).unwrap());
    let weights = ArrayD::from_shape_vec(vec![2, 2], vec![0.5f64, 1.5, -2.0, 4.0]).unwrap();
    let labels = ArrayD::from_shape_vec(vec![3], vec![1i64, 0, 1]).unwrap();
    npz.add_array("weights", &weights).unwrap();
    npz.add_array("labels", &labels).unwrap();
    npz.finish().unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "npz");
    assert_eq!(record.status, LoadStatus::Complete);
    assert_eq!(record.root.kind, NodeKind::Mapping);
    let w = record.root.child("weights").unwrap();
    assert_eq!(w.kind, NodeKind::Array);
    assert_eq!(w.metadata.shape, vec![2, 2]);
    assert_eq!(w.metadata.element_type, Some(ElementType::Float64));
    let l = record.root.child("labels").unwrap();
    assert_eq!(l.metadata.element_type, Some(ElementType::Int64));
    assert_eq!(record.stats(l).unwrap().max, 1.0);
    let _ = std::fs::remove_file(path);
}

#[test]
fn npz_member_with_unsupported_dtype_is_kept_as_unsupported() {
    use ndarray::ArrayD;
    use ndarray_npy::WriteNpyExt;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let path = tmp_file("mixed.npz");
    let mut plain = Vec::new();
    ArrayD::from_shape_vec(vec![2], vec![7u8, 9])
        .unwrap()
        .write_npy(&mut plain)
        .unwrap();
    let complex = npy_member("<c16", "(1,)", &[0u8; 16]);

    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file("plain.npy", options).unwrap();
    zip.write_all(&plain).unwrap();
    zip.start_file("complex.npy", options).unwrap();
    zip.write_all(&complex).unwrap();
    zip.finish().unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "npz");
    assert_eq!(record.status, LoadStatus::Partial);
    assert_eq!(record.root.child("plain").unwrap().kind, NodeKind::Array);
    let complex = record.root.child("complex").unwrap();
    assert_eq!(complex.kind, NodeKind::Unsupported);
    assert!(record.warnings.iter().any(|w| w.contains("complex")));
    let _ = std::fs::remove_file(path);
}

/// `torch.save({'w': torch.tensor([1.0, -2.0, 0.25])}, path)` reduced to its essentials:
/// one persistent float storage rebuilt by `_rebuild_tensor_v2`.
const TORCH_STATE_PICKLE: &[u8] = b"\x80\x02}X\x01\x00\x00\x00wctorch._utils\n_rebuild_tensor_v2\n\
((X\x07\x00\x00\x00storagectorch\nFloatStorage\nX\x01\x00\x00\x000X\x03\x00\x00\x00cpuK\x03tQ\
K\x00K\x03\x85K\x01\x85\x89}tRs.";

#[test]
fn torch_checkpoint_tensors_are_rebuilt() {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let path = tmp_file("model.pt");
    let mut storage = Vec::new();
    for f in [1.0f32, -2.0, 0.25] {
        storage.extend_from_slice(&f.to_le_bytes());
    }
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file("model/data.pkl", options).unwrap();
    zip.write_all(TORCH_STATE_PICKLE).unwrap();
    zip.start_file("model/data/0", options).unwrap();
    zip.write_all(&storage).unwrap();
    zip.finish().unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "torch");
    assert_eq!(record.status, LoadStatus::Complete);
    assert_eq!(record.root.kind, NodeKind::Mapping);
    let w = record.root.child("w").unwrap();
    assert_eq!(w.kind, NodeKind::Array);
    assert_eq!(w.metadata.shape, vec![3]);
    assert_eq!(w.metadata.element_type, Some(ElementType::Float32));
    assert_eq!(w.sample().as_numeric(), Some(&[1.0, -2.0, 0.25][..]));
    assert_eq!(record.attributes.get("tensors").map(String::as_str), Some("1"));
    assert_eq!(record.attributes.get("archive").map(String::as_str), Some("model"));
    let _ = std::fs::remove_file(path);
}

#[test]
fn csv_rows_past_the_limit_are_counted_but_not_kept() {
    let path = tmp_file("long.csv");
    let mut text = String::from("n,label\n");
    for i in 0..10 {
        text.push_str(&format!("{i},row{i}\n"));
    }
    std::fs::write(&path, text).unwrap();

    let opts = LoadOptions {
        limits: Limits {
            max_rows: 4,
            ..Limits::default()
        },
        ..LoadOptions::default()
    };
    let record = load_file(&path, &opts).unwrap();
    assert_eq!(record.attributes.get("rows").map(String::as_str), Some("10"));
    assert!(record.root.is_truncated());
    assert_eq!(record.root.metadata.shape, vec![4, 2]);

    let n = record.root.child("n").unwrap();
    assert_eq!(n.sample().as_numeric(), Some(&[0.0, 1.0, 2.0, 3.0][..]));
    assert_eq!(n.metadata.original_extent.as_ref().unwrap().elements, 10);

    let _ = std::fs::remove_file(&path);
}

/// A level 5 MAT-file holding one real double matrix, values in column-major order.
fn mat_v5_double(name: &str, rows: i32, cols: i32, values: &[f64]) -> Vec<u8> {
    fn tag(out: &mut Vec<u8>, data_type: u32, len: usize) {
        out.extend_from_slice(&data_type.to_le_bytes());
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }

    let mut body = Vec::new();
    tag(&mut body, 6, 8);
    body.extend_from_slice(&6u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    tag(&mut body, 5, 8);
    body.extend_from_slice(&rows.to_le_bytes());
    body.extend_from_slice(&cols.to_le_bytes());
    tag(&mut body, 1, name.len());
    body.extend_from_slice(name.as_bytes());
    body.resize(body.len() + (8 - name.len() % 8) % 8, 0);
    tag(&mut body, 9, values.len() * 8);
    for v in values {
        body.extend_from_slice(&v.to_le_bytes());
    }

    let text = "MATLAB 5.0 MAT-file, written by data-inspector tests";
    let mut out = format!("{text:<116}").into_bytes();
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&0x0100u16.to_le_bytes());
    out.extend_from_slice(b"IM");
    tag(&mut out, 14, body.len());
    out.extend_from_slice(&body);
    out
}

#[test]
fn mat_variables_become_a_mapping_of_arrays() {
    let path = tmp_file("vars.mat");
    let bytes = mat_v5_double("grid", 2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    std::fs::write(&path, bytes).unwrap();

    let record = load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(record.format_tag, "mat");
    assert_eq!(record.status, LoadStatus::Complete);
    assert_eq!(record.root.kind, NodeKind::Mapping);
    assert_eq!(record.attributes.get("variables").map(String::as_str), Some("1"));

    let grid = record.root.child("grid").unwrap();
    assert_eq!(grid.kind, NodeKind::Array);
    assert_eq!(grid.metadata.shape, vec![2, 3]);
    assert_eq!(grid.metadata.element_type, Some(ElementType::Float64));
    assert_eq!(
        grid.sample().as_numeric(),
        Some(&[1.0, 3.0, 5.0, 2.0, 4.0, 6.0][..])
    );
    let _ = std::fs::remove_file(path);
}

#[test]
fn mat_v73_files_are_unsupported() {
    let path = tmp_file("hdf5-backed.mat");
    let mut bytes = format!("{:<116}", "MATLAB 7.3 MAT-file, Platform: GLNXA64").into_bytes();
    bytes.resize(512, 0);
    std::fs::write(&path, bytes).unwrap();

    let err = load_file(&path, &LoadOptions::default()).unwrap_err();
    assert_eq!(err.kind(), data_inspector::ErrorKind::FormatUnsupported);
    assert!(err.to_string().contains("HDF5"));
    let _ = std::fs::remove_file(path);
}
