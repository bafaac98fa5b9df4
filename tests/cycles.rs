use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use data_inspector::execution::{LoadOptions, load_file};
use data_inspector::model::NodeKind;
use data_inspector::normalize::Limits;

fn tmp_file(name: &str, contents: &[u8]) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let path = std::env::temp_dir().join(format!("data-inspector-cycles-{nanos}-{name}"));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn self_referential_list_is_finite() {
    // l = []; l.append(l); pickle.dumps(l, protocol=2)
    let path = tmp_file("self.pkl", b"\x80\x02]q\x00h\x00a.");
    let record = load_file(&path, &LoadOptions::default()).unwrap();

    assert_eq!(record.root.kind, NodeKind::Sequence);
    assert_eq!(record.node_count(), 2);
    let inner = &record.root.children()[0];
    assert_eq!(inner.kind, NodeKind::Unsupported);
    assert_eq!(inner.metadata.reason.as_deref(), Some("cyclic reference"));
    assert!(record.warnings.iter().any(|w| w.contains("cyclic reference")));
    let _ = std::fs::remove_file(path);
}

#[test]
fn deep_nesting_stops_at_the_depth_limit() {
    let mut json = String::new();
    for _ in 0..10 {
        json.push_str("{\"n\":");
    }
    json.push('1');
    for _ in 0..10 {
        json.push('}');
    }
    let path = tmp_file("deep.json", json.as_bytes());
    let opts = LoadOptions {
        limits: Limits {
            max_depth: 3,
            ..Limits::default()
        },
        ..LoadOptions::default()
    };
    let record = load_file(&path, &opts).unwrap();

    let cut = record.root.find("n/n/n/n").unwrap();
    assert_eq!(cut.kind, NodeKind::Unsupported);
    assert_eq!(cut.metadata.reason.as_deref(), Some("depth limit exceeded"));
    assert!(cut.children().is_empty());
    assert_eq!(record.node_count(), 5);
    let _ = std::fs::remove_file(path);
}
