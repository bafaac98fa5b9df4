//! sci-inspect - print the inspection tree of a data file
//!
//! Usage:
//!   cargo run --features cli --bin sci-inspect -- weights.npz --stats
//!   RUST_LOG=debug cargo run --features cli --bin sci-inspect -- table.dat --format csv

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use data_inspector::execution::{Inspector, LoadOptions};
use data_inspector::{DataNode, FileRecord, InspectorConfig, NodeKind};

#[derive(Parser)]
#[command(name = "sci-inspect")]
#[command(about = "Inspect the structure of a data file")]
struct Cli {
    /// File to inspect
    path: Option<PathBuf>,

    /// Format tag that bypasses detection (npy, csv, fits, ...)
    #[arg(short, long)]
    format: Option<String>,

    /// Maximum nesting depth
    #[arg(long)]
    max_depth: Option<usize>,

    /// Print statistics for numeric leaves
    #[arg(short, long)]
    stats: bool,

    /// TOML config with [limits], [stats] and [execution] sections
    #[arg(long)]
    config: Option<PathBuf>,

    /// List supported formats and exit
    #[arg(long)]
    list_formats: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(p) => InspectorConfig::from_path(p)?,
        None => InspectorConfig::default(),
    };
    let inspector = Inspector::new(config.execution.clone())?;

    if cli.list_formats {
        for info in inspector.list_supported_formats() {
            println!(
                "{:<12} {:<28} {}",
                info.format_tag,
                info.extensions.join(","),
                info.description
            );
        }
        return Ok(());
    }
    let Some(path) = cli.path else {
        return Err("missing <PATH> (or pass --list-formats)".into());
    };

    let mut opts: LoadOptions = config.load_options();
    opts.format = cli.format;
    if let Some(d) = cli.max_depth {
        opts.limits.max_depth = d;
    }

    let record = inspector.load(&path, opts)?;
    println!(
        "{} [{} via {}] {} bytes, {} nodes, {} ms, {:?}",
        record.path.display(),
        record.format_tag,
        record.loader_used,
        record.file_size_bytes,
        record.node_count(),
        record.load_duration_ms,
        record.status
    );
    for (k, v) in &record.attributes {
        println!("  @{k} = {v}");
    }
    print_node(&record, &record.root, 0, cli.stats);
    for w in &record.warnings {
        println!("warning: {w}");
    }
    log::debug!("{}", inspector.metrics().snapshot());
    Ok(())
}

fn print_node(record: &FileRecord, node: &DataNode, depth: usize, stats: bool) {
    let indent = "  ".repeat(depth);
    let key = if node.key.is_empty() { "/" } else { node.key.as_str() };
    let mut line = format!("{indent}{key}: {}", node.kind);
    if !node.metadata.shape.is_empty() {
        line.push_str(&format!(" {:?}", node.metadata.shape));
    }
    if let Some(t) = node.metadata.element_type {
        line.push_str(&format!(" {t}"));
    }
    if let Some(v) = &node.value {
        line.push_str(&format!(" = {v:?}"));
    }
    if let Some(ext) = node.metadata.original_extent.as_ref().filter(|_| node.is_truncated()) {
        line.push_str(&format!(" (truncated from {:?}, {} elements)", ext.shape, ext.elements));
    }
    if node.kind == NodeKind::Unsupported {
        if let Some(reason) = &node.metadata.reason {
            line.push_str(&format!(" ({reason})"));
        }
    }
    println!("{line}");

    if stats && matches!(node.kind, NodeKind::Array) {
        if let Ok(s) = record.stats(node) {
            println!(
                "{indent}  mean={:.6} std={:.6} min={} max={} n={}{}",
                s.mean,
                s.std_dev,
                s.min,
                s.max,
                s.count,
                if s.sampled { " (sampled)" } else { "" }
            );
        }
    }
    if stats && node.kind == NodeKind::Table {
        for col in node.children() {
            if let Ok(s) = record.stats(col) {
                println!(
                    "{indent}  {}: mean={:.6} min={} max={} n={}",
                    col.key, s.mean, s.min, s.max, s.count
                );
            }
        }
    }
    if node.kind != NodeKind::Table {
        for child in node.children() {
            print_node(record, child, depth + 1, stats);
        }
    }
}
