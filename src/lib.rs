//! `data-inspector` opens scientific and general-purpose data files and exposes their contents as
//! one format-independent tree of [`model::DataNode`]s, with bounded previews and lazily computed
//! statistics.
//!
//! A load resolves a loader plugin for the file ([`ingestion::FormatRegistry`]), lets the plugin
//! read the file into a [`types::NativeValue`], and normalizes that value into a tree
//! ([`normalize::Normalizer`]) while enforcing size and depth limits and breaking reference
//! cycles. The result is an immutable [`model::FileRecord`].
//!
//! ## What you can open
//!
//! - **Tables**: `.csv`, `.tsv`, `.parquet`/`.pq`, and with the Cargo feature `excel`:
//!   `.xlsx`, `.xls`, `.xlsm`, `.xlsb`, `.ods`
//! - **Structured text**: `.json`, `.yaml`/`.yml`, `.toml`
//! - **Arrays and tensors**: `.npy`, `.npz`, `.safetensors`, `.pkl`/`.pickle`, `.pt`/`.pth`
//! - **Meshes and point clouds**: `.obj`, `.off`, `.ply` (ASCII), `.stl`, `.xyz`/`.pts`
//! - **Images**: `.png`, `.jpg`/`.jpeg`, `.tif`/`.tiff`, `.bmp`, `.gif`, `.webp`
//! - **Astronomy**: `.fits`/`.fit`/`.fts` (primary HDU)
//! - **MATLAB**: `.mat` (level 5 numeric variables)
//!
//! Files with a misleading extension are still recognized when their content carries a
//! signature (NumPy magic, zip archives, PNG, FITS `SIMPLE`, ...). `.h5` and `.nc` files and
//! v7.3 `.mat` files are reported as [`LoadError::FormatUnsupported`] with a reason.
//!
//! ## Synchronous loading
//!
//! ```no_run
//! use data_inspector::execution::{LoadOptions, load_file};
//!
//! # fn main() -> Result<(), data_inspector::LoadError> {
//! let record = load_file("experiment.npz", &LoadOptions::default())?;
//! for node in record.root.walk() {
//!     println!("{} {} {:?}", node.key, node.kind, node.metadata.shape);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrent loading with progress
//!
//! ```no_run
//! use data_inspector::execution::{ExecutionOptions, Inspector, LoadOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let inspector = Inspector::new(ExecutionOptions::default())?;
//! let handle = inspector.begin_load("model.safetensors", LoadOptions::default());
//! for event in handle.subscribe_progress() {
//!     println!("{} {:.0}%", event.stage, event.percent);
//! }
//! let record = handle.get_result()?;
//! if let Some(weights) = record.root.find("encoder.weight") {
//!     let stats = record.stats(weights)?;
//!     println!("mean={} std={}", stats.mean, stats.std_dev);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: format registry, loader plugins and load observers
//! - [`normalize`]: tree construction, limits and truncation
//! - [`model`]: the [`model::DataNode`] tree and [`model::FileRecord`]
//! - [`stats`]: the statistics engine
//! - [`execution`]: the load pipeline, [`execution::Inspector`], progress and metrics
//! - [`config`]: TOML configuration
//! - [`types`]: loader-side value types
//! - [`error`]: error types

pub mod config;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod model;
pub mod normalize;
pub mod stats;
pub mod types;

pub use config::InspectorConfig;
pub use error::{ConfigError, ErrorKind, LoadError, LoadResult, StatsError};
pub use execution::{
    CancellationToken, ExecutionOptions, Inspector, LoadHandle, LoadOptions, LoadState, load_file,
};
pub use ingestion::{FormatInfo, FormatRegistry};
pub use model::{DataNode, FileRecord, LoadStatus, NodeKind};
pub use normalize::Limits;
pub use stats::{StatisticsEngine, StatsOptions, StatsResult};
