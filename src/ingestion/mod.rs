//! Format detection and loader plugins.
//!
//! A [`FormatRegistry`] selects a [`LoaderPlugin`] for a file (by explicit format tag, by
//! extension, or by content signature); the plugin reads the file into a
//! [`crate::types::NativeValue`]. Built-in plugins live in one module per format family:
//!
//! - [`csv`] (`csv`, `tsv`), [`json`], [`config`] (`yaml`, `toml`), [`parquet`]
//! - `excel` (requires the Cargo feature `excel`)
//! - [`npy`] (`npy`, `npz`), [`safetensors`], [`pickle`], [`torch`]
//! - [`mesh`] (`obj`, `off`, `ply`, `stl`, `xyz`), [`image`], [`fits`], [`matlab`] (`mat`)
//!
//! [`observability`] holds the observer hooks the load pipeline reports outcomes to.

pub mod config;
pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod fits;
pub mod image;
pub mod json;
pub mod matlab;
pub mod mesh;
pub mod npy;
pub mod observability;
pub mod parquet;
pub mod pickle;
pub mod plugin;
pub mod registry;
pub mod safetensors;
pub mod torch;

pub use observability::{
    CompositeObserver, FileObserver, IngestionSeverity, LoadObserver, LoadStats, LoadTarget,
    LogObserver,
};
pub use plugin::{LoadContext, Loaded, LoaderPlugin};
pub use registry::{FormatInfo, FormatRegistry, FormatRegistryBuilder, PEEK_LEN, peek_file};
