//! Format resolution.
//!
//! A [`FormatRegistry`] maps a file to the [`LoaderPlugin`] that reads it. It is built once and
//! shared by `Arc`; resolution is a pure lookup over the registered plugins.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::error::{LoadError, LoadResult};

use super::plugin::{LoaderPlugin, extension_of};
use super::{
    config, csv, fits, image, json, matlab, mesh, npy, parquet, pickle, safetensors, torch,
};

/// Number of leading bytes read for signature sniffing.
pub const PEEK_LEN: usize = 512;

/// Extensions of formats that need native libraries and are not loadable.
const NATIVE_ONLY: &[(&str, &str)] = &[
    ("h5", "HDF5 files require the native HDF5 library"),
    ("hdf5", "HDF5 files require the native HDF5 library"),
    ("nc", "NetCDF files require the native NetCDF library"),
];

/// A registered format, as listed by [`FormatRegistry::supported_formats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatInfo {
    pub format_tag: &'static str,
    pub extensions: Vec<&'static str>,
    pub description: &'static str,
}

/// The set of loader plugins available to an [`crate::execution::Inspector`].
pub struct FormatRegistry {
    plugins: Vec<Arc<dyn LoaderPlugin>>,
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("formats", &self.plugins.iter().map(|p| p.format_tag()).collect::<Vec<_>>())
            .finish()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_builtin_plugins()
    }
}

impl FormatRegistry {
    /// Registry with every built-in plugin (spreadsheets only with the `excel` feature).
    pub fn with_builtin_plugins() -> Self {
        Self::builder().builtin_plugins().build()
    }

    pub fn builder() -> FormatRegistryBuilder {
        FormatRegistryBuilder::default()
    }

    /// Registered formats in registration order.
    pub fn supported_formats(&self) -> Vec<FormatInfo> {
        self.plugins
            .iter()
            .map(|p| FormatInfo {
                format_tag: p.format_tag(),
                extensions: p.extensions().to_vec(),
                description: p.description(),
            })
            .collect()
    }

    /// Plugin registered under `format_tag`.
    pub fn get(&self, format_tag: &str) -> Option<&dyn LoaderPlugin> {
        self.plugins
            .iter()
            .find(|p| p.format_tag().eq_ignore_ascii_case(format_tag))
            .map(|p| p.as_ref())
    }

    /// Select the plugin for `path`.
    ///
    /// Order: explicit `format_override`, then an extension match the plugin accepts, then
    /// content sniffing over all plugins with a signature. A file whose extension is known but
    /// whose content matches no signature goes to the extension's plugin, which reports why the
    /// bytes do not parse.
    pub fn resolve(
        &self,
        path: &Path,
        peeked: &[u8],
        format_override: Option<&str>,
    ) -> LoadResult<&dyn LoaderPlugin> {
        if let Some(tag) = format_override {
            return self.get(tag).ok_or_else(|| LoadError::FormatUnsupported {
                path: path.to_path_buf(),
                reason: format!("unknown format '{tag}'"),
            });
        }

        let ext = extension_of(path);
        let mut by_extension: Option<&dyn LoaderPlugin> = None;
        if let Some(ext) = ext.as_deref() {
            for plugin in self.plugins.iter().map(|p| p.as_ref()) {
                if !plugin.extensions().iter().any(|e| e.eq_ignore_ascii_case(ext)) {
                    continue;
                }
                if plugin.can_handle(peeked, Some(ext)) {
                    log::debug!(
                        "{}: resolved to {} by extension",
                        path.display(),
                        plugin.format_tag()
                    );
                    return Ok(plugin);
                }
                by_extension.get_or_insert(plugin);
            }
        }

        if !peeked.is_empty() {
            if let Some(plugin) = self
                .plugins
                .iter()
                .map(|p| p.as_ref())
                .find(|p| p.has_signature() && p.sniff(peeked))
            {
                log::debug!("{}: resolved to {} by signature", path.display(), plugin.format_tag());
                return Ok(plugin);
            }
        }

        if let Some(plugin) = by_extension {
            log::debug!(
                "{}: signature mismatch, falling back to {}",
                path.display(),
                plugin.format_tag()
            );
            return Ok(plugin);
        }

        let reason = match ext.as_deref() {
            Some(ext) => NATIVE_ONLY
                .iter()
                .find(|(e, _)| *e == ext)
                .map(|(_, why)| why.to_string())
                .unwrap_or_else(|| {
                    format!("no loader for extension '.{ext}' and no known signature")
                }),
            None => "no extension and no known signature".to_string(),
        };
        Err(LoadError::FormatUnsupported {
            path: path.to_path_buf(),
            reason,
        })
    }
}

/// Builder for a [`FormatRegistry`].
#[derive(Default)]
pub struct FormatRegistryBuilder {
    plugins: Vec<Arc<dyn LoaderPlugin>>,
}

impl FormatRegistryBuilder {
    /// Append a plugin; earlier registrations win ties.
    pub fn register<P: LoaderPlugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn register_arc(mut self, plugin: Arc<dyn LoaderPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Register the built-in plugins, binary signatures first.
    pub fn builtin_plugins(self) -> Self {
        let b = self
            .register(npy::NpyPlugin)
            .register(npy::NpzPlugin)
            .register(parquet::ParquetPlugin)
            .register(safetensors::SafetensorsPlugin)
            .register(torch::TorchPlugin)
            .register(pickle::PicklePlugin)
            .register(fits::FitsPlugin)
            .register(matlab::MatPlugin)
            .register(image::ImagePlugin)
            .register(mesh::PlyPlugin)
            .register(mesh::OffPlugin)
            .register(mesh::StlPlugin)
            .register(mesh::ObjPlugin)
            .register(mesh::XyzPlugin);
        #[cfg(feature = "excel")]
        let b = b.register(super::excel::ExcelPlugin);
        b.register(json::JsonPlugin)
            .register(config::YamlPlugin)
            .register(config::TomlPlugin)
            .register(csv::CsvPlugin::csv())
            .register(csv::CsvPlugin::tsv())
    }

    pub fn build(self) -> FormatRegistry {
        FormatRegistry { plugins: self.plugins }
    }
}

/// Read up to [`PEEK_LEN`] leading bytes of `path`.
pub fn peek_file(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(PEEK_LEN);
    File::open(path)?.take(PEEK_LEN as u64).read_to_end(&mut buf)?;
    Ok(buf)
}
