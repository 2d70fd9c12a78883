//! Ordered, immutable plugin registry.

use std::fmt;
use std::path::Path;

use bytes::Bytes;
use http::HeaderMap;

use super::rules::load_plugin_file;
use super::{ResponseTransformer, UrlTransformer};
use crate::error::PluginError;

/// File extension (lowercase) of plugin files.
pub const PLUGIN_EXTENSION: &str = ".toml";

/// Outcome of scanning a plugin directory.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Files that loaded, in load order.
    pub loaded: Vec<String>,
    /// Files that failed, with the reason.
    pub failed: Vec<(String, PluginError)>,
}

/// The registered transformers, in registration order.
///
/// Built once at startup through [`PluginRegistryBuilder`] and read-only
/// afterwards, so it can be shared between connections without locking.
#[derive(Default)]
pub struct PluginRegistry {
    url: Vec<Box<dyn UrlTransformer>>,
    response: Vec<Box<dyn ResponseTransformer>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("url", &self.url.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field(
                "response",
                &self.response.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PluginRegistry {
    /// Creates a registry with no transformers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Starts building a registry.
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::default()
    }

    /// Loads every plugin file in `dir`.
    pub fn load_from(dir: &Path) -> (Self, LoadReport) {
        let mut builder = Self::builder();
        let report = builder.load_dir(dir);
        (builder.build(), report)
    }

    /// Registered URL transformers.
    pub fn url_transformers(&self) -> &[Box<dyn UrlTransformer>] {
        &self.url
    }

    /// Registered response transformers.
    pub fn response_transformers(&self) -> &[Box<dyn ResponseTransformer>] {
        &self.response
    }

    /// Runs `url` through every URL transformer.
    pub fn rewrite_url(&self, url: &str) -> String {
        self.url.iter().fold(url.to_string(), |url, transformer| {
            let next = transformer.transform(&url);
            if next != url {
                tracing::debug!("{} rewrote {} -> {}", transformer.name(), url, next);
            }
            next
        })
    }

    /// Runs a response through every response transformer.
    pub fn rewrite_response(&self, url: &str, headers: HeaderMap, body: Bytes) -> (HeaderMap, Bytes) {
        self.response
            .iter()
            .fold((headers, body), |(headers, body), transformer| {
                transformer.transform(url, headers, body)
            })
    }

    /// Returns true if no transformer is registered.
    pub fn is_empty(&self) -> bool {
        self.url.is_empty() && self.response.is_empty()
    }
}

/// Collects transformers before freezing them into a [`PluginRegistry`].
#[derive(Default)]
pub struct PluginRegistryBuilder {
    url: Vec<Box<dyn UrlTransformer>>,
    response: Vec<Box<dyn ResponseTransformer>>,
}

impl PluginRegistryBuilder {
    /// Appends a URL transformer.
    pub fn url_transformer(mut self, transformer: impl UrlTransformer + 'static) -> Self {
        self.url.push(Box::new(transformer));
        self
    }

    /// Appends a response transformer.
    pub fn response_transformer(
        mut self,
        transformer: impl ResponseTransformer + 'static,
    ) -> Self {
        self.response.push(Box::new(transformer));
        self
    }

    /// Loads every `*.toml` file in `dir`, sorted by file name.
    ///
    /// A missing directory loads nothing. A file that fails to load is
    /// logged, recorded in the report and skipped.
    pub fn load_dir(&mut self, dir: &Path) -> LoadReport {
        let mut report = LoadReport::default();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("No plugins loaded from {}: {}", dir.display(), e);
                return report;
            }
        };

        let mut files: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_lowercase().ends_with(PLUGIN_EXTENSION))
                        .unwrap_or(false)
            })
            .collect();
        files.sort();

        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match load_plugin_file(&path) {
                Ok(plugin) => {
                    tracing::info!(
                        "Loaded plugin: {} ({} url, {} response)",
                        name,
                        plugin.url.len(),
                        plugin.response.len()
                    );
                    for rewrite in plugin.url {
                        self.url.push(Box::new(rewrite));
                    }
                    for rewrite in plugin.response {
                        self.response.push(Box::new(rewrite));
                    }
                    report.loaded.push(name);
                }
                Err(e) => {
                    tracing::warn!("Unexpected error while loading {}: {}", name, e);
                    report.failed.push((name, e));
                }
            }
        }

        report
    }

    /// Freezes the registry.
    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            url: self.url,
            response: self.response,
        }
    }
}
