//! Error types for the core crate.

use thiserror::Error;

/// Errors that can occur while loading a plugin file.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid plugin TOML.
    #[error("invalid plugin file: {0}")]
    Toml(#[from] toml::de::Error),

    /// A URL or body pattern is not a valid regex.
    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// A header name or value is not valid HTTP.
    #[error("invalid header: {0}")]
    Header(String),
}

/// Result type for plugin loading.
pub type Result<T> = std::result::Result<T, PluginError>;
