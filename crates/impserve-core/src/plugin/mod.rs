//! Plugin pipeline for forwarded traffic.
//!
//! Two extension points let plugins rewrite what the proxy forwards:
//!
//! - [`UrlTransformer`] rewrites the outgoing URL before it is fetched.
//! - [`ResponseTransformer`] rewrites the headers and body coming back.
//!
//! Every registered transformer runs, in registration order, each one
//! consuming the previous one's output.
//!
//! # Plugin files
//!
//! Plugins are TOML files in the plugin directory (`<root>/plugins`), loaded
//! once at startup in file-name order:
//!
//! ```toml
//! [[url]]
//! pattern = "^http://www\\.example\\.com/"
//! replace = "http://m.example.com/"
//!
//! [[response]]
//! url_pattern = "example\\.com"
//! content_type = "text/html"
//! remove_headers = ["X-Frame-Options"]
//! set_headers = { "Cache-Control" = "no-cache" }
//! body_pattern = "(?s)<script.*?</script>"
//! body_replace = ""
//! ```
//!
//! A file that fails to load is reported and skipped.

mod registry;
mod rules;

use bytes::Bytes;
use http::HeaderMap;

pub use registry::{LoadReport, PluginRegistry, PluginRegistryBuilder};
pub use rules::{
    load_plugin_file, LoadedPlugin, PluginFile, ResponseRewrite, ResponseRule, UrlRewrite, UrlRule,
};

/// Rewrites the URL of a forwarded request.
pub trait UrlTransformer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Returns the URL to fetch instead of `url`.
    fn transform(&self, url: &str) -> String;
}

/// Rewrites the response of a forwarded request.
pub trait ResponseTransformer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Returns the headers and body to relay instead of the given ones.
    ///
    /// `url` is the URL that was actually fetched.
    fn transform(&self, url: &str, headers: HeaderMap, body: Bytes) -> (HeaderMap, Bytes);
}
