//! impserve core - bookshelf catalog, page history, MIME table and the
//! plugin pipeline.
//!
//! This crate holds everything the proxy needs that does not touch the
//! network:
//!
//! - [`catalog`] parses IMP book headers and keeps the shelf catalog fresh
//! - [`booklist`] renders the catalog in the device's listing format
//! - [`history`] remembers recently forwarded HTML pages for "back"
//! - [`mime`] guesses content types from file names
//! - [`plugin`] holds the URL and response transformer contracts

pub mod booklist;
pub mod catalog;
pub mod error;
pub mod history;
pub mod mime;
pub mod plugin;

pub use booklist::{render_booklist, BOOKLIST_CONTENT_TYPE};
pub use catalog::{parse_record, refresh, Catalog, EbookRecord, IMP_MAGIC};
pub use error::{PluginError, Result};
pub use history::{RecentUrls, URL_HISTORY_MAX};
pub use mime::{MimeTable, DEFAULT_CONTENT_TYPE, SOFTBOOK_CONTENT_TYPE};
pub use plugin::{
    LoadReport, PluginRegistry, PluginRegistryBuilder, ResponseTransformer, UrlTransformer,
};

/// Version string logged at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
