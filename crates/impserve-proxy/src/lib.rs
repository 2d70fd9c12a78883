//! impserve proxy - HTTP proxy for an ebook reader.
//!
//! The reader sends every request through this proxy. Requests for the
//! `.ebooksystem.net` pseudo-domain are answered from disk; everything else is
//! fetched from the real server, passed through the plugin pipeline and
//! relayed back.
//!
//! ## Architecture
//!
//! ```text
//! Client Request → route_request → GET/POST with http URL?
//!                                           │
//!                         ┌─────────────────┴─────────────────┐
//!                         │ .ebooksystem.net                  │ other host
//!                         ▼                                   ▼
//!                    handle_local                     URL transformers
//!                         │                                   │
//!     booklist / getbook / content / redirect / back    fetch upstream
//!                                                             │
//!                                                    Response transformers
//!                                                             │
//!                                                  relay + remember HTML page
//! ```

pub mod config;
mod error;
pub mod forward;
pub mod local;
pub mod router;
mod server;
mod state;

pub use config::{default_root_dir, ProxyConfig, DEFAULT_PROXY_PORT, DEFAULT_UPSTREAM_TIMEOUT};
pub use error::{ForwardError, ProxyError, Result, ServerError};
pub use forward::UpstreamResponse;
pub use local::{
    BOOKLIST_PREFIX, BOOK_PREFIX, CONTENT_PREFIX, LOCAL_DOMAIN, REDIRECT_PREFIX,
};
pub use router::{classify, router, Route};
pub use server::{ProxyHandle, ProxyServer};
pub use state::ShelfState;

/// User agent sent upstream.
pub const USER_AGENT: &str = concat!("impserve/", env!("CARGO_PKG_VERSION"));
