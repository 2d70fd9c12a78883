//! Proxy configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 9090;

/// Default timeout for upstream fetches.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable naming the root directory.
pub const ROOT_ENV_VAR: &str = "IMPSERVE";

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// Root directory; static content is served from here.
    pub root_dir: PathBuf,
    /// Directories scanned for books.
    pub shelf_dirs: Vec<PathBuf>,
    /// Directory holding plugin files.
    pub plugin_dir: PathBuf,
    /// Optional `mime.types` file merged into the MIME table.
    pub mime_types: PathBuf,
    /// Timeout for upstream fetches.
    pub upstream_timeout: Duration,
}

impl ProxyConfig {
    /// Creates a configuration rooted at `root_dir`.
    ///
    /// Books are read from `<root>/shelf`, plugins from `<root>/plugins` and
    /// extra MIME types from `<root>/mime.types`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PROXY_PORT)),
            shelf_dirs: vec![root_dir.join("shelf")],
            plugin_dir: root_dir.join("plugins"),
            mime_types: root_dir.join("mime.types"),
            root_dir,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    /// Creates a configuration rooted at [`default_root_dir`].
    pub fn from_env() -> Self {
        Self::new(default_root_dir())
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port, keeping the host.
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Adds a shelf directory after the default one.
    pub fn with_shelf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shelf_dirs.push(dir.into());
        self
    }

    /// Sets the plugin directory.
    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dir = dir.into();
        self
    }

    /// Sets the upstream timeout.
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }
}

/// Resolves the root directory.
///
/// In order: `$IMPSERVE`, `~/.impserve`, `%APPDATA%\impserve` (Windows),
/// the executable's directory, the current directory.
pub fn default_root_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(ROOT_ENV_VAR) {
        let dir = PathBuf::from(dir);
        return std::path::absolute(&dir).unwrap_or(dir);
    }

    let base = BaseDirs::new();
    let mut candidates = Vec::new();
    if let Some(base) = &base {
        candidates.push(base.home_dir().join(".impserve"));
        if cfg!(windows) {
            candidates.push(base.config_dir().join("impserve"));
        }
    }
    if let Some(dir) = first_dir(&candidates) {
        return dir.to_path_buf();
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn first_dir(candidates: &[PathBuf]) -> Option<&Path> {
    candidates
        .iter()
        .find(|dir| dir.is_dir())
        .map(PathBuf::as_path)
}
