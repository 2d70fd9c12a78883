//! Shared state for the request handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use impserve_core::{refresh, Catalog, MimeTable, PluginRegistry, RecentUrls, SOFTBOOK_CONTENT_TYPE};
use parking_lot::{Mutex, RwLock};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result, ServerError};
use crate::USER_AGENT;

/// State shared by every connection.
///
/// Cloning is cheap; all clones see the same catalog and history.
#[derive(Clone)]
pub struct ShelfState {
    /// Root directory for static content.
    pub root_dir: Arc<PathBuf>,
    /// Directories scanned for books.
    pub shelf_dirs: Arc<Vec<PathBuf>>,
    /// Book catalog, replaced wholesale on every refresh.
    pub catalog: Arc<RwLock<Arc<Catalog>>>,
    /// Recently forwarded HTML pages.
    pub history: Arc<Mutex<RecentUrls>>,
    /// URL and response transformers.
    pub plugins: Arc<PluginRegistry>,
    /// Extension to content type table.
    pub mime: Arc<MimeTable>,
    /// Client used for upstream fetches. Redirects are relayed to the
    /// reader rather than followed.
    pub client: reqwest::Client,
}

impl std::fmt::Debug for ShelfState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShelfState")
            .field("root_dir", &self.root_dir)
            .field("shelf_dirs", &self.shelf_dirs)
            .field("books", &self.catalog.read().len())
            .field("history", &self.history.lock().len())
            .field("plugins", &self.plugins)
            .finish()
    }
}

impl ShelfState {
    /// Creates state from a configuration and prebuilt plugin and MIME tables.
    pub fn new(
        config: &ProxyConfig,
        plugins: PluginRegistry,
        mime: MimeTable,
    ) -> std::result::Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.upstream_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;

        Ok(Self {
            root_dir: Arc::new(config.root_dir.clone()),
            shelf_dirs: Arc::new(config.shelf_dirs.clone()),
            catalog: Arc::new(RwLock::new(Arc::new(Catalog::new()))),
            history: Arc::new(Mutex::new(RecentUrls::new())),
            plugins: Arc::new(plugins),
            mime: Arc::new(mime),
            client,
        })
    }

    /// Creates state from a configuration, loading the MIME table and plugins
    /// from disk.
    pub fn from_config(config: &ProxyConfig) -> std::result::Result<Self, ServerError> {
        let mime = load_mime_table(&config.mime_types);

        let (plugins, report) = PluginRegistry::load_from(&config.plugin_dir);
        tracing::info!(
            "Plugins: {} loaded, {} failed from {}",
            report.loaded.len(),
            report.failed.len(),
            config.plugin_dir.display()
        );

        Self::new(config, plugins, mime)
    }

    /// Returns the current catalog without refreshing it.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.read().clone()
    }

    /// Rescans the shelf directories and returns the new catalog.
    ///
    /// The write lock is held for the whole scan, so concurrent refreshes
    /// run one after the other and readers never see a partial map.
    pub async fn refresh_catalog(&self) -> Result<Arc<Catalog>> {
        let catalog = self.catalog.clone();
        let roots = self.shelf_dirs.clone();

        tokio::task::spawn_blocking(move || {
            let mut current = catalog.write();
            let next = Arc::new(refresh(&roots, &current));
            if next.len() != current.len() {
                tracing::debug!("Catalog now holds {} books", next.len());
            }
            *current = next.clone();
            next
        })
        .await
        .map_err(|e| ProxyError::Internal(format!("catalog refresh failed: {}", e)))
    }
}

fn load_mime_table(path: &Path) -> MimeTable {
    let mut mime = MimeTable::with_defaults();
    if path.is_file() {
        match mime.load_file(path) {
            Ok(count) => tracing::info!("Loaded {} MIME types from {}", count, path.display()),
            Err(e) => tracing::warn!("Failed to read {}: {}", path.display(), e),
        }
    }
    mime.insert("imp", SOFTBOOK_CONTENT_TYPE);
    mime
}

#[cfg(test)]
mod tests {
    use super::*;
    use impserve_core::{IMP_MAGIC, URL_HISTORY_MAX};
    use tempfile::TempDir;

    fn write_book(path: &Path, id: &str) {
        let mut bytes = IMP_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 38]);
        for field in [id, "Fiction", "skip", "Title", "skip", "skip", "Author"] {
            bytes.extend_from_slice(field.as_bytes());
            bytes.push(0);
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[tokio::test]
    async fn refresh_catalog_picks_up_new_books() {
        let dir = TempDir::new().unwrap();
        let config = ProxyConfig::new(dir.path());
        std::fs::create_dir_all(&config.shelf_dirs[0]).unwrap();
        let state = ShelfState::from_config(&config).unwrap();

        assert!(state.refresh_catalog().await.unwrap().is_empty());

        write_book(&config.shelf_dirs[0].join("one.imp"), "1");
        let catalog = state.refresh_catalog().await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(state.catalog().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_and_pushes_stay_consistent() {
        let dir = TempDir::new().unwrap();
        let config = ProxyConfig::new(dir.path());
        std::fs::create_dir_all(&config.shelf_dirs[0]).unwrap();
        for id in ["1", "2", "3"] {
            write_book(&config.shelf_dirs[0].join(format!("{}.imp", id)), id);
        }
        let full = refresh(&config.shelf_dirs, &Catalog::new());
        assert_eq!(full.len(), 3);

        let state = ShelfState::from_config(&config).unwrap();
        let mut tasks = Vec::new();

        for _ in 0..8 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                state.refresh_catalog().await.unwrap();
            }));
        }
        for _ in 0..8 {
            let state = state.clone();
            let full = full.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let snapshot = state.catalog();
                    assert!(snapshot.is_empty() || *snapshot == full);
                    assert!(state.history.lock().len() <= URL_HISTORY_MAX);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for writer in 0..8 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                for seq in 0..20 {
                    state
                        .history
                        .lock()
                        .push(format!("http://example.com/{}/{}", writer, seq));
                    tokio::task::yield_now().await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*state.catalog(), full);

        let history = state.history.lock();
        assert_eq!(history.len(), URL_HISTORY_MAX);
        let mut last_seen = [None; 8];
        for url in history.iter() {
            let mut parts = url.rsplit('/');
            let seq: u32 = parts.next().unwrap().parse().unwrap();
            let writer: usize = parts.next().unwrap().parse().unwrap();
            if let Some(previous) = last_seen[writer] {
                assert!(seq > previous, "{} out of order", url);
            }
            last_seen[writer] = Some(seq);
        }
    }

    #[test]
    fn mime_types_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mime.types");
        std::fs::write(&path, "text/x-custom  htm\napplication/x-other imp\n").unwrap();

        let mime = load_mime_table(&path);
        assert_eq!(mime.guess("a.htm"), Some("text/x-custom"));
        assert_eq!(mime.guess("b.IMP"), Some(SOFTBOOK_CONTENT_TYPE));
    }

    #[test]
    fn missing_mime_types_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let mime = load_mime_table(&dir.path().join("mime.types"));
        assert_eq!(mime.guess("index.html"), Some("text/html"));
        assert_eq!(mime.guess("book.imp"), Some(SOFTBOOK_CONTENT_TYPE));
    }
}
