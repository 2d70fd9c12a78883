//! Proxy server lifecycle.

use std::net::SocketAddr;

use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::ProxyConfig;
use crate::error::ServerError;
use crate::router::router;
use crate::state::ShelfState;

/// The bookshelf proxy server.
pub struct ProxyServer {
    config: ProxyConfig,
    state: ShelfState,
}

impl ProxyServer {
    /// Creates a server, loading the MIME table and plugins named by `config`.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let state = ShelfState::from_config(&config)?;
        Ok(Self { config, state })
    }

    /// Creates a server around prebuilt state.
    pub fn with_state(config: ProxyConfig, state: ShelfState) -> Self {
        Self { config, state }
    }

    /// Returns the address the server is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Returns the shared state.
    pub fn state(&self) -> &ShelfState {
        &self.state
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Runs the server until it fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = bind(self.config.addr)?;
        tracing::info!("Serving HTTP on {}", self.config.addr);
        log_shelves(&self.config);

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }

    /// Starts the server in the background.
    ///
    /// Binding happens before this returns, so a port of 0 is resolved in
    /// [`ProxyHandle::addr`].
    pub fn start(self) -> Result<ProxyHandle, ServerError> {
        let listener = bind(self.config.addr)?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(self.config.addr, e))?;
        tracing::info!("Serving HTTP on {}", addr);
        log_shelves(&self.config);

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let app = router(self.state);

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                    tracing::info!("Proxy shutdown signal received");
                })
                .await;
            if let Err(e) = result {
                tracing::error!("Proxy error: {}", e);
            }
        });

        Ok(ProxyHandle {
            shutdown_tx,
            addr,
            handle,
        })
    }
}

fn log_shelves(config: &ProxyConfig) {
    tracing::info!("Root directory: {}", config.root_dir.display());
    for dir in &config.shelf_dirs {
        if dir.is_dir() {
            tracing::info!("Shelf: {}", dir.display());
        } else {
            tracing::warn!("Shelf {} is not a directory", dir.display());
        }
    }
}

/// Binds a listener with SO_REUSEADDR so a restart is not blocked by
/// lingering sockets.
fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::Bind(addr, e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| ServerError::Bind(addr, e))?;
    socket
        .bind(&addr.into())
        .map_err(|e| ServerError::Bind(addr, e))?;
    socket
        .listen(128)
        .map_err(|e| ServerError::Bind(addr, e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| ServerError::Bind(addr, e))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(|e| ServerError::Bind(addr, e))
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{BOOKLIST_PREFIX, CONTENT_PREFIX};
    use impserve_core::BOOKLIST_CONTENT_TYPE;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> ProxyConfig {
        ProxyConfig::new(dir.path()).with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    fn proxied_client(addr: SocketAddr) -> reqwest::Client {
        reqwest::Client::builder()
            .proxy(reqwest::Proxy::http(format!("http://{}", addr)).unwrap())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    #[test]
    fn server_new_loads_state() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("plugins")).unwrap();
        std::fs::write(
            dir.path().join("plugins/a.toml"),
            "[[url]]\npattern = \"x\"\nreplace = \"y\"\n",
        )
        .unwrap();

        let server = ProxyServer::new(test_config(&dir)).unwrap();
        assert_eq!(server.addr().port(), 0);
        assert_eq!(server.state().plugins.url_transformers().len(), 1);
    }

    #[tokio::test]
    async fn proxy_handle_serves_and_stops() {
        let dir = TempDir::new().unwrap();
        let server = ProxyServer::new(test_config(&dir)).unwrap();
        let handle = server.start().unwrap();
        assert_ne!(handle.addr().port(), 0);

        let client = proxied_client(handle.addr());

        let response = client
            .get(format!("{}REQUEST=10", BOOKLIST_PREFIX))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            BOOKLIST_CONTENT_TYPE
        );
        assert_eq!(&response.bytes().await.unwrap()[..], b"1\r\n\r\n\r\n");

        let response = client
            .get("http://bookshelf.ebooksystem.net/back")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::FOUND);
        assert_eq!(response.headers()[reqwest::header::LOCATION], CONTENT_PREFIX);

        drop(client);
        handle.stop().await;
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let dir = TempDir::new().unwrap();
        let config = ProxyConfig::new(dir.path()).with_addr(addr);
        let result = ProxyServer::new(config).unwrap().start();
        assert!(matches!(result, Err(ServerError::Bind(a, _)) if a == addr));
    }
}
