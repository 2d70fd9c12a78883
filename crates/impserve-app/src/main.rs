//! impserve - bookshelf proxy for the ebook reader.
//!
//! Point the reader's HTTP proxy at this server. Books under the shelf
//! directories show up in the reader's bookshelf; all other pages are fetched
//! and passed through the plugins in `<root>/plugins`.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use directories::ProjectDirs;
use impserve_proxy::{default_root_dir, ProxyConfig, ProxyServer, DEFAULT_PROXY_PORT};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// impserve - bookshelf proxy for the ebook reader
#[derive(Parser, Debug)]
#[command(name = "impserve", version, about)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0")]
    address: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PROXY_PORT)]
    port: u16,

    /// Upstream timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Extra directories to scan for books
    shelves: Vec<PathBuf>,
}

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "impserve").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging to the console and a daily log file.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "impserve={0},impserve_core={0},impserve_proxy={0},warn",
            log_level
        ))
    });

    if let Some(log_dir) = logs_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("impserve")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stdout))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

/// Builds the proxy configuration from the command line.
fn build_config(args: &Args, root_dir: PathBuf) -> ProxyConfig {
    let mut config = ProxyConfig::new(root_dir)
        .with_addr(SocketAddr::new(args.address, args.port))
        .with_upstream_timeout(Duration::from_secs(args.timeout));

    for shelf in &args.shelves {
        if shelf.is_dir() {
            let shelf = std::path::absolute(shelf).unwrap_or_else(|_| shelf.clone());
            config = config.with_shelf_dir(shelf);
        } else {
            tracing::warn!("Ignoring shelf {}: not a directory", shelf.display());
        }
    }

    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_logging(&args);

    tracing::info!("Starting impserve {}", impserve_core::VERSION);
    tracing::debug!("Args: {:?}", args);

    let config = build_config(&args, default_root_dir());
    let server = ProxyServer::new(config)?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    tracing::info!("impserve shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn args_defaults() {
        let args = Args::parse_from(["impserve"]);
        assert_eq!(args.address, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(args.port, 9090);
        assert_eq!(args.timeout, 60);
        assert_eq!(args.log_level, "info");
        assert!(!args.debug);
        assert!(args.shelves.is_empty());
    }

    #[test]
    fn args_short_flags_and_shelves() {
        let args = Args::parse_from(["impserve", "-a", "127.0.0.1", "-p", "8000", "one", "two"]);
        assert_eq!(args.address, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(args.port, 8000);
        assert_eq!(args.shelves, vec![PathBuf::from("one"), PathBuf::from("two")]);
    }

    #[test]
    fn config_keeps_existing_shelves_only() {
        let root = TempDir::new().unwrap();
        let extra = TempDir::new().unwrap();
        let missing = extra.path().join("missing");

        let args = Args::parse_from([
            "impserve".to_string(),
            "--port".to_string(),
            "9191".to_string(),
            "--timeout".to_string(),
            "5".to_string(),
            extra.path().display().to_string(),
            missing.display().to_string(),
        ]);
        let config = build_config(&args, root.path().to_path_buf());

        assert_eq!(config.addr, SocketAddr::from(([0, 0, 0, 0], 9191)));
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
        assert_eq!(
            config.shelf_dirs,
            vec![root.path().join("shelf"), extra.path().to_path_buf()]
        );
    }
}
