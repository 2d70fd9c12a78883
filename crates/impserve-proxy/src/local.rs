//! Endpoints served for the `.ebooksystem.net` pseudo-domain.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::response::Response;
use impserve_core::{render_booklist, BOOKLIST_CONTENT_TYPE, SOFTBOOK_CONTENT_TYPE};
use tokio_util::io::ReaderStream;

use crate::error::{ProxyError, Result};
use crate::state::ShelfState;

/// Host suffix handled locally.
pub const LOCAL_DOMAIN: &str = ".ebooksystem.net";

/// Book listing endpoint.
pub const BOOKLIST_PREFIX: &str = "http://bookshelf.ebooksystem.net/bookshelf/default.asp?";

/// Book download endpoint; the book id follows the prefix.
pub const BOOK_PREFIX: &str = "http://bookshelf.ebooksystem.net/bookshelf/getbook?";

/// Static content under the root directory.
pub const CONTENT_PREFIX: &str = "http://bookshelf.ebooksystem.net/content/";

/// Redirects to the `target` query parameter.
pub const REDIRECT_PREFIX: &str = "http://register.ebooksystem.net/form/redirect.asp";

/// Suffix on a book download that deletes the book instead.
pub const DELETE_SUFFIX: &str = "&DELETE=YES";

/// Files tried, in order, when static content names a directory.
pub const INDEX_FILES: &[&str] = &["index.htm", "index.html"];

const DEFAULT_BOOKLIST_LENGTH: i64 = 100;

/// Serves a request addressed to the pseudo-domain.
pub async fn handle_local(state: &ShelfState, uri: &Uri) -> Result<Response> {
    let target = uri.to_string();

    if target.starts_with(BOOKLIST_PREFIX) {
        booklist(state, uri.query().unwrap_or_default()).await
    } else if let Some(id) = target.strip_prefix(BOOK_PREFIX) {
        match id.strip_suffix(DELETE_SUFFIX) {
            Some(id) => delete_book(state, id).await,
            None => fetch_book(state, id).await,
        }
    } else if target.starts_with(CONTENT_PREFIX) {
        static_content(state, uri.path()).await
    } else if target.starts_with(REDIRECT_PREFIX) {
        redirect_target(uri.query().unwrap_or_default())
    } else {
        go_back(state)
    }
}

async fn booklist(state: &ShelfState, query: &str) -> Result<Response> {
    state.history.lock().clear();

    let (start, length) = booklist_range(query)?;
    let catalog = state.refresh_catalog().await?;
    let data = render_booklist(catalog.values().skip(start).take(length), BOOK_PREFIX);

    tracing::debug!("Booklist from {} of {} books", start + 1, catalog.len());

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, BOOKLIST_CONTENT_TYPE)
        .header(CONTENT_LENGTH, data.len())
        .body(Body::from(data))?)
}

/// Reads `INDEX` (1-based) and `REQUEST` into a zero-based skip and a count.
fn booklist_range(query: &str) -> Result<(usize, usize)> {
    let index = query_number(query, "INDEX")?.unwrap_or(1);
    let length = query_number(query, "REQUEST")?.unwrap_or(DEFAULT_BOOKLIST_LENGTH);

    let start = usize::try_from(index.saturating_sub(1)).unwrap_or(0);
    let length = usize::try_from(length).unwrap_or(0);
    Ok((start, length))
}

fn query_number(query: &str, name: &str) -> Result<Option<i64>> {
    match query_param(query, name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ProxyError::BadRequest(format!("invalid {}: {:?}", name, value))),
        None => Ok(None),
    }
}

/// First value of a query parameter, percent-decoded.
fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

async fn fetch_book(state: &ShelfState, id: &str) -> Result<Response> {
    let catalog = state.refresh_catalog().await?;
    let record = catalog
        .values()
        .find(|record| record.id == id)
        .ok_or_else(|| ProxyError::NotFound(format!("no book with id {}", id)))?;

    let file = tokio::fs::File::open(&record.path).await?;
    tracing::info!("Sending book {} ({} bytes)", record.path.display(), record.size);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, SOFTBOOK_CONTENT_TYPE)
        .header(CONTENT_LENGTH, record.size)
        .body(Body::from_stream(ReaderStream::new(file)))?)
}

async fn delete_book(state: &ShelfState, id: &str) -> Result<Response> {
    let catalog = state.refresh_catalog().await?;
    let path = catalog
        .values()
        .find(|record| record.id == id)
        .map(|record| record.path.clone())
        .ok_or_else(|| ProxyError::NotFound(format!("no book with id {}", id)))?;

    tracing::info!("Deleting book {}", path.display());
    tokio::task::spawn_blocking(move || std::fs::remove_file(path))
        .await
        .map_err(|e| ProxyError::Internal(format!("delete failed: {}", e)))??;

    found(&format!("{}REQUEST=100", BOOKLIST_PREFIX))
}

async fn static_content(state: &ShelfState, url_path: &str) -> Result<Response> {
    let not_found = || ProxyError::NotFound(format!("file not found: {}", url_path));

    let mut path = resolve_content_path(&state.root_dir, url_path);
    let metadata = tokio::fs::metadata(&path).await.map_err(|_| not_found())?;

    if metadata.is_dir() {
        let mut index = None;
        for name in INDEX_FILES {
            let candidate = path.join(name);
            if tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                index = Some(candidate);
                break;
            }
        }
        path = index.ok_or_else(not_found)?;
    } else if !metadata.is_file() {
        return Err(not_found());
    }

    let file = tokio::fs::File::open(&path).await?;
    let size = file.metadata().await?.len();
    let content_type = state
        .mime
        .guess_or_default(&path.to_string_lossy())
        .to_string();

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, size)
        .body(Body::from_stream(ReaderStream::new(file)))?)
}

/// Joins a URL path onto `root`.
///
/// `.` segments are dropped and `..` removes the previous segment, never
/// climbing above `root`.
pub fn resolve_content_path(root: &Path, url_path: &str) -> PathBuf {
    let mut segments: Vec<&str> = Vec::new();
    for segment in url_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    segments
        .into_iter()
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

fn redirect_target(query: &str) -> Result<Response> {
    let target = query_param(query, "target")
        .ok_or_else(|| ProxyError::BadRequest("missing redirect target".to_string()))?;
    found(&target)
}

fn go_back(state: &ShelfState) -> Result<Response> {
    let location = state.history.lock().go_back();
    match location {
        Some(url) => found(&url),
        None => found(CONTENT_PREFIX),
    }
}

/// A `302 Found` pointing at `location`.
pub(crate) fn found(location: &str) -> Result<Response> {
    let location = HeaderValue::from_str(location)
        .map_err(|_| ProxyError::BadRequest(format!("invalid location: {:?}", location)))?;
    Ok(Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, location)
        .header(CONTENT_LENGTH, 0)
        .body(Body::empty())?)
}
