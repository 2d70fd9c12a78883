//! Forwarding of non-local requests to the real server.

use axum::body::Body;
use axum::http::header::{
    HeaderName, CONNECTION, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE,
    TRANSFER_ENCODING,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use http_body_util::BodyExt;
use impserve_core::MimeTable;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ForwardError, ProxyError, Result};
use crate::state::ShelfState;

/// Extracts the file name from a Content-Disposition header.
static CONTENT_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"filename="?([^"]+)"?"#).expect("valid regex"));

/// Content type sent with a forwarded body that did not declare one.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Framing headers that describe the upstream connection, not the body.
static HOP_BY_HOP: Lazy<[HeaderName; 3]> = Lazy::new(|| {
    [
        TRANSFER_ENCODING,
        CONNECTION,
        HeaderName::from_static("keep-alive"),
    ]
});

/// Status, headers and full body of an upstream answer.
///
/// Any status counts as an answer, including 4xx and 5xx.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Forwards a request and relays the (transformed) answer.
pub async fn forward(
    state: &ShelfState,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response> {
    let url = state.plugins.rewrite_url(&uri.to_string());
    let body = read_body(headers, body).await?;

    let content_type = (!body.is_empty()).then(|| {
        headers
            .get(CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(FORM_CONTENT_TYPE))
    });

    let upstream = fetch(
        &state.client,
        method.clone(),
        &url,
        headers.get(COOKIE).cloned(),
        content_type,
        body,
    )
    .await
    .map_err(|e| {
        tracing::warn!("{} {} failed: {}", method, url, e);
        ProxyError::from(e)
    })?;

    let status = upstream.status;
    let mut headers = upstream.headers;
    override_download_type(&state.mime, &mut headers);
    let (headers, body) = state.plugins.rewrite_response(&url, headers, upstream.body);

    tracing::info!("{} {} -> {} ({} bytes)", method, url, status.as_u16(), body.len());

    if status == StatusCode::OK && is_html(&headers) {
        state.history.lock().push(url);
    }

    Ok(relay(status, headers, body))
}

/// Reads the inbound body.
///
/// With a Content-Length exactly that many bytes are read. Without one, only
/// the frames that are already available are taken; a body that arrives
/// later is lost.
pub async fn read_body(headers: &HeaderMap, body: Body) -> Result<Bytes> {
    let Some(length) = headers.get(CONTENT_LENGTH) else {
        return Ok(drain_ready(body));
    };

    let length: usize = length
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ProxyError::BadRequest(format!("invalid Content-Length: {:?}", length)))?;

    let bytes = axum::body::to_bytes(body, length)
        .await
        .map_err(|e| ProxyError::BadRequest(format!("failed to read body: {}", e)))?;
    if bytes.len() < length {
        return Err(ProxyError::BadRequest(format!(
            "body ended after {} of {} bytes",
            bytes.len(),
            length
        )));
    }
    Ok(bytes)
}

fn drain_ready(mut body: Body) -> Bytes {
    let mut out = BytesMut::new();
    while let Some(Some(Ok(frame))) = body.frame().now_or_never() {
        if let Ok(data) = frame.into_data() {
            out.extend_from_slice(&data);
        }
    }
    out.freeze()
}

/// Issues the upstream request and reads the whole answer.
pub async fn fetch(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    cookie: Option<HeaderValue>,
    content_type: Option<HeaderValue>,
    body: Bytes,
) -> std::result::Result<UpstreamResponse, ForwardError> {
    let mut request = client.request(method, url);
    if let Some(cookie) = cookie {
        request = request.header(COOKIE, cookie);
    }
    if let Some(content_type) = content_type {
        request = request.header(CONTENT_TYPE, content_type);
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let response = request.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    Ok(UpstreamResponse {
        status,
        headers,
        body,
    })
}

/// Replaces Content-Type with the type of the file named in
/// Content-Disposition, if any.
pub fn override_download_type(mime: &MimeTable, headers: &mut HeaderMap) {
    let file_name = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| CONTENT_FILE.captures(v))
        .map(|c| c[1].to_string());

    if let Some(file_name) = file_name {
        if let Ok(value) = HeaderValue::from_str(mime.guess_or_default(&file_name)) {
            headers.insert(CONTENT_TYPE, value);
        }
    }
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false)
}

/// Builds the client response; the body is sent whole, so connection
/// framing headers are dropped and Content-Length is recomputed.
fn relay(status: StatusCode, mut headers: HeaderMap, body: Bytes) -> Response {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
