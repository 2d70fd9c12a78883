//! Error types for the proxy.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;

/// Errors answered to the client while handling a request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Nothing to serve at this location.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unsupported request method.
    #[error("unsupported method: {0}")]
    NotImplemented(String),

    /// The upstream server could not be reached or did not answer in time.
    #[error("gateway timeout: {0}")]
    GatewayTimeout(String),

    /// Local IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Response construction error.
    #[error("HTTP error: {0}")]
    Http(#[from] axum::http::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Status code sent for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            ProxyError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ProxyError::Io(_) | ProxyError::Http(_) | ProxyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = format!(
            "<html><head><title>Error response</title></head><body>\
             <h1>Error response</h1><p>Error code {}.</p><p>Message: {}.</p>\
             </body></html>",
            status.as_u16(),
            escape_html(&self.to_string()),
        );
        (status, Html(body)).into_response()
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Network-level failure talking to the upstream server.
///
/// An upstream response with an error status is not a `ForwardError`; it is
/// relayed to the client like any other response.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Connect, timeout or body read failure.
    #[error("upstream request failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl From<ForwardError> for ProxyError {
    fn from(err: ForwardError) -> Self {
        ProxyError::GatewayTimeout(err.to_string())
    }
}

/// Errors starting the proxy server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    /// Failed to build the upstream HTTP client.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Result type for request handling.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ProxyError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ProxyError::NotImplemented("PUT".into()).status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(ProxyError::GatewayTimeout("x".into()).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ProxyError::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = ProxyError::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ProxyError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn escape_html_entities() {
        assert_eq!(escape_html("<a & b>"), "&lt;a &amp; b&gt;");
    }

    #[test]
    fn error_page_is_html() {
        let response = ProxyError::NotFound("<script>".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()["content-type"],
            "text/html; charset=utf-8"
        );
    }
}
