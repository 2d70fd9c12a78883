//! Request classification and dispatch.

use axum::extract::{Request, State};
use axum::http::header::SERVER;
use axum::http::{HeaderValue, Method, Uri};
use axum::middleware::map_response;
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::error::ProxyError;
use crate::forward::forward;
use crate::local::{handle_local, LOCAL_DOMAIN};
use crate::state::ShelfState;
use crate::USER_AGENT;

/// Where a request is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The pseudo-domain, answered from disk.
    Local,
    /// Any other host, fetched upstream.
    Forward,
}

/// Decides how a request is served.
///
/// Only GET and POST with an absolute `http` target are accepted.
pub fn classify(method: &Method, uri: &Uri) -> Result<Route, ProxyError> {
    if *method != Method::GET && *method != Method::POST {
        return Err(ProxyError::NotImplemented(method.to_string()));
    }

    let host = match (uri.scheme_str(), uri.host()) {
        (Some("http"), Some(host)) if !host.is_empty() => host,
        _ => return Err(ProxyError::BadRequest(format!("bad url {}", uri))),
    };

    if host.to_ascii_lowercase().ends_with(LOCAL_DOMAIN) {
        Ok(Route::Local)
    } else {
        Ok(Route::Forward)
    }
}

/// Handles every request the proxy receives.
pub async fn route_request(State(state): State<ShelfState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let result = match classify(&parts.method, &parts.uri) {
        Ok(Route::Local) => {
            tracing::debug!("{} {} (local)", parts.method, parts.uri);
            handle_local(&state, &parts.uri).await
        }
        Ok(Route::Forward) => {
            tracing::debug!("{} {} (forward)", parts.method, parts.uri);
            forward(&state, parts.method, &parts.uri, &parts.headers, body).await
        }
        Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
        tracing::warn!("{} {}: {}", e.status().as_u16(), parts.uri, e);
        e.into_response()
    })
}

/// Stamps the proxy's name on a response, replacing any upstream value.
async fn server_header(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(SERVER, HeaderValue::from_static(USER_AGENT));
    response
}

/// Builds the proxy's router. Every path goes to [`route_request`].
pub fn router(state: ShelfState) -> Router {
    Router::new()
        .fallback(route_request)
        .layer(map_response(server_header))
        .with_state(state)
}
