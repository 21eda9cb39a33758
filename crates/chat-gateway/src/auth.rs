//! Token extraction and verification for the `/ws` upgrade and the admin
//! HTTP surface.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::app::AppState;

/// Extract the client-supplied token from a `/ws` upgrade request, trying
/// each transport in the priority order the protocol fixes: bearer header,
/// WS subprotocol pair, query parameter, cookie.
pub fn extract_ws_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(t) = bearer_header(headers) {
        return Some(t);
    }
    if let Some(t) = subprotocol_token(headers) {
        return Some(t);
    }
    if let Some(t) = query.get("token") {
        return Some(t.clone());
    }
    cookie_token(headers)
}

fn bearer_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// The client offers `("chat", <token>)` as its requested subprotocol list.
fn subprotocol_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("sec-websocket-protocol")?.to_str().ok()?;
    let mut parts = raw.split(',').map(str::trim);
    if parts.next()? != "chat" {
        return None;
    }
    parts.next().map(str::to_string)
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == "token").then(|| v.to_string())
    })
}

/// Whether `token` matches the configured chat API key. `None` disables
/// auth entirely.
pub fn verify_ws_token(expected: &Option<String>, token: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => token == Some(expected.as_str()),
    }
}

/// Middleware guarding every `/admin/*` route with a bearer token compared
/// against `ADMIN_API_KEY`.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_header(req.headers());
    if token.as_deref() == Some(state.config.admin.api_key.as_str()) {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            value.parse().unwrap(),
        );
        h
    }

    #[test]
    fn bearer_header_takes_priority_over_query() {
        let headers = headers_with("authorization", "Bearer GOOD");
        let mut query = HashMap::new();
        query.insert("token".to_string(), "BAD".to_string());
        assert_eq!(extract_ws_token(&headers, &query), Some("GOOD".to_string()));
    }

    #[test]
    fn query_used_when_no_header_or_subprotocol() {
        let headers = HeaderMap::new();
        let mut query = HashMap::new();
        query.insert("token".to_string(), "FROM_QUERY".to_string());
        assert_eq!(extract_ws_token(&headers, &query), Some("FROM_QUERY".to_string()));
    }

    #[test]
    fn cookie_used_as_last_resort() {
        let headers = headers_with("cookie", "session=abc; token=FROM_COOKIE");
        let query = HashMap::new();
        assert_eq!(extract_ws_token(&headers, &query), Some("FROM_COOKIE".to_string()));
    }

    #[test]
    fn verify_rejects_mismatched_token() {
        let expected = Some("GOOD".to_string());
        assert!(!verify_ws_token(&expected, Some("BAD")));
        assert!(verify_ws_token(&expected, Some("GOOD")));
    }

    #[test]
    fn verify_allows_anything_when_auth_disabled() {
        assert!(verify_ws_token(&None, None));
    }
}
