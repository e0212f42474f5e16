use crate::app::AppState;
use axum::{
    http::{header::HOST, HeaderMap},
    Router,
};

pub mod admin;
pub mod callback;
pub mod conference;
pub mod middleware;
pub mod voicemail;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(callback::router())
        .merge(conference::router())
        .merge(voicemail::router())
        .merge(admin::router())
}

/// Absolute base for URLs handed to the carrier.
///
/// `public_url` wins when configured, otherwise the request's `Host` header
/// (behind a proxy, `X-Forwarded-Proto` picks the scheme).
pub(crate) fn base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(url) = state.config.public_url.as_deref().filter(|u| !u.is_empty()) {
        return url.trim_end_matches('/').to_string();
    }
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(state.config.http_addr.as_str());
    format!("{}://{}", scheme, host)
}
