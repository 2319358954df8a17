/* VEIL Proxy (AGPL-3.0)

Copyright (C) 2025 - VEIL Contributors

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU Affero General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU Affero General Public License for more details.

You should have received a copy of the GNU Affero General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.

*/

//! HTTP surface.
//!
//! The router binds every endpoint of the browser-facing contract and is the
//! single error boundary: handlers return `ProxyResult<Response>` and
//! `ProxyError` decides what the browser sees.

pub mod beacon;
pub mod proxy;
pub mod session_api;
pub mod shorten;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use cookie::Cookie;

use crate::assets::ScriptBundle;
use crate::config::Settings;
use crate::session::{Session, SessionStore};
use crate::shorturl::ShortUrlTable;
use crate::telemetry::TelemetrySink;
use crate::upstream::Dispatcher;
use crate::utils::{ProxyError, ProxyResult};

pub struct AppState {
    pub settings: Settings,
    pub sessions: SessionStore,
    pub dispatcher: Dispatcher,
    pub short_urls: ShortUrlTable,
    pub scripts: ScriptBundle,
    pub telemetry: TelemetrySink,
}

pub type SharedState = Arc<AppState>;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/sw.js", get(service_worker))
        .route("/assets/*path", get(static_asset))
        .route("/p/*token", any(proxy::entry))
        .route("/external/*token", any(proxy::entry))
        .route("/api/proxy", get(proxy::proxy_get).post(proxy::proxy_post))
        .route(
            "/api/session",
            post(session_api::create)
                .get(session_api::inspect)
                .delete(session_api::destroy),
        )
        .route("/api/status", get(session_api::status))
        .route("/api/health", get(session_api::health))
        .route("/api/shorten", post(shorten::create))
        .route("/api/url-stats", get(shorten::stats))
        .route("/api/click-beacon", post(beacon::click_beacon))
        .route("/hcdn-cgi/*rest", any(proxy::cdn_passthrough))
        .fallback(not_found)
        .with_state(state)
}

async fn landing(State(state): State<SharedState>) -> Html<String> {
    Html(state.scripts.landing_for(&state.settings.target_site))
}

/// The worker must control the whole origin and must never be cached, or
/// stale interception logic keeps running after a deploy.
async fn service_worker(State(state): State<SharedState>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "no-store"),
            (header::HeaderName::from_static("service-worker-allowed"), "/"),
        ],
        state.scripts.service_worker.to_string(),
    )
        .into_response()
}

async fn static_asset(
    State(state): State<SharedState>,
    Path(path): Path<String>,
) -> ProxyResult<Response> {
    let body = match path.as_str() {
        "js/webrtc_guard.js" => state.scripts.webrtc_guard.to_string(),
        "js/service_worker.js" => state.scripts.service_worker.to_string(),
        _ => return Err(ProxyError::NotFound),
    };
    Ok((
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        body,
    )
        .into_response())
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
        .into_response()
}

/// Pull the session id out of the request's Cookie header.
pub(crate) fn session_id_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for parsed in Cookie::split_parse(raw) {
        if let Ok(c) = parsed {
            if c.name() == cookie_name {
                return Some(c.value().to_string());
            }
        }
    }
    None
}

/// Resolve (or mint) the request's session. The Set-Cookie value comes back
/// when a new session was created so the caller attaches it to the response.
pub(crate) fn bind_session(
    state: &AppState,
    headers: &HeaderMap,
) -> (Arc<Session>, Option<HeaderValue>) {
    let existing = session_id_from_headers(headers, &state.settings.session_cookie_name);
    let (session, created) = state.sessions.get_or_create(existing.as_deref());
    let set_cookie = created.then(|| session_cookie_value(state, &session.id));
    (session, set_cookie)
}

pub(crate) fn session_cookie_value(state: &AppState, id: &str) -> HeaderValue {
    let ttl_secs = state.settings.session_ttl().as_secs() as i64;
    let mut builder = Cookie::build((state.settings.session_cookie_name.clone(), id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(cookie::SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(ttl_secs));
    if state.settings.secure_cookies() {
        builder = builder.secure(true);
    }
    HeaderValue::from_str(&builder.build().to_string())
        .unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Expired-now cookie for DELETE /api/session.
pub(crate) fn clearing_cookie_value(state: &AppState) -> HeaderValue {
    let cleared = Cookie::build((state.settings.session_cookie_name.clone(), String::new()))
        .path("/")
        .http_only(true)
        .max_age(cookie::time::Duration::seconds(0))
        .build();
    HeaderValue::from_str(&cleared.to_string()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_parses_out_of_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "other=1; proxy_session=abc123def456; trailing=x".parse().unwrap(),
        );
        assert_eq!(
            session_id_from_headers(&headers, "proxy_session").as_deref(),
            Some("abc123def456")
        );
        assert!(session_id_from_headers(&headers, "missing").is_none());
    }
}
