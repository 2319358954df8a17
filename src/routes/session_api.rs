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

//! Session lifecycle and operator endpoints.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::routes::{
    bind_session, clearing_cookie_value, session_id_from_headers, SharedState,
};
use crate::utils::ProxyResult;

/// `POST /api/session` — create or refresh, always (re)setting the cookie.
pub async fn create(State(state): State<SharedState>, headers: HeaderMap) -> ProxyResult<Response> {
    let (session, _) = bind_session(&state, &headers);
    // The id returned here is the browser's own cookie value, so echoing it
    // back to the same browser reveals nothing new.
    let body = Json(json!({
        "sessionId": session.id,
        "expiresIn": state.settings.session_ttl().as_secs(),
    }));

    let cookie = crate::routes::session_cookie_value(&state, &session.id);
    let mut response = body.into_response();
    response.headers_mut().append(header::SET_COOKIE, cookie);
    Ok(response)
}

/// `GET /api/session` — non-creating introspection.
pub async fn inspect(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let found = session_id_from_headers(&headers, &state.settings.session_cookie_name)
        .and_then(|id| state.sessions.get(&id));

    match found {
        Some(session) => Json(json!({
            "hasSession": true,
            "sessionId": session.id,
            "currentPage": session.current_page().map(|u| u.to_string()),
        }))
        .into_response(),
        None => Json(json!({ "hasSession": false })).into_response(),
    }
}

/// `DELETE /api/session` — idempotent removal plus cookie clear.
pub async fn destroy(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id_from_headers(&headers, &state.settings.session_cookie_name) {
        state.sessions.delete(&id);
    }

    let mut response = Json(json!({ "success": true })).into_response();
    response
        .headers_mut()
        .append(header::SET_COOKIE, clearing_cookie_value(&state));
    response
}

/// `GET /api/status` — upstream configuration as the operator sees it.
/// Host only, never credentials.
pub async fn status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let upstream = &state.settings.upstream;
    Json(json!({
        "proxy": {
            "configured": upstream.is_configured(),
            "host": upstream.host,
            "region": upstream.region,
        },
        "targetSite": state.settings.target_site,
    }))
}

/// `GET /api/health`
pub async fn health() -> Json<serde_json::Value> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Json(json!({ "status": "ok", "timestamp": timestamp }))
}
