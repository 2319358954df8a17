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

//! Short-URL endpoints for tokens that outgrow the path.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::routes::SharedState;
use crate::shorturl::LONG_TOKEN_THRESHOLD;
use crate::ssrf;
use crate::utils::{ProxyError, ProxyResult};

#[derive(Deserialize)]
pub struct ShortenRequest {
    url: Option<String>,
}

/// `POST /api/shorten` — `{ url }` → `{ hash, shortUrl }`.
pub async fn create(
    State(state): State<SharedState>,
    Json(request): Json<ShortenRequest>,
) -> ProxyResult<Json<serde_json::Value>> {
    let raw = request.url.ok_or(ProxyError::MissingParam("url"))?;
    let target = Url::parse(&raw).map_err(|_| ProxyError::MalformedToken)?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(ProxyError::MalformedToken);
    }
    ssrf::validate(&target).map_err(ProxyError::Forbidden)?;

    let hash = state.short_urls.shorten(&target);
    Ok(Json(json!({
        "hash": hash,
        "shortUrl": format!("/p/s/{}", hash),
    })))
}

/// `GET /api/url-stats`
pub async fn stats(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({
        "totalUrls": state.short_urls.len(),
        "maxPathLength": LONG_TOKEN_THRESHOLD,
        "ttlMinutes": state.short_urls.ttl_minutes(),
    }))
}
