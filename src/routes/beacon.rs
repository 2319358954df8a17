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

//! Click beacon.
//!
//! Ad clicks must register on the ad network from the residential exit, not
//! from the browser. The ad-frame runtime posts the click context here; the
//! server walks the redirect chain through the SOCKS5 upstream until the
//! advertiser is reached, then hands back a proxied destination for the top
//! window.

use axum::{extract::State, http::HeaderMap, http::Method, Json};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::codec;
use crate::routes::{bind_session, SharedState};
use crate::ssrf;
use crate::upstream::BrowserContext;
use crate::utils::{ProxyError, ProxyResult};

const MAX_REDIRECTS: usize = 10;

/// Hostname shapes owned by the ad network; the chase stops at the first
/// host outside this set.
const AD_NETWORK_HOSTS: &[&str] = &[
    "google.com",
    "googleadservices.com",
    "googlesyndication.com",
    "doubleclick.net",
    "2mdn.net",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickBeaconRequest {
    click_url: Option<String>,
    cookies: Option<String>,
    user_agent: Option<String>,
    #[allow(dead_code)]
    referrer: Option<String>,
    language: Option<String>,
    adurl: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickBeaconResponse {
    success: bool,
    click_registered: bool,
    destination: Option<String>,
    proxy_url: Option<String>,
}

pub async fn click_beacon(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<ClickBeaconRequest>,
) -> ProxyResult<Json<ClickBeaconResponse>> {
    let raw_click = request.click_url.clone().ok_or(ProxyError::MissingParam("clickUrl"))?;
    let click_url = Url::parse(&raw_click).map_err(|_| ProxyError::MalformedToken)?;
    ssrf::validate(&click_url).map_err(ProxyError::Forbidden)?;

    let flow_id = Uuid::now_v7();
    let (session, _) = bind_session(&state, &headers);

    // The frame's document.cookie pairs belong to the ad network; seed the
    // jar so the chase presents them.
    if let (Some(cookies), Some(host)) = (&request.cookies, click_url.host_str()) {
        if is_ad_network_host(host) {
            session.store_cookies(host, cookies.split(';').map(str::trim));
        }
    }

    let browser = BrowserContext {
        user_agent: request.user_agent.clone(),
        original_user_agent: None,
        accept: Some("text/html,application/xhtml+xml,*/*;q=0.8".to_string()),
        accept_language: request.language.clone(),
    };

    state.telemetry.emit(
        "click_beacon",
        flow_id,
        serde_json::json!({ "host": click_url.host_str() }),
    );

    let mut current = click_url;
    let mut hops = 0usize;
    let mut chain_failed = false;

    while hops < MAX_REDIRECTS {
        // Advertiser reached: the chain left the ad network's hosts.
        let on_ad_network = current
            .host_str()
            .map(is_ad_network_host)
            .unwrap_or(false);
        if !on_ad_network {
            break;
        }
        if ssrf::validate(&current).is_err() {
            chain_failed = true;
            break;
        }

        match state
            .dispatcher
            .fetch(&current, Method::GET, &browser, None, &session)
            .await
        {
            Ok(outcome) => {
                if let Some(location) = &outcome.redirect {
                    match codec::resolve_against(&current, location) {
                        Some(next) => {
                            hops += 1;
                            current = next;
                            continue;
                        }
                        None => {
                            chain_failed = true;
                            break;
                        }
                    }
                }
                if outcome.status.as_u16() < 400 {
                    break;
                }
                chain_failed = true;
                break;
            }
            Err(err) => {
                tracing::debug!(error = %err, hops, "click chain errored");
                chain_failed = true;
                break;
            }
        }
    }

    if chain_failed {
        // Partial success: the chase died but the creative carried the
        // advertiser URL inline.
        if let Some(adurl) = request.adurl.as_deref().and_then(|u| Url::parse(u).ok()) {
            return Ok(Json(ClickBeaconResponse {
                success: true,
                click_registered: hops > 0,
                destination: Some(adurl.to_string()),
                proxy_url: Some(codec::proxy_path(&adurl)),
            }));
        }
        return Err(ProxyError::Upstream("click redirect chain failed".into()));
    }

    Ok(Json(ClickBeaconResponse {
        success: true,
        click_registered: hops > 0,
        destination: Some(current.to_string()),
        proxy_url: Some(codec::proxy_path(&current)),
    }))
}

fn is_ad_network_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    AD_NETWORK_HOSTS
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ad_network_shape_detection() {
        assert!(is_ad_network_host("www.googleadservices.com"));
        assert!(is_ad_network_host("ad.doubleclick.net"));
        assert!(is_ad_network_host("google.com"));
        assert!(!is_ad_network_host("advertiser-shop.com"));
        assert!(!is_ad_network_host("totallynotgoogle.com"));
    }
}
