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

//! The proxied-request pipeline:
//! decode → validate → session bind → upstream fetch → classify →
//! (rewrite | passthrough) → respond. Redirects exit early, translated back
//! onto the proxy origin.

use axum::{
    extract::{Path, Query, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use url::Url;
use uuid::Uuid;

use crate::classify::{self, ContentClass};
use crate::codec;
use crate::rewrite::{rewrite_css, rewrite_html, rewrite_js, RewriteMode};
use crate::routes::{bind_session, SharedState};
use crate::ssrf;
use crate::upstream::{BrowserContext, FetchError, FetchOutcome};
use crate::utils::{ProxyError, ProxyResult};

/// Response headers that survive the proxy unchanged.
const FORWARDED_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_TYPE,
    header::CACHE_CONTROL,
    header::ETAG,
    header::LAST_MODIFIED,
];

/// The injected scripts and proxied third-party code must execute; the
/// page's own policy was stripped, this one replaces it.
const PERMISSIVE_CSP: &str =
    "default-src * 'unsafe-inline' 'unsafe-eval' data: blob:; frame-src *; worker-src * blob:";

/// Origins that get the ad-frame rewrite instead of the full page treatment.
const AD_FRAME_HOSTS: &[&str] = &[
    "googlesyndication.com",
    "doubleclick.net",
    "googleadservices.com",
    "adnxs.com",
    "amazon-adsystem.com",
    "criteo.com",
    "rubiconproject.com",
    "pubmatic.com",
    "openx.net",
    "taboola.com",
    "outbrain.com",
    "2mdn.net",
    "adsafeprotected.com",
];

#[derive(Deserialize)]
pub struct ProxyQuery {
    url: Option<String>,
}

/// `GET|POST|… /p/<token>` and the legacy `/external/<token>` alias.
///
/// GET redirects with 302 (what the endpoint contract and browsers expect);
/// other methods get 307 so method and body survive the hop. A token opening
/// with `s/` is a short-URL hash.
pub async fn entry(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
) -> ProxyResult<Response> {
    if token.is_empty() {
        return Err(ProxyError::MalformedToken);
    }

    if let Some(hash) = token.strip_prefix("s/") {
        let target = state.short_urls.lookup(hash).ok_or(ProxyError::NotFound)?;
        let location = format!("/api/proxy?url={}", codec::encode(&target));
        return Ok(redirect(StatusCode::FOUND, &location));
    }

    let mut location = format!("/api/proxy?url={}", token);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        location.push('&');
        location.push_str(&query);
    }

    let status = if method == Method::GET {
        StatusCode::FOUND
    } else {
        StatusCode::TEMPORARY_REDIRECT
    };
    Ok(redirect(status, &location))
}

pub async fn proxy_get(
    State(state): State<SharedState>,
    Query(params): Query<ProxyQuery>,
    headers: HeaderMap,
) -> ProxyResult<Response> {
    let token = params.url.ok_or(ProxyError::MissingParam("url"))?;
    handle(state, headers, Method::GET, &token, None).await
}

pub async fn proxy_post(
    State(state): State<SharedState>,
    Query(params): Query<ProxyQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ProxyResult<Response> {
    let token = params.url.ok_or(ProxyError::MissingParam("url"))?;
    // The body is forwarded as the raw byte stream; no re-parsing.
    handle(state, headers, Method::POST, &token, Some(body)).await
}

async fn handle(
    state: SharedState,
    headers: HeaderMap,
    method: Method,
    token: &str,
    body: Option<Bytes>,
) -> ProxyResult<Response> {
    let flow_id = Uuid::now_v7();

    let target = codec::decode(token).map_err(|_| ProxyError::MalformedToken)?;
    ssrf::validate(&target).map_err(ProxyError::Forbidden)?;

    let (session, set_cookie) = bind_session(&state, &headers);
    state.telemetry.emit(
        "proxy_request",
        flow_id,
        json!({ "host": target.host_str(), "method": method.as_str() }),
    );

    let browser = BrowserContext::from_headers(&headers);
    let pre_binary = classify::is_binary_url(&target);
    let outcome = if pre_binary {
        state
            .dispatcher
            .fetch_binary(&target, method, &browser, body, &session)
            .await
    } else {
        state
            .dispatcher
            .fetch_text(&target, method, &browser, body, &session)
            .await
    }
    .map_err(map_fetch_error)?;

    // Early terminal: translate Location back onto the proxy origin.
    if let Some(location) = outcome.redirect.clone() {
        state.telemetry.emit(
            "proxy_redirect",
            flow_id,
            json!({ "status": outcome.status.as_u16() }),
        );
        return Ok(attach_cookie(
            redirect_to_proxy(&outcome, &target, &location),
            set_cookie,
        ));
    }

    let class = if pre_binary {
        ContentClass::Binary
    } else {
        classify::classify(outcome.content_type())
    };

    let response = match class {
        ContentClass::Html => {
            let mode = if is_ad_frame_host(&target) {
                RewriteMode::AdFrame
            } else {
                RewriteMode::Page
            };
            let rewritten = rewrite_html(&outcome.body_text(), &target, mode, &state.scripts);

            let mut out = filtered_headers(&outcome.headers);
            out.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            if mode == RewriteMode::Page {
                out.insert(
                    header::CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static(PERMISSIVE_CSP),
                );
                // Referer for the session's next request.
                session.set_current_page(target.clone());
            }
            (outcome.status, out, Bytes::from(rewritten)).into_response()
        }
        ContentClass::Css => {
            let rewritten = rewrite_css(&outcome.body_text(), &target);
            let mut out = filtered_headers(&outcome.headers);
            out.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/css; charset=utf-8"),
            );
            (outcome.status, out, Bytes::from(rewritten)).into_response()
        }
        ContentClass::Js => {
            let rewritten = rewrite_js(&outcome.body_text());
            let mut out = filtered_headers(&outcome.headers);
            out.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/javascript; charset=utf-8"),
            );
            (outcome.status, out, Bytes::from(rewritten)).into_response()
        }
        // Json, Xml, Text, Binary: verbatim bytes, whitelist headers.
        _ => {
            let out = filtered_headers(&outcome.headers);
            (outcome.status, out, outcome.body.clone()).into_response()
        }
    };

    Ok(attach_cookie(response, set_cookie))
}

/// `ALL /hcdn-cgi/*` — transparent forward to the configured target site with
/// the frame-busting and policy headers withheld.
pub async fn cdn_passthrough(
    State(state): State<SharedState>,
    Path(rest): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ProxyResult<Response> {
    let mut target = Url::parse(&state.settings.target_site)
        .map_err(|err| ProxyError::Internal(anyhow::anyhow!("invalid TARGET_SITE: {err}")))?;
    target.set_path(&format!("/hcdn-cgi/{}", rest));
    target.set_query(query.as_deref());

    ssrf::validate(&target).map_err(ProxyError::Forbidden)?;
    let (session, set_cookie) = bind_session(&state, &headers);

    let browser = BrowserContext::from_headers(&headers);
    let payload = (!body.is_empty()).then_some(body);
    let outcome = state
        .dispatcher
        .fetch(&target, method, &browser, payload, &session)
        .await
        .map_err(map_fetch_error)?;

    let mut out = HeaderMap::new();
    for (name, value) in outcome.headers.iter() {
        if is_blocked_passthrough_header(name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    Ok(attach_cookie(
        (outcome.status, out, outcome.body.clone()).into_response(),
        set_cookie,
    ))
}

fn is_blocked_passthrough_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "content-security-policy"
            | "content-security-policy-report-only"
            | "x-frame-options"
            | "x-xss-protection"
            | "transfer-encoding"
            | "content-encoding"
            | "content-length"
            | "connection"
            | "set-cookie"
    )
}

fn map_fetch_error(err: FetchError) -> ProxyError {
    ProxyError::Upstream(err.to_string())
}

/// Whitelist filter for proxied responses. CSP, its report-only twin,
/// X-Frame-Options, and X-XSS-Protection never pass — the rewriter owns
/// policy on this origin.
fn filtered_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        if let Some(value) = upstream.get(name) {
            out.insert(name.clone(), value.clone());
        }
    }
    out
}

fn redirect_to_proxy(outcome: &FetchOutcome, target: &Url, location: &str) -> Response {
    let translated = codec::resolve_against(target, location)
        .map(|resolved| codec::proxy_path(&resolved))
        .unwrap_or_else(|| location.to_string());

    let status = if outcome.status.is_redirection() {
        outcome.status
    } else {
        StatusCode::FOUND
    };
    redirect(status, &translated)
}

fn redirect(status: StatusCode, location: &str) -> Response {
    let mut response = status.into_response();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

fn attach_cookie(mut response: Response, set_cookie: Option<HeaderValue>) -> Response {
    if let Some(value) = set_cookie {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

fn is_ad_frame_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    AD_FRAME_HOSTS
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ad_frame_hosts_match_by_suffix() {
        let ad = Url::parse("https://tpc.googlesyndication.com/safeframe/1").unwrap();
        assert!(is_ad_frame_host(&ad));
        let page = Url::parse("https://ex.com/page").unwrap();
        assert!(!is_ad_frame_host(&page));
        // No bare-suffix false positives.
        let tricky = Url::parse("https://notdoubleclick.net/x").unwrap();
        assert!(!is_ad_frame_host(&tricky));
    }

    #[test]
    fn header_filter_forwards_only_the_whitelist() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::CONTENT_TYPE, "text/css".parse().unwrap());
        upstream.insert(header::CACHE_CONTROL, "max-age=60".parse().unwrap());
        upstream.insert(header::ETAG, "\"abc\"".parse().unwrap());
        upstream.insert(header::CONTENT_SECURITY_POLICY, "default-src 'none'".parse().unwrap());
        upstream.insert(header::X_FRAME_OPTIONS, "DENY".parse().unwrap());
        upstream.insert("x-xss-protection", "1; mode=block".parse().unwrap());
        upstream.insert("server", "nginx".parse().unwrap());

        let out = filtered_headers(&upstream);
        assert_eq!(out.len(), 3);
        assert!(out.get(header::CONTENT_SECURITY_POLICY).is_none());
        assert!(out.get(header::X_FRAME_OPTIONS).is_none());
        assert!(out.get("x-xss-protection").is_none());
        assert!(out.get("server").is_none());
    }

    #[test]
    fn redirect_translation_lands_on_proxy_origin() {
        let target = Url::parse("https://ex.com/page").unwrap();
        let outcome = FetchOutcome {
            status: StatusCode::FOUND,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            final_url: target.clone(),
            redirect: Some("https://ex.com/new".into()),
        };
        let response = redirect_to_proxy(&outcome, &target, "https://ex.com/new");
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get(header::LOCATION).unwrap();
        assert_eq!(
            location.to_str().unwrap(),
            codec::proxy_path(&Url::parse("https://ex.com/new").unwrap())
        );
    }

    #[test]
    fn relative_redirects_resolve_before_translation() {
        let target = Url::parse("https://ex.com/dir/page").unwrap();
        let outcome = FetchOutcome {
            status: StatusCode::MOVED_PERMANENTLY,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            final_url: target.clone(),
            redirect: Some("../other".into()),
        };
        let response = redirect_to_proxy(&outcome, &target, "../other");
        let location = response.headers().get(header::LOCATION).unwrap();
        assert_eq!(
            location.to_str().unwrap(),
            codec::proxy_path(&Url::parse("https://ex.com/other").unwrap())
        );
    }
}
