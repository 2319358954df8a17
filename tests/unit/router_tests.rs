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

//! HTTP-surface tests driven through the router with tower's oneshot —
//! everything here stays off the network.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use veil_proxy::assets::ScriptBundle;
use veil_proxy::codec;
use veil_proxy::config::{RunEnv, Settings, UpstreamSettings};
use veil_proxy::routes::{build_router, AppState};
use veil_proxy::session::SessionStore;
use veil_proxy::shorturl::ShortUrlTable;
use veil_proxy::telemetry::TelemetrySink;
use veil_proxy::upstream::Dispatcher;

fn test_settings() -> Settings {
    Settings {
        host: "127.0.0.1".into(),
        port: 0,
        target_site: "https://news.example.org".into(),
        run_env: RunEnv::Development,
        session_ttl_minutes: 120,
        session_cookie_name: "proxy_session".into(),
        upstream: UpstreamSettings {
            use_proxy: true,
            host: "gw.example.net".into(),
            port: 1080,
            protocol: "socks5".into(),
            base_user: "Ashish".into(),
            password: "secret".into(),
            zone: "custom".into(),
            region: "US".into(),
            session_time_minutes: 120,
        },
    }
}

fn test_router() -> Router {
    let settings = test_settings();
    let state = Arc::new(AppState {
        sessions: SessionStore::new(settings.session_ttl()),
        dispatcher: Dispatcher::new(settings.upstream.clone()),
        short_urls: ShortUrlTable::new(std::time::Duration::from_secs(3600)),
        scripts: ScriptBundle::load(),
        telemetry: TelemetrySink::new(false),
        settings,
    });
    build_router(state)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body readable");
    String::from_utf8_lossy(&bytes).into_owned()
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .body(Body::empty())
        .expect("valid request")
}

#[tokio::test]
async fn health_reports_ok() {
    let response = test_router().oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("\"status\":\"ok\""));
    assert!(body.contains("timestamp"));
}

#[tokio::test]
async fn status_exposes_upstream_host_but_never_credentials() {
    let response = test_router().oneshot(get("/api/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("gw.example.net"));
    assert!(body.contains("news.example.org"));
    assert!(!body.contains("secret"));
}

#[tokio::test]
async fn landing_substitutes_the_target_site() {
    let response = test_router().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("https://news.example.org"));
    assert!(!body.contains("{{target_site}}"));
}

#[tokio::test]
async fn service_worker_has_scope_and_cache_headers() {
    let response = test_router().oneshot(get("/sw.js")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("service-worker-allowed").unwrap(),
        "/"
    );
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    let ct = response.headers().get(header::CONTENT_TYPE).unwrap();
    assert!(ct.to_str().unwrap().contains("javascript"));
}

#[tokio::test]
async fn p_token_redirects_to_api_proxy_preserving_query() {
    let token = "aHR0cHM6Ly9leC5jb20vcGFnZQ";
    let response = test_router()
        .oneshot(get(&format!("/p/{token}?extra=1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
    assert_eq!(location, format!("/api/proxy?url={token}&extra=1"));
}

#[tokio::test]
async fn external_alias_is_accepted_on_input() {
    let token = "aHR0cHM6Ly9leC5jb20vcGFnZQ";
    let response = test_router()
        .oneshot(get(&format!("/external/{token}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
    assert_eq!(location, format!("/api/proxy?url={token}"));
}

#[tokio::test]
async fn non_get_entry_redirects_preserve_the_method() {
    let token = "aHR0cHM6Ly9leC5jb20vcGFnZQ";
    let request = Request::builder()
        .method("POST")
        .uri(format!("/p/{token}"))
        .body(Body::empty())
        .unwrap();
    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
}

#[tokio::test]
async fn malformed_token_is_rejected_with_400() {
    let response = test_router()
        .oneshot(get("/api/proxy?url=!!!not-a-token!!!"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.contains("Invalid encoded URL"));
}

#[tokio::test]
async fn missing_url_param_is_rejected_with_400() {
    let response = test_router().oneshot(get("/api/proxy")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ssrf_rejection_surfaces_the_reason() {
    let loopback = url::Url::parse("http://127.0.0.1:9090/admin").unwrap();
    let token = codec::encode(&loopback);
    let response = test_router()
        .oneshot(get(&format!("/api/proxy?url={token}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.contains("not routable"));
}

#[tokio::test]
async fn unknown_routes_return_404_json() {
    let response = test_router().oneshot(get("/api/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_string(response).await;
    assert!(body.contains("Not found"));
}

#[tokio::test]
async fn session_lifecycle_over_the_api() {
    let router = test_router();

    // Create.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("session cookie set")
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("proxy_session="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    // Development env: no Secure flag.
    assert!(!set_cookie.contains("Secure"));

    let cookie_pair = set_cookie.split(';').next().unwrap().to_string();

    // Inspect with the cookie.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/session")
                .header(header::COOKIE, &cookie_pair)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_string(response).await;
    assert!(body.contains("\"hasSession\":true"));

    // Delete, then inspect again.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/session")
                .header(header::COOKIE, &cookie_pair)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/session")
                .header(header::COOKIE, &cookie_pair)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_string(response).await;
    assert!(body.contains("\"hasSession\":false"));
}

#[tokio::test]
async fn shorten_then_follow_the_short_path() {
    let router = test_router();
    let long_target = format!("https://ad.ex.com/aclk?blob={}", "x".repeat(4000));

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/shorten")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!("{{\"url\":\"{long_target}\"}}")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let hash = parsed["hash"].as_str().unwrap().to_string();
    assert_eq!(hash.len(), 12);
    assert_eq!(parsed["shortUrl"].as_str().unwrap(), format!("/p/s/{hash}"));

    // Follow the short form: redirect carries the full encoded URL.
    let response = router
        .clone()
        .oneshot(get(&format!("/p/s/{hash}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
    let token = location.strip_prefix("/api/proxy?url=").unwrap();
    assert_eq!(codec::decode(token).unwrap().as_str(), long_target);

    // Stats reflect the entry.
    let response = router.oneshot(get("/api/url-stats")).await.unwrap();
    let body = body_string(response).await;
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["totalUrls"], 1);
    assert_eq!(parsed["maxPathLength"], 1500);
    assert_eq!(parsed["ttlMinutes"], 60);
}

#[tokio::test]
async fn unknown_short_hash_is_404() {
    let response = test_router().oneshot(get("/p/s/doesnotexist")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn click_beacon_requires_click_url() {
    let response = test_router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/click-beacon")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
