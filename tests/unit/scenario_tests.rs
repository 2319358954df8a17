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

//! End-to-end invariants exercised across module boundaries.

use std::time::Duration;

use url::Url;

use veil_proxy::assets::ScriptBundle;
use veil_proxy::classify::{classify, is_binary_url, ContentClass};
use veil_proxy::codec;
use veil_proxy::config::UpstreamSettings;
use veil_proxy::rewrite::{rewrite_css, rewrite_html, RewriteMode};
use veil_proxy::session::SessionStore;
use veil_proxy::upstream::credentials::sticky_username;

fn url(s: &str) -> Url {
    Url::parse(s).expect("valid url")
}

/// Scenario: the canonical wire token for `https://ex.com/page`.
#[test]
fn canonical_token_vector() {
    let page = url("https://ex.com/page");
    assert_eq!(codec::encode(&page), "aHR0cHM6Ly9leC5jb20vcGFnZQ");
    assert_eq!(
        codec::decode("aHR0cHM6Ly9leC5jb20vcGFnZQ").unwrap(),
        page
    );
}

/// Scenario: a page fetch rewrites `<a href="/about">` to the exact expected
/// token, injects the runtime layer, and carries no upstream CSP meta.
#[test]
fn basic_page_rewrite_end_to_end() {
    let page = url("https://ex.com/page");
    let upstream_body = concat!(
        r#"<html><head>"#,
        r#"<meta http-equiv="Content-Security-Policy" content="default-src 'self'">"#,
        r#"</head><body><a href="/about">about</a></body></html>"#,
    );

    let out = rewrite_html(upstream_body, &page, RewriteMode::Page, &ScriptBundle::load());

    assert!(out.contains("/p/aHR0cHM6Ly9leC5jb20vYWJvdXQ"));
    assert!(out.contains("__veil_webrtc_guard"));
    assert!(out.contains("__veil_runtime_version"));
    assert!(!out.contains("Content-Security-Policy"));
}

/// Redirect translation: an upstream Location maps to the exact `/p/` path.
#[test]
fn redirect_location_translates_to_proxy_path() {
    let target = url("https://ex.com/page");
    let resolved = codec::resolve_against(&target, "https://ex.com/new").unwrap();
    assert_eq!(codec::proxy_path(&resolved), "/p/aHR0cHM6Ly9leC5jb20vbmV3");
}

/// Scenario: binary URLs pre-detect before any fetch, and SVG content-types
/// classify binary even though they are XML underneath.
#[test]
fn binary_detection_both_stages() {
    assert!(is_binary_url(&url("https://ex.com/cat.png")));
    assert_eq!(classify("image/png"), ContentClass::Binary);
    assert_eq!(classify("image/svg+xml"), ContentClass::Binary);
    assert_eq!(classify("text/html; charset=utf-8"), ContentClass::Html);
}

/// Scenario: the sticky upstream username is character-for-character stable
/// for a fixed session and configuration.
#[test]
fn sticky_identity_is_stable() {
    let cfg = UpstreamSettings {
        use_proxy: true,
        host: "gw.example.net".into(),
        port: 1080,
        protocol: "socks5".into(),
        base_user: "Ashish".into(),
        password: "secret".into(),
        zone: "custom".into(),
        region: "US".into(),
        session_time_minutes: 120,
    };

    let first = sticky_username(&cfg, "s1");
    let second = sticky_username(&cfg, "s1");
    assert_eq!(first, "Ashish-zone-custom-region-US-sessid-s1-sessTime-120");
    assert_eq!(first, second);
}

/// Scenario: a Set-Cookie with Max-Age is presented on the next request and
/// stops being presented after it expires.
#[test]
fn cookie_round_trip_with_expiry() {
    let store = SessionStore::new(Duration::from_secs(600));
    let (session, _) = store.get_or_create(None);

    session.store_cookies(
        "ex.com",
        ["id=42; Domain=.ex.com; Path=/; Max-Age=1"].into_iter(),
    );
    assert_eq!(
        session.cookie_header_for("ex.com", "/next").as_deref(),
        Some("id=42")
    );

    std::thread::sleep(Duration::from_millis(1100));
    assert!(session.cookie_header_for("ex.com", "/next").is_none());
}

/// Round-trip law: resolve → encode → decode yields the resolved absolute.
#[test]
fn resolve_encode_decode_law() {
    let base = url("https://ex.com/a/b/page.html");
    for raw in ["../up", "/rooted", "sibling?q=1", "//cdn.ex.com/x.js"] {
        let resolved = codec::resolve_against(&base, raw).unwrap();
        let token = codec::encode(&resolved);
        assert_eq!(codec::decode(&token).unwrap(), resolved);
    }
}

/// Idempotence across both rewriters on a combined document.
#[test]
fn rewriters_are_idempotent_together() {
    let page = url("https://ex.com/page");
    let bundle = ScriptBundle::load();
    let html = concat!(
        r#"<html><head><style>body{background:url(/bg.png)}</style></head>"#,
        r#"<body><a href="/about">x</a></body></html>"#,
    );

    let once = rewrite_html(html, &page, RewriteMode::Page, &bundle);
    let twice = rewrite_html(&once, &page, RewriteMode::Page, &bundle);
    assert_eq!(once, twice);

    let css = "a{background:url(/bg.png)} @import 'more.css';";
    let css_base = url("https://ex.com/styles/site.css");
    let css_once = rewrite_css(css, &css_base);
    assert_eq!(rewrite_css(&css_once, &css_base), css_once);
}

/// Zero-length and oversized URLs sit at the codec's boundaries: empty input
/// is a malformed token, an 11 KB ad URL still round-trips.
#[test]
fn codec_boundary_lengths() {
    assert!(codec::decode("").is_err());

    let long = format!(
        "https://www.googleadservices.com/pagead/aclk?sa=L&ai={}",
        "A".repeat(11_000)
    );
    let u = url(&long);
    let token = codec::encode(&u);
    assert!(token.len() > veil_proxy::shorturl::LONG_TOKEN_THRESHOLD);
    assert_eq!(codec::decode(&token).unwrap(), u);
}
