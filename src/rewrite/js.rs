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

//! JavaScript rewriting.
//!
//! Deliberately narrow: only string and template literals holding absolute
//! (or protocol-relative) URLs on a fixed list of high-value third-party
//! hosts are rewritten. Dynamically assembled URLs are the runtime layer's
//! job — the service worker catches whatever slips past this pass.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use url::Url;

use crate::codec;

/// Ad networks, analytics, and major CDNs whose absolute URLs inside scripts
/// would otherwise punch straight through the proxy.
const REWRITABLE_JS_HOSTS: &[&str] = &[
    "doubleclick.net",
    "googlesyndication.com",
    "googleadservices.com",
    "googletagmanager.com",
    "googletagservices.com",
    "google-analytics.com",
    "googleapis.com",
    "gstatic.com",
    "adnxs.com",
    "amazon-adsystem.com",
    "criteo.com",
    "criteo.net",
    "rubiconproject.com",
    "pubmatic.com",
    "openx.net",
    "taboola.com",
    "outbrain.com",
    "scorecardresearch.com",
    "facebook.net",
    "cloudflare.com",
    "cdnjs.cloudflare.com",
    "jsdelivr.net",
    "unpkg.com",
];

// One pattern per literal delimiter; the regex crate has no backreferences.
static DQ_LITERAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?P<url>(?:https?:)?//[^"\s]+)""#).expect("valid dq literal regex")
});
static SQ_LITERAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"'(?P<url>(?:https?:)?//[^'\s]+)'"#).expect("valid sq literal regex")
});
static TPL_LITERAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"`(?P<url>(?:https?:)?//[^`\s$]+)`"#).expect("valid template literal regex")
});

/// Rewrite URL literals pointing at the allow-listed third-party hosts.
pub fn rewrite_js(js: &str) -> String {
    if js.is_empty() {
        return String::new();
    }

    let pass = DQ_LITERAL_RE.replace_all(js, |caps: &Captures| replace_literal(caps, '"'));
    let pass = SQ_LITERAL_RE.replace_all(&pass, |caps: &Captures| replace_literal(caps, '\''));
    TPL_LITERAL_RE
        .replace_all(&pass, |caps: &Captures| replace_literal(caps, '`'))
        .into_owned()
}

fn replace_literal(caps: &Captures, quote: char) -> String {
    let raw = &caps["url"];
    match proxied_form(raw) {
        Some(path) => format!("{quote}{path}{quote}"),
        None => caps[0].to_string(),
    }
}

fn proxied_form(raw: &str) -> Option<String> {
    let absolute = if let Some(rest) = raw.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        raw.to_string()
    };

    let url = Url::parse(&absolute).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    if !host_is_rewritable(host) {
        return None;
    }
    Some(codec::proxy_path(&url))
}

fn host_is_rewritable(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    REWRITABLE_JS_HOSTS
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_known_ad_hosts_only() {
        let js = r#"load("https://securepubads.doubleclick.net/tag/js/gpt.js");
fetch('https://api.my-own-site.com/data');"#;
        let out = rewrite_js(js);
        assert!(out.contains("\"/p/"));
        assert!(out.contains("https://api.my-own-site.com/data"));
    }

    #[test]
    fn handles_protocol_relative_literals() {
        let js = r#"var s = '//www.googletagmanager.com/gtm.js?id=1';"#;
        let out = rewrite_js(js);
        assert!(out.contains("'/p/"));
        let token = out.split("/p/").nth(1).unwrap().trim_end_matches("';");
        assert!(crate::codec::decode(token)
            .unwrap()
            .as_str()
            .starts_with("https://www.googletagmanager.com/"));
    }

    #[test]
    fn template_literals_without_interpolation_are_rewritten() {
        let js = "const u = `https://cdnjs.cloudflare.com/lib.js`;";
        assert!(rewrite_js(js).contains("`/p/"));
        // Interpolated templates are dynamic; left to the runtime layer.
        let dynamic = "const u = `https://cdnjs.cloudflare.com/${name}.js`;";
        assert_eq!(rewrite_js(dynamic), dynamic);
    }

    #[test]
    fn already_proxied_and_unknown_hosts_are_untouched() {
        let js = r#"a("/p/aHR0cHM6Ly9leC5jb20v"); b("https://ex.com/app.js");"#;
        assert_eq!(rewrite_js(js), js);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let js = r#"load("https://www.google-analytics.com/analytics.js");"#;
        let once = rewrite_js(js);
        assert_eq!(rewrite_js(&once), once);
    }
}
