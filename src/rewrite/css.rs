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

//! CSS rewriting.
//!
//! The URL-bearing grammar in CSS is closed: `url(...)`, `@import "…"`, and
//! `@import url(...)`. Three regex patterns cover all of it; a tokenizer is
//! not required. Values that are inline payloads, fragments, pseudo-schemes,
//! or already proxied stay verbatim, which also makes the rewrite idempotent.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use url::Url;

use crate::codec;

// The regex crate has no backreferences, so each quoting style gets its own
// named group and the replacement re-emits whichever one matched.
static CSS_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)url\(\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<bare>[^"')][^)\s]*))\s*\)"#,
    )
    .expect("valid CSS url() regex")
});

static CSS_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)@import\s+(?:"(?P<dq>[^"]+)"|'(?P<sq>[^']+)')"#)
        .expect("valid CSS @import regex")
});

/// Rewrite a full stylesheet (or `<style>` element body) against the URL the
/// stylesheet was served from.
pub fn rewrite_css(css: &str, base: &Url) -> String {
    let pass1 = CSS_URL_RE.replace_all(css, |caps: &Captures| rewrite_url_capture(caps, base));
    CSS_IMPORT_RE
        .replace_all(&pass1, |caps: &Captures| {
            let (raw, quote) = extract(caps);
            match codec::rewrite_url_value(base, raw) {
                Some(proxied) => format!("@import {q}{proxied}{q}", q = quote),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Inline `style="…"` attributes only ever carry `url(...)`.
pub fn rewrite_inline_style(style: &str, base: &Url) -> String {
    CSS_URL_RE
        .replace_all(style, |caps: &Captures| rewrite_url_capture(caps, base))
        .into_owned()
}

fn rewrite_url_capture(caps: &Captures, base: &Url) -> String {
    let (raw, quote) = extract(caps);
    match codec::rewrite_url_value(base, raw) {
        Some(proxied) => format!("url({q}{proxied}{q})", q = quote),
        None => caps[0].to_string(),
    }
}

/// Pull out whichever quoting-style group matched, plus the quote to re-emit.
fn extract<'c>(caps: &'c Captures) -> (&'c str, &'static str) {
    if let Some(m) = caps.name("dq") {
        (m.as_str(), "\"")
    } else if let Some(m) = caps.name("sq") {
        (m.as_str(), "'")
    } else {
        (caps.name("bare").map(|m| m.as_str()).unwrap_or(""), "")
    }
}
