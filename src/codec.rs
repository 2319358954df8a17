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

//! URL token codec.
//!
//! Every external URL that flows through the proxy is carried on-origin as
//! `/p/<token>` where the token is URL-safe base64 of the UTF-8 URL bytes,
//! padding stripped. `encode`/`decode` form a bijection on well-formed
//! absolute http(s) URLs; everything else fails with `MalformedToken`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;
use url::Url;

pub const PROXY_PREFIX: &str = "/p/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed token")]
    MalformedToken,
}

/// Encode an absolute URL into a path-safe token. Pure and total.
pub fn encode(url: &Url) -> String {
    URL_SAFE_NO_PAD.encode(url.as_str().as_bytes())
}

/// Build the canonical on-origin path for an external URL.
pub fn proxy_path(url: &Url) -> String {
    format!("{}{}", PROXY_PREFIX, encode(url))
}

/// Decode a token back into the absolute URL it encodes.
///
/// Lenient about alphabet variants and stray padding: `+`/`/` are accepted in
/// place of `-`/`_` and trailing `=` is ignored, so tokens survive careless
/// copy-paste through standard-base64 tooling. The decoded bytes must be
/// valid UTF-8 and parse as an absolute http(s) URL.
pub fn decode(token: &str) -> Result<Url, CodecError> {
    let normalized: String = token
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|_| CodecError::MalformedToken)?;
    let raw = String::from_utf8(bytes).map_err(|_| CodecError::MalformedToken)?;

    let url = Url::parse(&raw).map_err(|_| CodecError::MalformedToken)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(CodecError::MalformedToken),
    }
}

/// Cheap shape probe used only to dispatch malformed `/p/` paths toward the
/// relative-path repair branch. A token-shaped string is long enough, stays
/// inside the base64url alphabet, and is not filename-shaped (a dotted name
/// with no underscore under 20 chars reads as `logo.png`, not a token).
pub fn looks_like_token(candidate: &str) -> bool {
    if candidate.len() < 10 {
        return false;
    }
    if !candidate
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return false;
    }
    if candidate.contains('.') && !candidate.contains('_') && candidate.len() < 20 {
        return false;
    }
    true
}

/// Resolve a raw attribute value against a base URL.
///
/// Protocol-relative `//host/...` is upgraded to `https:` before parsing;
/// anything else joins RFC 3986-style via the base. Returns `None` when the
/// result is not an absolute http(s) URL.
pub fn resolve_against(base: &Url, raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let resolved = if let Some(rest) = trimmed.strip_prefix("//") {
        Url::parse(&format!("https://{}", rest)).ok()?
    } else {
        base.join(trimmed).ok()?
    };

    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}

/// Values the rewriters must leave untouched: inline payloads, pseudo
/// schemes, fragments, and URLs that already point at the proxy.
pub fn is_skippable(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return true;
    }
    let lower = trimmed.to_ascii_lowercase();
    lower.starts_with("data:")
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("about:")
        || lower.starts_with("blob:")
        || trimmed.starts_with(PROXY_PREFIX)
}

/// Resolve + encode in one step: the operation every rewriter performs per
/// URL-bearing value. Skippable and unresolvable values come back unchanged.
pub fn rewrite_url_value(base: &Url, raw: &str) -> Option<String> {
    if is_skippable(raw) {
        return None;
    }
    resolve_against(base, raw).map(|resolved| proxy_path(&resolved))
}
