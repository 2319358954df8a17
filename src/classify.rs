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

//! Response classification.
//!
//! Two-stage decision: a URL-suffix pre-check routes obvious binaries down
//! the byte-preserving path before the fetch, and a content-type check after
//! the fetch catches servers that lie about types or suffix-less URLs.

use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Html,
    Css,
    Js,
    Text,
    Json,
    Xml,
    Binary,
}

/// File suffixes that always take the byte-preserving path.
const BINARY_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".avif", ".ico", ".bmp", ".tiff", ".svg",
    ".woff", ".woff2", ".ttf", ".otf", ".eot",
    ".mp3", ".wav", ".ogg", ".oga", ".m4a", ".flac", ".aac",
    ".mp4", ".webm", ".mkv", ".avi", ".mov", ".m4v", ".ts",
    ".zip", ".gz", ".tar", ".rar", ".7z", ".bz2",
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
    ".wasm", ".swf", ".bin", ".exe", ".dmg", ".apk",
];

/// Content-type prefixes that classify as binary regardless of suffix.
const BINARY_TYPE_PREFIXES: &[&str] = &[
    "image/",
    "audio/",
    "video/",
    "font/",
    "application/octet-stream",
    "application/pdf",
    "application/zip",
    "application/gzip",
    "application/wasm",
    "application/vnd.",
    "application/x-font",
];

/// Pre-fetch check: does the URL path end in a known binary extension?
pub fn is_binary_url(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    BINARY_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Post-fetch classification from the response Content-Type.
///
/// `image/svg+xml` lands in Binary via the `image/` prefix on purpose: SVG is
/// served verbatim rather than risking XML re-encoding surprises.
pub fn classify(content_type: &str) -> ContentClass {
    let ct = content_type.to_ascii_lowercase();

    if BINARY_TYPE_PREFIXES.iter().any(|p| ct.starts_with(p)) {
        return ContentClass::Binary;
    }

    if ct.contains("text/html") {
        ContentClass::Html
    } else if ct.contains("text/css") {
        ContentClass::Css
    } else if ct.contains("javascript") || ct.contains("ecmascript") {
        ContentClass::Js
    } else if ct.contains("application/json") {
        ContentClass::Json
    } else if ct.contains("application/xml") || ct.contains("text/xml") {
        ContentClass::Xml
    } else if ct.starts_with("text/") {
        ContentClass::Text
    } else {
        ContentClass::Binary
    }
}

impl ContentClass {
    /// Classes whose bodies are parsed and rewritten rather than passed
    /// through byte-for-byte.
    pub fn is_rewritable(self) -> bool {
        matches!(self, ContentClass::Html | ContentClass::Css | ContentClass::Js)
    }
}
