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

//! Upstream dispatcher.
//!
//! Executes HTTP against the target site through the SOCKS5 gateway with the
//! session's sticky identity. Redirects are never followed — a 3xx surfaces
//! its Location so the router can translate it back onto the proxy origin.
//! Bodies come back decompressed; Set-Cookie lines are captured into the
//! session jar before the caller ever sees the response.

pub mod credentials;

use std::io::Read;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use http::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONTENT_ENCODING, CONTENT_LENGTH, COOKIE, LOCATION,
    REFERER, SET_COOKIE, TRANSFER_ENCODING, USER_AGENT,
};
use http::{HeaderMap, Method, StatusCode};
use reqwest::{Client, Proxy};
use thiserror::Error;
use url::Url;

use crate::config::UpstreamSettings;
use crate::session::Session;
use credentials::sticky_username;

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 3;

/// Upstream statuses worth another attempt; everything else is forwarded.
const RETRYABLE_STATUSES: &[u16] = &[408, 429, 502, 503, 504];

/// Fallback UA for clients that send none (curl probes, health checks).
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream retries exhausted: {0}")]
    Exhausted(String),

    #[error("upstream client could not be built: {0}")]
    Build(String),

    #[error("upstream response body unreadable: {0}")]
    Body(String),
}

/// The browser-derived request context mirrored upstream. Only these headers
/// travel: everything else (Host, Origin, X-Forwarded-For, the browser's real
/// Referer) is deliberately absent.
#[derive(Debug, Default, Clone)]
pub struct BrowserContext {
    pub user_agent: Option<String>,
    /// `X-Original-UA` — the service worker preserves the UA here when the
    /// platform rewrites the outer header.
    pub original_user_agent: Option<String>,
    pub accept: Option<String>,
    pub accept_language: Option<String>,
}

impl BrowserContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let grab = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        Self {
            user_agent: grab("user-agent"),
            original_user_agent: grab("x-original-ua"),
            accept: grab("accept"),
            accept_language: grab("accept-language"),
        }
    }

    fn effective_user_agent(&self) -> &str {
        self.original_user_agent
            .as_deref()
            .or(self.user_agent.as_deref())
            .unwrap_or(DEFAULT_USER_AGENT)
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Decompressed body bytes; byte-identical to the upstream plaintext.
    pub body: Bytes,
    pub final_url: Url,
    /// Raw Location header when the upstream answered 3xx.
    pub redirect: Option<String>,
}

impl FetchOutcome {
    pub fn is_redirect(&self) -> bool {
        self.redirect.is_some()
    }

    pub fn content_type(&self) -> &str {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One dispatcher per process. Clients are pooled per sticky username so a
/// session's keep-alive connections retain their exit IP.
pub struct Dispatcher {
    cfg: UpstreamSettings,
    clients: DashMap<String, Client>,
}

impl Dispatcher {
    pub fn new(cfg: UpstreamSettings) -> Self {
        Self {
            cfg,
            clients: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &UpstreamSettings {
        &self.cfg
    }

    /// Execute one upstream request with retries. See module docs for the
    /// redirect/cookie/decompression contract.
    pub async fn fetch(
        &self,
        url: &Url,
        method: Method,
        browser: &BrowserContext,
        body: Option<Bytes>,
        session: &Session,
    ) -> Result<FetchOutcome, FetchError> {
        let client = self.client_for(session)?;
        let host = url.host_str().unwrap_or_default().to_string();

        let mut attempt: u32 = 0;
        loop {
            let mut request = client
                .request(method.clone(), url.clone())
                .timeout(ATTEMPT_TIMEOUT)
                .header(USER_AGENT, browser.effective_user_agent())
                .header(ACCEPT_ENCODING, "gzip, deflate, br");

            if let Some(accept) = &browser.accept {
                request = request.header(ACCEPT, accept);
            }
            if let Some(lang) = &browser.accept_language {
                request = request.header(ACCEPT_LANGUAGE, lang);
            }
            // Referer is the last page this session actually received —
            // never the proxy's own URL.
            if let Some(page) = session.current_page() {
                if page.as_str() != url.as_str() {
                    request = request.header(REFERER, page.as_str());
                }
            }
            if let Some(cookie_header) = session.cookie_header_for(&host, url.path()) {
                request = request.header(COOKIE, cookie_header);
            }
            if let Some(bytes) = &body {
                request = request.body(bytes.clone());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if RETRYABLE_STATUSES.contains(&status.as_u16()) && attempt < MAX_RETRIES {
                        attempt += 1;
                        let delay = backoff_delay(attempt);
                        tracing::debug!(%url, %status, attempt, ?delay, "retryable upstream status");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return self.finish(response, &host, session).await;
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt < MAX_RETRIES {
                        attempt += 1;
                        let delay = backoff_delay(attempt);
                        tracing::debug!(%url, error = %err, attempt, ?delay, "retryable upstream error");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(FetchError::Exhausted(err.to_string()));
                }
            }
        }
    }

    /// Thin wrapper kept for call sites that semantically want text.
    pub async fn fetch_text(
        &self,
        url: &Url,
        method: Method,
        browser: &BrowserContext,
        body: Option<Bytes>,
        session: &Session,
    ) -> Result<FetchOutcome, FetchError> {
        self.fetch(url, method, browser, body, session).await
    }

    /// Thin wrapper for the byte-preserving path; the outcome body is always
    /// the exact upstream plaintext either way.
    pub async fn fetch_binary(
        &self,
        url: &Url,
        method: Method,
        browser: &BrowserContext,
        body: Option<Bytes>,
        session: &Session,
    ) -> Result<FetchOutcome, FetchError> {
        self.fetch(url, method, browser, body, session).await
    }

    async fn finish(
        &self,
        response: reqwest::Response,
        origin_host: &str,
        session: &Session,
    ) -> Result<FetchOutcome, FetchError> {
        let status = response.status();
        let final_url = response.url().clone();
        let headers = response.headers().clone();

        let set_cookies: Vec<String> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .collect();
        if !set_cookies.is_empty() {
            session.store_cookies(origin_host, set_cookies.iter().map(|s| s.as_str()));
        }

        let redirect = if status.is_redirection() {
            headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        } else {
            None
        };

        let raw = response
            .bytes()
            .await
            .map_err(|err| FetchError::Body(err.to_string()))?;

        let (body, headers) = decode_body(raw, headers)?;

        Ok(FetchOutcome {
            status,
            headers,
            body,
            final_url,
            redirect,
        })
    }

    fn client_for(&self, session: &Session) -> Result<Client, FetchError> {
        let key = if self.cfg.use_proxy {
            sticky_username(&self.cfg, &session.id)
        } else {
            "direct".to_string()
        };

        if let Some(existing) = self.clients.get(&key) {
            return Ok(existing.clone());
        }

        let mut builder = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT);

        if self.cfg.use_proxy {
            // socks5h: the gateway resolves DNS so lookups also exit
            // through the residential network.
            let scheme = if self.cfg.protocol.eq_ignore_ascii_case("socks5") {
                "socks5h"
            } else {
                self.cfg.protocol.as_str()
            };
            let proxy_url = format!("{}://{}:{}", scheme, self.cfg.host, self.cfg.port);
            let proxy = Proxy::all(&proxy_url)
                .map_err(|err| FetchError::Build(err.to_string()))?
                .basic_auth(&key, &self.cfg.password);
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|err| FetchError::Build(err.to_string()))?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = RETRY_BASE.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    exp.min(RETRY_CAP)
}

/// Transport-level failures worth retrying: connect refusals/resets, DNS
/// hiccups, timeouts, and mid-stream disconnects.
fn is_retryable_error(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }

    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::NotConnected
            ) {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

/// Decode Content-Encoding chains (outermost last, so decode in reverse) and
/// drop the now-stale framing headers. Unknown encodings pass through
/// untouched with their header intact.
fn decode_body(raw: Bytes, mut headers: HeaderMap) -> Result<(Bytes, HeaderMap), FetchError> {
    let encodings: Vec<String> = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty() && t != "identity")
        .collect();

    if encodings.is_empty() {
        headers.remove(CONTENT_ENCODING);
        return Ok((raw, headers));
    }

    let mut decoded = raw.to_vec();
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "gzip" | "x-gzip" => decode_gzip(&decoded)?,
            "deflate" => decode_deflate(&decoded)?,
            "br" => decode_brotli(&decoded)?,
            other => {
                tracing::debug!(encoding = %other, "unsupported content-encoding passed through");
                return Ok((raw, headers));
            }
        };
    }

    headers.remove(CONTENT_ENCODING);
    headers.remove(TRANSFER_ENCODING);
    headers.remove(CONTENT_LENGTH);
    Ok((Bytes::from(decoded), headers))
}

fn decode_gzip(data: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| FetchError::Body(format!("gzip decode: {err}")))?;
    Ok(out)
}

fn decode_deflate(data: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| FetchError::Body(format!("deflate decode: {err}")))?;
    Ok(out)
}

fn decode_brotli(data: &[u8]) -> Result<Vec<u8>, FetchError> {
    let cursor = std::io::Cursor::new(data);
    let mut decoder = brotli::Decompressor::new(cursor, 4096);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| FetchError::Body(format!("brotli decode: {err}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(5), Duration::from_secs(5));
        assert_eq!(backoff_delay(12), Duration::from_secs(5));
    }

    #[test]
    fn gzip_bodies_come_back_as_plaintext() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"<html>hi</html>").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, "gzip".parse().unwrap());
        headers.insert(CONTENT_LENGTH, compressed.len().to_string().parse().unwrap());

        let (body, headers) = decode_body(Bytes::from(compressed), headers).unwrap();
        assert_eq!(&body[..], b"<html>hi</html>");
        assert!(headers.get(CONTENT_ENCODING).is_none());
        assert!(headers.get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn unknown_encoding_is_left_alone() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, "zstd".parse().unwrap());
        let payload = Bytes::from_static(b"\x28\xb5\x2f\xfd");

        let (body, headers) = decode_body(payload.clone(), headers).unwrap();
        assert_eq!(body, payload);
        assert!(headers.get(CONTENT_ENCODING).is_some());
    }

    #[test]
    fn browser_context_prefers_original_ua() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "outer".parse().unwrap());
        headers.insert("x-original-ua", "inner".parse().unwrap());
        let ctx = BrowserContext::from_headers(&headers);
        assert_eq!(ctx.effective_user_agent(), "inner");

        headers.remove("x-original-ua");
        let ctx = BrowserContext::from_headers(&headers);
        assert_eq!(ctx.effective_user_agent(), "outer");
    }
}
