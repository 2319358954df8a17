/* VEIL Proxy (AGPL-3.0)

Per-session upstream cookie jar:
- Set-Cookie lines are parsed individually; anything unparsable is dropped.
- Each cookie is stored under the declared Domain attribute (leading dot
  preserved or added) and under the origin host that emitted it.
- Retrieval applies RFC 6265 domain-match and path-prefix-match, skips
  expired entries, and dedupes by name with the most specific match winning.
*/

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use cookie::{Cookie, Expiration};

#[derive(Debug, Clone)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    /// Domain key this copy is filed under (dot-prefixed for subdomain match).
    pub domain: String,
    pub path: String,
    pub expires: Option<SystemTime>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
}

impl StoredCookie {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.expires, Some(at) if at <= now)
    }
}

/// Domain-keyed cookie jar. One jar per session; callers serialize writes
/// per Set-Cookie line through the session's lock.
#[derive(Debug, Default)]
pub struct CookieJar {
    domains: HashMap<String, HashMap<String, StoredCookie>>,
}

impl CookieJar {
    /// Parse one Set-Cookie line and file it under both the declared domain
    /// and the origin host. Max-Age wins over Expires; a non-positive
    /// Max-Age marks the cookie expired so the next sweep deletes it.
    pub fn store(&mut self, origin_host: &str, raw_set_cookie: &str) {
        let Ok(parsed) = Cookie::parse(raw_set_cookie.to_owned()) else {
            tracing::debug!(origin_host, "unparsable Set-Cookie dropped");
            return;
        };

        let now = SystemTime::now();
        let expires = cookie_expiry(&parsed, now);
        let path = parsed
            .path()
            .filter(|p| p.starts_with('/'))
            .unwrap_or("/")
            .to_string();
        let same_site = parsed.same_site().map(|s| s.to_string());

        let origin_key = origin_host.to_ascii_lowercase();
        let mut keys = vec![origin_key.clone()];
        if let Some(declared) = parsed.domain() {
            let declared = declared.trim().to_ascii_lowercase();
            if !declared.is_empty() {
                let dotted = if declared.starts_with('.') {
                    declared
                } else {
                    format!(".{}", declared)
                };
                if dotted != origin_key {
                    keys.push(dotted);
                }
            }
        }

        for key in keys {
            let record = StoredCookie {
                name: parsed.name().to_string(),
                value: parsed.value().to_string(),
                domain: key.clone(),
                path: path.clone(),
                expires,
                secure: parsed.secure().unwrap_or(false),
                http_only: parsed.http_only().unwrap_or(false),
                same_site: same_site.clone(),
            };
            self.domains
                .entry(key)
                .or_default()
                .insert(record.name.clone(), record);
        }
    }

    /// Build the Cookie header value for an upstream request, or None when
    /// nothing matches.
    pub fn header_for(&self, host: &str, path: &str) -> Option<String> {
        let host = host.to_ascii_lowercase();
        let now = SystemTime::now();

        let mut matches: Vec<&StoredCookie> = self
            .domains
            .iter()
            .filter(|(domain, _)| domain_matches(&host, domain))
            .flat_map(|(_, cookies)| cookies.values())
            .filter(|c| !c.is_expired(now) && path_matches(path, &c.path))
            .collect();

        if matches.is_empty() {
            return None;
        }

        // Most specific first: longest domain, then longest path. The first
        // occurrence of each name wins.
        matches.sort_by(|a, b| {
            b.domain
                .len()
                .cmp(&a.domain.len())
                .then(b.path.len().cmp(&a.path.len()))
        });

        let mut seen = Vec::new();
        let mut parts = Vec::new();
        for c in matches {
            if seen.iter().any(|n| n == &c.name) {
                continue;
            }
            seen.push(c.name.clone());
            parts.push(format!("{}={}", c.name, c.value));
        }
        Some(parts.join("; "))
    }

    /// Drop every expired cookie; called from the session sweeper.
    pub fn remove_expired(&mut self) {
        let now = SystemTime::now();
        for cookies in self.domains.values_mut() {
            cookies.retain(|_, c| !c.is_expired(now));
        }
        self.domains.retain(|_, cookies| !cookies.is_empty());
    }

    pub fn len(&self) -> usize {
        self.domains.values().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cookie_expiry(parsed: &Cookie<'_>, now: SystemTime) -> Option<SystemTime> {
    if let Some(max_age) = parsed.max_age() {
        let secs = max_age.whole_seconds();
        if secs <= 0 {
            return Some(SystemTime::UNIX_EPOCH);
        }
        return Some(now + Duration::from_secs(secs as u64));
    }
    match parsed.expires() {
        Some(Expiration::DateTime(at)) => Some(SystemTime::from(at)),
        _ => None,
    }
}

/// RFC 6265 domain-match: exact for host-only keys, suffix for dot-prefixed.
fn domain_matches(host: &str, stored: &str) -> bool {
    if let Some(bare) = stored.strip_prefix('.') {
        host == bare || host.ends_with(&format!(".{}", bare))
    } else {
        host == stored
    }
}

/// Path-prefix match with a `/` boundary so `/app` does not match `/apple`.
fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if cookie_path == "/" {
        return true;
    }
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/')
                || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/')))
}
