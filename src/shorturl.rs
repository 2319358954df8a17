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

//! Short-URL side table.
//!
//! Encoded tokens for ad-tracking URLs can exceed path-length limits, so
//! oversized targets travel as `/p/s/<hash>` instead. Entries live for an
//! hour, refreshed whenever they are dereferenced.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use url::Url;

/// Tokens longer than this should travel through the short form.
pub const LONG_TOKEN_THRESHOLD: usize = 1500;

const HASH_LEN: usize = 12;

struct ShortEntry {
    url: Url,
    stamp: Instant,
}

#[derive(Clone)]
pub struct ShortUrlTable {
    entries: Arc<DashMap<String, ShortEntry>>,
    ttl: Duration,
}

impl ShortUrlTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl_minutes(&self) -> u64 {
        self.ttl.as_secs() / 60
    }

    /// Map a URL to its 12-char hash, reusing the live entry when the same
    /// URL was shortened before.
    pub fn shorten(&self, url: &Url) -> String {
        // Dedupe against non-expired entries first.
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.value().url == *url && e.value().stamp.elapsed() <= self.ttl)
            .map(|e| e.key().clone())
        {
            if let Some(mut entry) = self.entries.get_mut(&existing) {
                entry.stamp = Instant::now();
            }
            return existing;
        }

        // Re-salt on the (unlikely) collision with a different live URL.
        let mut salt = 0u32;
        loop {
            let hash = digest_hash(url.as_str(), salt);
            match self.entries.get(&hash) {
                Some(entry) if entry.url != *url && entry.stamp.elapsed() <= self.ttl => {
                    salt += 1;
                }
                _ => {
                    self.entries.insert(
                        hash.clone(),
                        ShortEntry {
                            url: url.clone(),
                            stamp: Instant::now(),
                        },
                    );
                    return hash;
                }
            }
        }
    }

    /// Dereference a hash, refreshing its TTL. Expired entries vanish here.
    pub fn lookup(&self, hash: &str) -> Option<Url> {
        {
            let mut entry = self.entries.get_mut(hash)?;
            if entry.stamp.elapsed() <= self.ttl {
                entry.stamp = Instant::now();
                return Some(entry.url.clone());
            }
        }
        self.entries.remove(hash);
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sweep(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.stamp.elapsed() <= self.ttl);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::info!(removed, live = self.entries.len(), "short-url sweep");
        }
    }

    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let table = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                table.sweep();
            }
        })
    }
}

fn digest_hash(url: &str, salt: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    if salt > 0 {
        hasher.update(salt.to_le_bytes());
    }
    let digest = hasher.finalize();
    URL_SAFE_NO_PAD.encode(digest)[..HASH_LEN].to_string()
}
