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

//! Session store.
//!
//! A session binds a browser cookie to a sticky upstream identity, an
//! upstream cookie jar, and the last page the browser actually received.
//! Sessions expire `SESSION_TTL` after their last read; expiry is enforced
//! lazily on access and eagerly by a periodic sweeper.

pub mod cookies;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use parking_lot::RwLock;
use url::Url;
use uuid::Uuid;

use crate::utils::logging::redact_session_id;
use cookies::CookieJar;

pub struct Session {
    pub id: String,
    pub created_at: SystemTime,
    last_access: RwLock<Instant>,
    current_page: RwLock<Option<Url>>,
    jar: RwLock<CookieJar>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            created_at: SystemTime::now(),
            last_access: RwLock::new(Instant::now()),
            current_page: RwLock::new(None),
            jar: RwLock::new(CookieJar::default()),
        }
    }

    pub fn touch(&self) {
        *self.last_access.write() = Instant::now();
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_access.read().elapsed() > ttl
    }

    /// Recorded only after a successful HTML response has been emitted, so
    /// the Referer presented upstream reflects what the browser actually saw.
    pub fn set_current_page(&self, url: Url) {
        *self.current_page.write() = Some(url);
    }

    pub fn current_page(&self) -> Option<Url> {
        self.current_page.read().clone()
    }

    /// Feed every Set-Cookie from an upstream response into the jar. The jar
    /// lock is taken once per line so concurrent requests interleave at
    /// cookie granularity, never corrupting an individual entry.
    pub fn store_cookies<'a>(&self, origin_host: &str, set_cookie_lines: impl Iterator<Item = &'a str>) {
        for line in set_cookie_lines {
            self.jar.write().store(origin_host, line);
        }
    }

    pub fn cookie_header_for(&self, host: &str, path: &str) -> Option<String> {
        self.jar.read().header_for(host, path)
    }

    pub fn cookie_count(&self) -> usize {
        self.jar.read().len()
    }

    fn sweep_cookies(&self) {
        self.jar.write().remove_expired();
    }
}

/// Owned, process-lifetime map of live sessions. Cloning shares the map.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<DashMap<String, Arc<Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolve an id to a live session, touching it; mint a fresh session
    /// when the id is absent, unknown, or expired. The bool reports whether
    /// a new session was created (the caller then sets the browser cookie).
    pub fn get_or_create(&self, id: Option<&str>) -> (Arc<Session>, bool) {
        if let Some(id) = id {
            if let Some(existing) = self.get(id) {
                return (existing, false);
            }
        }

        let session = Arc::new(Session::new());
        tracing::debug!(session = %redact_session_id(&session.id), "session created");
        self.inner.insert(session.id.clone(), session.clone());
        (session, true)
    }

    /// Non-creating lookup; expired sessions are removed on the spot.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let found = self.inner.get(id).map(|entry| entry.value().clone())?;
        if found.is_expired(self.ttl) {
            drop(self.inner.remove(id));
            tracing::debug!(session = %redact_session_id(id), "session expired on read");
            return None;
        }
        found.touch();
        Some(found)
    }

    pub fn delete(&self, id: &str) {
        self.inner.remove(id);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Eager expiry pass; also prunes expired cookies inside live jars.
    pub fn sweep(&self) {
        let before = self.inner.len();
        self.inner.retain(|_, session| !session.is_expired(self.ttl));
        for entry in self.inner.iter() {
            entry.value().sweep_cookies();
        }
        let removed = before.saturating_sub(self.inner.len());
        if removed > 0 {
            tracing::info!(removed, live = self.inner.len(), "session sweep");
        }
    }

    /// Background sweeper; the returned handle dies with the process, which
    /// is all the shutdown the contract asks for.
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                store.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(60))
    }

    #[test]
    fn create_then_lookup_round_trips() {
        let store = store();
        let (session, created) = store.get_or_create(None);
        assert!(created);
        assert_eq!(session.id.len(), 32);

        let (again, created) = store.get_or_create(Some(&session.id));
        assert!(!created);
        assert_eq!(again.id, session.id);
    }

    #[test]
    fn unknown_id_mints_fresh_session() {
        let store = store();
        let (session, created) = store.get_or_create(Some("deadbeef"));
        assert!(created);
        assert_ne!(session.id, "deadbeef");
    }

    #[test]
    fn expired_sessions_vanish_on_read_and_sweep() {
        let store = SessionStore::new(Duration::from_millis(0));
        let (session, _) = store.get_or_create(None);
        std::thread::sleep(Duration::from_millis(5));

        assert!(store.get(&session.id).is_none());

        let (other, _) = store.get_or_create(None);
        std::thread::sleep(Duration::from_millis(5));
        store.sweep();
        assert!(store.is_empty(), "sweeper should drop {}", other.id);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = store();
        let (session, _) = store.get_or_create(None);
        store.delete(&session.id);
        store.delete(&session.id);
        assert!(store.get(&session.id).is_none());
    }

    #[test]
    fn current_page_round_trips() {
        let store = store();
        let (session, _) = store.get_or_create(None);
        assert!(session.current_page().is_none());

        let page = Url::parse("https://ex.com/page").unwrap();
        session.set_current_page(page.clone());
        assert_eq!(session.current_page(), Some(page));
    }

    #[test]
    fn cookies_flow_through_the_session() {
        let store = store();
        let (session, _) = store.get_or_create(None);
        session.store_cookies(
            "ex.com",
            ["id=42; Domain=.ex.com; Path=/; Max-Age=60"].into_iter(),
        );

        assert_eq!(
            session.cookie_header_for("ex.com", "/next").as_deref(),
            Some("id=42")
        );
        assert_eq!(session.cookie_count(), 2); // origin host + declared domain
    }
}
