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

use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime configuration for the proxy.
///
/// Everything behavioral is read from environment variables; `.env` loading is
/// the operator's concern (shell, container runtime, process manager). Each
/// field falls back to a `default_*` helper so a bare `veil` invocation comes
/// up in a usable diagnostic state.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Listener bind address (`HOST`).
    pub host: String,
    /// Listener TCP port (`PORT`).
    pub port: u16,
    /// Default target injected into the landing page (`TARGET_SITE`).
    pub target_site: String,
    /// Deployment environment (`RUN_ENV`); gates the `Secure` cookie flag.
    pub run_env: RunEnv,
    /// Session lifetime in minutes (`SESSION_TTL_MINUTES`).
    pub session_ttl_minutes: u64,
    /// Browser-facing session cookie name (`SESSION_COOKIE_NAME`).
    pub session_cookie_name: String,
    /// SOCKS5 upstream configuration (`PROXY_*`, `USE_PROXY`).
    pub upstream: UpstreamSettings,
}

/// SOCKS5 upstream parameters. The username is derived per session by
/// `upstream::credentials`; only the static parts live here.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// When false, requests go out over a direct connection (diagnostics).
    pub use_proxy: bool,
    pub host: String,
    pub port: u16,
    /// Upstream scheme; `socks5` is the only supported value today.
    pub protocol: String,
    pub base_user: String,
    pub password: String,
    pub zone: String,
    pub region: String,
    /// Sticky-IP window in minutes, embedded in the username as `sessTime`.
    pub session_time_minutes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnv {
    Production,
    Development,
}

impl Settings {
    /// Reads the full configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let port = env_or("PORT", default_port)?;
        let session_ttl_minutes = env_or("SESSION_TTL_MINUTES", default_session_ttl)?;

        Ok(Self {
            host: env_str("HOST", default_host),
            port,
            target_site: env_str("TARGET_SITE", default_target_site),
            run_env: parse_run_env(&env_str("RUN_ENV", || "development".into())),
            session_ttl_minutes,
            session_cookie_name: env_str("SESSION_COOKIE_NAME", default_cookie_name),
            upstream: UpstreamSettings::from_env()?,
        })
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_minutes * 60)
    }

    /// `Secure` is set on the session cookie only behind HTTPS deployments.
    pub fn secure_cookies(&self) -> bool {
        self.run_env == RunEnv::Production
    }
}

impl UpstreamSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            use_proxy: env_bool("USE_PROXY", true),
            host: env_str("PROXY_HOST", default_upstream_host),
            port: env_or("PROXY_PORT", default_upstream_port)?,
            protocol: env_str("PROXY_PROTOCOL", || "socks5".into()),
            base_user: env_str("PROXY_BASE_USER", String::new),
            password: env_str("PROXY_PASSWORD", String::new),
            zone: env_str("PROXY_ZONE", || "custom".into()),
            region: env_str("PROXY_REGION", || "US".into()),
            session_time_minutes: env_or("PROXY_SESSION_TIME", default_session_time)?,
        })
    }

    /// True when enough material exists to authenticate against the upstream.
    pub fn is_configured(&self) -> bool {
        self.use_proxy && !self.host.is_empty() && !self.base_user.is_empty()
    }
}

fn parse_run_env(raw: &str) -> RunEnv {
    if raw.eq_ignore_ascii_case("production") {
        RunEnv::Production
    } else {
        RunEnv::Development
    }
}

fn env_str(key: &str, default: impl FnOnce() -> String) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default(),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: impl FnOnce() -> T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {v}")),
        _ => Ok(default()),
    }
}

/// Default listener bind address.
fn default_host() -> String {
    "0.0.0.0".into()
}

/// Default listener port when none is provided.
fn default_port() -> u16 {
    3000
}

fn default_target_site() -> String {
    "https://example.com".into()
}

fn default_cookie_name() -> String {
    "proxy_session".into()
}

fn default_session_ttl() -> u64 {
    120
}

fn default_upstream_host() -> String {
    String::new()
}

fn default_upstream_port() -> u16 {
    1080
}

fn default_session_time() -> u64 {
    120
}
