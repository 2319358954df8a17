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

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use crate::{
    assets::ScriptBundle,
    config::{RunEnv, Settings},
    routes::{build_router, AppState},
    session::SessionStore,
    shorturl::ShortUrlTable,
    telemetry::TelemetrySink,
    upstream::Dispatcher,
};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const SHORT_URL_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const SHORT_URL_TTL: Duration = Duration::from_secs(60 * 60);

/// VeilApp wires configuration, session state, the upstream dispatcher, the
/// embedded script bundle, and the router together.
pub struct VeilApp {
    state: Arc<AppState>,
}

impl VeilApp {
    pub fn new(settings: Settings, json_telemetry: bool) -> Result<Self> {
        let sessions = SessionStore::new(settings.session_ttl());
        let short_urls = ShortUrlTable::new(SHORT_URL_TTL);
        let dispatcher = Dispatcher::new(settings.upstream.clone());
        let scripts = ScriptBundle::load();
        let telemetry = TelemetrySink::new(json_telemetry);

        if !settings.upstream.is_configured() {
            if settings.upstream.use_proxy {
                tracing::warn!("SOCKS5 upstream not fully configured; requests will fail until PROXY_HOST/PROXY_BASE_USER are set");
            } else {
                tracing::warn!("USE_PROXY=false: direct connections, diagnostic mode only");
            }
        }

        let state = Arc::new(AppState {
            settings,
            sessions,
            dispatcher,
            short_urls,
            scripts,
            telemetry,
        });

        Ok(Self { state })
    }

    /// Binds the listener, starts the sweepers, and serves until SIGINT or
    /// SIGTERM. No in-flight drain: exit is immediate by contract.
    pub async fn run(self) -> Result<()> {
        self.state.sessions.spawn_sweeper(SESSION_SWEEP_INTERVAL);
        self.state.short_urls.spawn_sweeper(SHORT_URL_SWEEP_INTERVAL);

        let addr = SocketAddr::new(
            self.state
                .settings
                .host
                .parse()
                .with_context(|| format!("invalid HOST: {}", self.state.settings.host))?,
            self.state.settings.port,
        );

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        tracing::info!(
            %addr,
            target_site = %self.state.settings.target_site,
            production = self.state.settings.run_env == RunEnv::Production,
            "VEIL listener online"
        );

        let router = build_router(self.state.clone());
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
