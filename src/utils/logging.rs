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

use tracing_subscriber::EnvFilter;

/// Centralized tracing init so both binary + integration tests share the same behavior.
pub fn init_tracing(json: bool) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,veil_proxy=debug".into());
    let env_filter = EnvFilter::new(filter);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .flatten_event(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .compact()
            .init();
    }
}

/// Session ids never appear whole in logs or error bodies.
pub fn redact_session_id(id: &str) -> String {
    let take = id.len().min(8);
    format!("{}…", &id[..take])
}
