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

//! Sticky SOCKS5 identity.
//!
//! Residential gateways key the exit IP on the proxy username. Embedding the
//! session id in the username therefore pins one browser session to one exit
//! IP for `sessTime` minutes. The same session must produce the same
//! username character-for-character or the gateway rotates the IP.

use crate::config::UpstreamSettings;

/// Session ids are projected into the username stripped to `[A-Za-z0-9]` and
/// truncated to 32 chars — gateway username grammars reject anything else.
pub fn cleaned_session_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(32)
        .collect()
}

/// Build the upstream username for a session:
/// `<base>-zone-<zone>-region-<region>-sessid-<cleaned>-sessTime-<minutes>`.
pub fn sticky_username(cfg: &UpstreamSettings, session_id: &str) -> String {
    format!(
        "{}-zone-{}-region-{}-sessid-{}-sessTime-{}",
        cfg.base_user,
        cfg.zone,
        cfg.region,
        cleaned_session_id(session_id),
        cfg.session_time_minutes,
    )
}
