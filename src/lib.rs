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

//! VEIL: an HTML-rewriting forward proxy.
//!
//! A browser pointed at this origin fetches every resource of a target site
//! through a sticky per-session SOCKS5 upstream. All URL-bearing content is
//! rewritten onto `/p/<token>` paths, and a runtime interception layer
//! (service worker + injected page script) catches everything the static
//! rewrite cannot reach.

pub mod app;
pub mod assets;
pub mod classify;
pub mod codec;
pub mod config;
pub mod rewrite;
pub mod routes;
pub mod session;
pub mod shorturl;
pub mod ssrf;
pub mod telemetry;
pub mod upstream;
pub mod utils;
