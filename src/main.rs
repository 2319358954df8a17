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

use clap::Parser;
use veil_proxy::{app::VeilApp, config::Settings, utils::init_tracing};

/// Command-line interface definition using clap's derive API.
///
/// Minimal surface area: logging format only. All behavioral configuration
/// (listener binding, target site, SOCKS5 upstream, session TTL) comes from
/// environment variables; `.env` loading is the process manager's job.
#[derive(Debug, Parser)]
#[command(
    name = "veil",
    about = "VEIL: Virtual Egress and Inline Link-rewriting proxy"
)]
struct Cli {
    /// Enable JSON-formatted logs and telemetry (default: human-readable).
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Tracing first; everything after logs through it.
    init_tracing(cli.json_logs);

    let settings = Settings::from_env()?;
    let app = VeilApp::new(settings, cli.json_logs)?;
    app.run().await
}
