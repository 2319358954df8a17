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

use std::sync::Arc;

use url::Url;

/// Marker the page runtime defines on first run; the HTML rewriter checks it
/// to keep injection idempotent.
pub const RUNTIME_MARKER: &str = "__veil_runtime_version";
/// Equivalent marker for the ad-frame runtime.
pub const AD_FRAME_MARKER: &str = "__veil_adframe_version";

#[derive(Clone)]
pub struct ScriptBundle {
    pub service_worker: Arc<str>,
    pub webrtc_guard: Arc<str>,
    runtime: Arc<str>,
    ad_frame: Arc<str>,
    landing: Arc<str>,
}

impl ScriptBundle {
    pub fn load() -> Self {
        Self {
            service_worker: Arc::from(include_str!("assets/js/service_worker.js")),
            webrtc_guard: Arc::from(include_str!("assets/js/webrtc_guard.js")),
            runtime: Arc::from(include_str!("assets/js/runtime_hooks.js")),
            ad_frame: Arc::from(include_str!("assets/js/ad_frame_hooks.js")),
            landing: Arc::from(include_str!("assets/landing.html")),
        }
    }

    /// Page runtime with the true page URL baked in as a JS string literal.
    pub fn runtime_for(&self, page_url: &Url) -> String {
        render_with_page_url(&self.runtime, page_url)
    }

    /// Ad-frame runtime with the frame URL baked in.
    pub fn ad_frame_for(&self, page_url: &Url) -> String {
        render_with_page_url(&self.ad_frame, page_url)
    }

    /// Landing page with `TARGET_SITE` substituted.
    pub fn landing_for(&self, target_site: &str) -> String {
        self.landing.replace("{{target_site}}", target_site)
    }
}

fn render_with_page_url(template: &str, page_url: &Url) -> String {
    let literal =
        serde_json::to_string(page_url.as_str()).unwrap_or_else(|_| "\"\"".to_string());
    template.replace("{{page_url}}", &literal)
}
