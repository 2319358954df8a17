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

/// Content rewriters: HTML (DOM walk), CSS (closed regex grammar), and the
/// deliberately narrow JS literal pass.
pub mod css;
pub mod html;
pub mod js;

pub use css::{rewrite_css, rewrite_inline_style};
pub use html::{rewrite_html, RewriteMode};
pub use js::rewrite_js;
