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

//! HTML rewriting.
//!
//! Walks the html5ever DOM and rewrites every URL-bearing construct onto the
//! proxy origin: the element/attribute table, `srcset`, lazy-loading
//! `data-*` attributes, inline styles, `<style>` bodies, and
//! `<meta http-equiv="refresh">`. CSP meta tags and `integrity` attributes
//! are stripped (rewritten content would fail SRI; the router writes its own
//! policy). The runtime scripts are injected at the top of `<head>`, WebRTC
//! guard first.

use html5ever::serialize::{serialize, SerializeOpts};
use kuchikiki::traits::*;
use kuchikiki::{parse_html, Attribute, ExpandedName, NodeData, NodeRef};
use markup5ever::{local_name, namespace_url, ns, LocalName, QualName};
use url::Url;

use crate::assets::{ScriptBundle, AD_FRAME_MARKER, RUNTIME_MARKER};
use crate::codec;
use crate::rewrite::css::{rewrite_css, rewrite_inline_style};

/// Full-page rewrite vs the narrower ad-frame variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteMode {
    Page,
    AdFrame,
}

/// Element → URL attributes that get rewritten.
const URL_ATTR_TABLE: &[(&str, &[&str])] = &[
    ("a", &["href"]),
    ("link", &["href"]),
    ("script", &["src"]),
    ("img", &["src"]),
    ("video", &["src", "poster"]),
    ("audio", &["src"]),
    ("source", &["src"]),
    ("iframe", &["src"]),
    ("embed", &["src"]),
    ("object", &["data"]),
    ("form", &["action"]),
    ("input", &["src"]),
    ("track", &["src"]),
    ("area", &["href"]),
];

/// Lazy-loading and framework conventions that carry URLs.
const DATA_URL_ATTRS: &[&str] = &[
    "data-href",
    "data-src",
    "data-url",
    "data-link",
    "data-target",
    "data-action",
    "data-background",
    "data-image",
    "data-poster",
    "data-lazy-src",
    "data-original",
];

const SRCSET_ATTRS: &[&str] = &["srcset", "imagesrcset", "data-srcset"];

/// Rewrite a full HTML document against `request_url` (the URL it was served
/// from) and inject the runtime layer for the given mode.
pub fn rewrite_html(html: &str, request_url: &Url, mode: RewriteMode, bundle: &ScriptBundle) -> String {
    let doc = parse_html().one(html);

    // <base href> overrides the request URL only when absolute http(s);
    // a relative or exotic value is discarded.
    let base = find_base_href(&doc)
        .and_then(|href| Url::parse(href.trim()).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or_else(|| request_url.clone());

    // The element goes away so the browser resolves leftovers against the
    // proxy origin; the injected runtime re-presents the true base URL.
    detach_all(&doc, "base");
    strip_csp_metas(&doc);

    walk(&doc, &base);

    let already_injected = html.contains(RUNTIME_MARKER) || html.contains(AD_FRAME_MARKER);
    if !already_injected {
        inject_runtime(&doc, &base, mode, bundle);
    }

    let mut buf = Vec::new();
    match serialize(
        &mut buf,
        &doc,
        SerializeOpts {
            scripting_enabled: true,
            traversal_scope: html5ever::serialize::TraversalScope::IncludeNode,
            create_missing_parent: false,
        },
    ) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| html.to_string()),
        Err(_) => html.to_string(),
    }
}

fn walk(node: &NodeRef, base: &Url) {
    if let NodeData::Element(ref el) = *node.data() {
        let tag = el.name.local.to_string().to_ascii_lowercase();
        {
            let mut attrs = el.attributes.borrow_mut();

            rewrite_table_attrs(&tag, &mut attrs, base);
            for &attr in SRCSET_ATTRS {
                if let Some(value) = attrs.get_value(attr) {
                    attrs.set_value(attr, rewrite_srcset(&value, base));
                }
            }
            for &attr in DATA_URL_ATTRS {
                if let Some(value) = attrs.get_value(attr) {
                    if let Some(proxied) = codec::rewrite_url_value(base, &value) {
                        attrs.set_value(attr, proxied);
                    }
                }
            }
            if tag == "meta" {
                rewrite_meta_refresh(&mut attrs, base);
            }
            if let Some(style) = attrs.get_value("style") {
                attrs.set_value("style", rewrite_inline_style(&style, base));
            }
        }

        if tag == "style" {
            rewrite_style_element(node, base);
        }
    }

    for child in node.children() {
        walk(&child, base);
    }
}

fn rewrite_table_attrs(tag: &str, attrs: &mut kuchikiki::Attributes, base: &Url) {
    let Some((_, names)) = URL_ATTR_TABLE.iter().find(|(t, _)| *t == tag) else {
        return;
    };

    let mut touched = false;
    for &attr in *names {
        if let Some(value) = attrs.get_value(attr) {
            if let Some(proxied) = codec::rewrite_url_value(base, &value) {
                attrs.set_value(attr, proxied);
                touched = true;
            }
        }
    }

    // Rewritten content can no longer match its subresource-integrity hash.
    if touched {
        attrs.remove_attr("integrity");
    }
}

/// Rewrite each srcset entry's URL token, preserving descriptors (`1x`,
/// `100w`) including ones separated by repeated whitespace.
fn rewrite_srcset(srcset: &str, base: &Url) -> String {
    srcset
        .split(',')
        .map(|entry| {
            let entry = entry.trim();
            let parts: Vec<&str> = entry.splitn(2, char::is_whitespace).collect();
            match parts.as_slice() {
                [url, descriptor] => {
                    let rewritten = codec::rewrite_url_value(base, url)
                        .unwrap_or_else(|| (*url).to_string());
                    format!("{} {}", rewritten, descriptor.trim_start())
                }
                [url] => codec::rewrite_url_value(base, url)
                    .unwrap_or_else(|| (*url).to_string()),
                _ => entry.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn rewrite_meta_refresh(attrs: &mut kuchikiki::Attributes, base: &Url) {
    let is_refresh = attrs
        .get_value("http-equiv")
        .map(|v| v.eq_ignore_ascii_case("refresh"))
        .unwrap_or(false);
    if !is_refresh {
        return;
    }

    if let Some(content) = attrs.get_value("content") {
        if let Some(idx) = content.to_ascii_lowercase().find("url=") {
            let (prefix, url_part) = content.split_at(idx + 4);
            if let Some(proxied) = codec::rewrite_url_value(base, url_part.trim()) {
                attrs.set_value("content", format!("{}{}", prefix, proxied));
            }
        }
    }
}

fn rewrite_style_element(node: &NodeRef, base: &Url) {
    let mut text = String::new();
    for child in node.children() {
        if let NodeData::Text(ref t) = *child.data() {
            text.push_str(&t.borrow());
        }
    }
    if text.is_empty() {
        return;
    }

    let rewritten = rewrite_css(&text, base);
    for child in node.children().collect::<Vec<_>>() {
        child.detach();
    }
    node.append(NodeRef::new_text(rewritten));
}

fn find_base_href(doc: &NodeRef) -> Option<String> {
    for node in doc.inclusive_descendants() {
        if let NodeData::Element(ref el) = *node.data() {
            if el.name.local.to_string().eq_ignore_ascii_case("base") {
                return el.attributes.borrow().get_value("href");
            }
        }
    }
    None
}

fn detach_all(doc: &NodeRef, tag: &str) {
    let doomed: Vec<NodeRef> = doc
        .inclusive_descendants()
        .filter(|node| match *node.data() {
            NodeData::Element(ref el) => el.name.local.to_string().eq_ignore_ascii_case(tag),
            _ => false,
        })
        .collect();
    for node in doomed {
        node.detach();
    }
}

/// `<meta http-equiv="Content-Security-Policy">` (and report-only) would fight
/// the injected scripts; the router writes the effective policy header.
fn strip_csp_metas(doc: &NodeRef) {
    let doomed: Vec<NodeRef> = doc
        .inclusive_descendants()
        .filter(|node| match *node.data() {
            NodeData::Element(ref el) => {
                if !el.name.local.to_string().eq_ignore_ascii_case("meta") {
                    return false;
                }
                el.attributes
                    .borrow()
                    .get_value("http-equiv")
                    .map(|v| {
                        let v = v.to_ascii_lowercase();
                        v == "content-security-policy"
                            || v == "content-security-policy-report-only"
                    })
                    .unwrap_or(false)
            }
            _ => false,
        })
        .collect();
    for node in doomed {
        node.detach();
    }
}

fn inject_runtime(doc: &NodeRef, page_url: &Url, mode: RewriteMode, bundle: &ScriptBundle) {
    let head = match find_or_create_head(doc) {
        Some(head) => head,
        None => return,
    };

    let runtime_code = match mode {
        RewriteMode::Page => bundle.runtime_for(page_url),
        RewriteMode::AdFrame => bundle.ad_frame_for(page_url),
    };

    // Prepend in reverse so the guard ends up first.
    head.prepend(script_element(&runtime_code));
    head.prepend(script_element(&bundle.webrtc_guard));
}

fn find_or_create_head(doc: &NodeRef) -> Option<NodeRef> {
    if let Ok(head) = doc.select_first("head") {
        return Some(head.as_node().clone());
    }
    // html5ever normally synthesizes <head>; cover fragments anyway.
    if let Ok(html) = doc.select_first("html") {
        let head = NodeRef::new_element(
            QualName::new(None, ns!(html), local_name!("head")),
            std::iter::empty::<(ExpandedName, Attribute)>(),
        );
        html.as_node().prepend(head.clone());
        return Some(head);
    }
    None
}

fn script_element(code: &str) -> NodeRef {
    let script = NodeRef::new_element(
        QualName::new(None, ns!(html), local_name!("script")),
        std::iter::empty::<(ExpandedName, Attribute)>(),
    );
    script.append(NodeRef::new_text(code));
    script
}

/// Attribute access by plain name; kuchikiki keys attributes by expanded
/// name, which is noisy at every call site.
trait AttrsExt {
    fn get_value(&self, name: &str) -> Option<String>;
    fn set_value(&mut self, name: &str, value: String);
    fn remove_attr(&mut self, name: &str);
}

impl AttrsExt for kuchikiki::Attributes {
    fn get_value(&self, name: &str) -> Option<String> {
        self.map
            .get(&ExpandedName::new(ns!(), LocalName::from(name)))
            .map(|a| a.value.clone())
    }

    fn set_value(&mut self, name: &str, value: String) {
        let key = ExpandedName::new(ns!(), LocalName::from(name));
        if let Some(attr) = self.map.get_mut(&key) {
            attr.value = value;
        }
    }

    fn remove_attr(&mut self, name: &str) {
        self.map
            .remove(&ExpandedName::new(ns!(), LocalName::from(name)));
    }
}
