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

//! Target validation.
//!
//! Every decoded URL passes through `validate` before the dispatcher sees it.
//! Rejections carry a short reason that the router surfaces verbatim in the
//! 400 body.

use std::net::IpAddr;

use url::{Host, Url};

/// Hostname suffixes that resolve inside private infrastructure.
const BLOCKED_HOST_SUFFIXES: &[&str] = &[".local", ".internal", ".localdomain"];

pub fn validate(url: &Url) -> Result<(), String> {
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("scheme '{}' is not allowed", other)),
    }

    let host = match url.host() {
        Some(h) => h,
        None => return Err("URL has no host".into()),
    };

    match host {
        Host::Domain(name) => {
            let lower = name.to_ascii_lowercase();
            if lower == "localhost" || lower.ends_with(".localhost") {
                return Err("loopback host is not allowed".into());
            }
            if BLOCKED_HOST_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
                return Err(format!("internal hostname '{}' is not allowed", lower));
            }
            Ok(())
        }
        Host::Ipv4(addr) => check_ip(IpAddr::V4(addr)),
        Host::Ipv6(addr) => check_ip(IpAddr::V6(addr)),
    }
}

fn check_ip(addr: IpAddr) -> Result<(), String> {
    let blocked = match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // Carrier-grade NAT and cloud metadata neighborhoods.
                || (v4.octets()[0] == 100 && (64..128).contains(&v4.octets()[1]))
                || v4.octets() == [169, 254, 169, 254]
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique-local, fe80::/10 link-local.
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    };

    if blocked {
        Err(format!("address {} is not routable through the proxy", addr))
    } else {
        Ok(())
    }
}
