// MiniOxygen - local edge worker emulation
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! DevTools frontend served through the inspector proxy
//!
//! The UI itself is fetched from a hosted DevTools build. A few assets are
//! patched in flight: the vendor name in the sources panel and locales, and
//! the root document, which upstream ships without closing tags.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Response, StatusCode},
    response::IntoResponse,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

/// Hosted DevTools frontend
pub const DEVTOOLS_HOST: &str = "https://devtools.devprod.cloudflare.dev";

/// Icon shown next to the target in the DevTools UI
pub const FAVICON_URL: &str = "https://cdn.shopify.com/s/files/1/0598/4822/8886/files/favicon.svg";

/// Appended to the root document so something shows while the UI boots
pub const LOADING_INDICATOR: &str = "<div style=\"display: flex; flex-direction: column; align-items: center; padding-top: 20px; font-family: Arial; color: white\">Loading DevTools...</div></body></html>";

static VENDOR_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"['"]Cloudflare['"]"#).expect("valid vendor regex"));

/// In-flight modification applied to a proxied asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetPatch {
    /// Stream the upstream body untouched
    None,
    /// Replace the quoted vendor name with `"MiniOxygen"`
    RenameVendor,
    /// Close the root document after a loading indicator
    AppendLoadingIndicator,
}

impl AssetPatch {
    /// Patch for a proxied path (query stripped)
    pub fn for_path(path: &str) -> Self {
        if path == "/panels/sources/sources-meta.js"
            || (path.starts_with("/core/i18n/locales/") && path.ends_with(".json"))
        {
            Self::RenameVendor
        } else {
            Self::None
        }
    }

    /// Patched asset text
    pub fn apply(&self, content: String) -> String {
        match self {
            Self::None => content,
            Self::RenameVendor => VENDOR_NAME.replace_all(&content, "\"MiniOxygen\"").into_owned(),
            Self::AppendLoadingIndicator => content + LOADING_INDICATOR,
        }
    }
}

/// `devtools://` frontend URLs advertised in the target list, for a
/// debugger socket reachable at `ws_host` (e.g. `localhost:9229/ws`).
pub fn frontend_urls(ws_host: &str) -> (String, String) {
    (
        format!("devtools://devtools/bundled/js_app.html?experiments=true&v8only=true&ws={ws_host}"),
        format!("devtools://devtools/bundled/inspector.html?experiments=true&v8only=true&ws={ws_host}"),
    )
}

/// Fetch `url` and relay it, applying `patch`.
///
/// `Cookie` and `Host` are never forwarded; `Accept-Encoding` is dropped
/// for patched assets since the body must be readable here. Upstream
/// statuses of 300 and above are relayed with an empty body.
pub async fn proxy_asset(client: &reqwest::Client, url: &str, headers: &HeaderMap, patch: AssetPatch) -> Response<Body> {
    let mut forwarded = headers.clone();
    forwarded.remove(header::HOST);
    forwarded.remove(header::COOKIE);
    // Hop-by-hop headers only describe the connection to us
    forwarded.remove(header::CONNECTION);
    forwarded.remove(header::UPGRADE);
    if patch != AssetPatch::None {
        forwarded.remove(header::ACCEPT_ENCODING);
    }

    let upstream = match client.get(url).headers(forwarded).send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            error!("Failed to proxy DevTools asset {}: {}", url, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
        }
    };

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    response_headers.remove(header::TRANSFER_ENCODING);
    response_headers.remove(header::CONNECTION);

    let body = if status.as_u16() >= 300 {
        Body::empty()
    } else if patch != AssetPatch::None {
        match upstream.text().await {
            Ok(text) => {
                let patched = patch.apply(text);
                response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(patched.len()));
                Body::from(patched)
            }
            Err(e) => {
                error!("Failed to read DevTools asset {}: {}", url, e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
            }
        }
    } else {
        Body::from_stream(upstream.bytes_stream())
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}
