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

//! Worker dispatch handler
//!
//! Adapts the transport request for the worker the way the production edge
//! host does before handing it to the dispatcher, and decorates HTML
//! responses with the auto-reload script.

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Response},
};
use futures::{future, stream, StreamExt};

use crate::{
    reload::{csp_nonce, reload_script},
    server::AppState,
};

pub(crate) async fn dispatch(State(state): State<AppState>, request: Request) -> Response<Body> {
    let (mut parts, body) = request.into_parts();
    parts.headers = join_repeated_headers(&parts.headers);
    apply_default_headers(&mut parts.headers, &state.default_headers);

    let response = state.dispatcher.dispatch(Request::from_parts(parts, body)).await;

    if state.auto_reload && is_html(&response) && !response.status().is_redirection() {
        inject_reload_script(response, &state.events_path)
    } else {
        response
    }
}

/// Collapse repeated request headers into one comma-separated value.
pub fn join_repeated_headers(headers: &HeaderMap) -> HeaderMap {
    let mut joined = HeaderMap::with_capacity(headers.keys_len());
    for name in headers.keys() {
        let mut values = headers.get_all(name).iter();
        let Some(first) = values.next() else { continue };

        let mut value = first.as_bytes().to_vec();
        for next in values {
            value.push(b',');
            value.extend_from_slice(next.as_bytes());
        }
        // Joining valid values with a comma keeps them valid
        if let Ok(value) = HeaderValue::from_bytes(&value) {
            joined.insert(name.clone(), value);
        }
    }
    joined
}

/// Fill in defaults for headers the client did not send.
pub fn apply_default_headers(headers: &mut HeaderMap, defaults: &HeaderMap) {
    for (name, value) in defaults {
        if !headers.contains_key(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
}

fn is_html(response: &Response<Body>) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"))
}

/// Stream the original body, then the reload script.
///
/// The original length comes from the worker's `Content-Length`, or from the
/// body itself when its size is known up front. Either way the response keeps
/// a `Content-Length` covering the script; a body of unknown size stays chunked.
fn inject_reload_script(response: Response<Body>, events_path: &str) -> Response<Body> {
    let (mut parts, body) = response.into_parts();

    let nonce = parts.headers.get(header::CONTENT_SECURITY_POLICY).and_then(|v| v.to_str().ok()).and_then(csp_nonce);
    let script = reload_script(events_path, nonce);

    let length = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or_else(|| body.size_hint().exact());
    if let Some(length) = length {
        parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length + script.len() as u64));
    }

    let tail = stream::once(future::ready(Ok::<_, axum::Error>(Bytes::from(script))));
    Response::from_parts(parts, Body::from_stream(body.into_data_stream().chain(tail)))
}
