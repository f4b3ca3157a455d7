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

//! Browser auto-reload over server-sent events

use std::convert::Infallible;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use chrono::Local;
use futures::{stream, Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::server::AppState;

/// Where the event stream is mounted unless configured otherwise
pub const DEFAULT_EVENTS_PATH: &str = "/events";

static CSP_NONCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"'nonce-([^']+)'").expect("valid nonce regex"));

/// Script appended to HTML documents. Reloads the page on every `reload`
/// event from `events_path`.
pub fn reload_script(events_path: &str, nonce: Option<&str>) -> String {
    let nonce = nonce.map(|n| format!(" nonce=\"{n}\"")).unwrap_or_default();
    format!(
        r#"<script{nonce} defer type="application/javascript">
(function () {{
  // MiniOxygen Auto Reload
  var source = new EventSource('{events_path}');
  source.addEventListener('open', function(e) {{ console.log('Auto Reload Enabled') }}, false);
  source.onmessage = function(e) {{ if (e.data === 'connected') {{console.log('Listening for events...');}} else if (e.data === 'reload') {{location.reload();}} }};
}})();
</script>"#
    )
}

/// The `nonce-...` source of a `Content-Security-Policy`, if any
pub fn csp_nonce(policy: &str) -> Option<&str> {
    CSP_NONCE.captures(policy).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn event(data: &'static str) -> Result<Event, Infallible> {
    Ok(Event::default().id(Local::now().format("%-I:%M:%S %p").to_string()).data(data))
}

/// One `connected` event, then a `reload` per completed reload. The
/// subscription is dropped with the stream when the client goes away.
fn reload_events(state: &AppState) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let reloads = state.dispatcher.subscribe_reloads();

    let reloads = stream::unfold(reloads, |mut reloads| async move {
        match reloads.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => Some((event("reload"), reloads)),
            Err(RecvError::Closed) => None,
        }
    });

    stream::once(async { event("connected") }).chain(reloads)
}

pub(crate) async fn events(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let accepts_events = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));
    if !accepts_events {
        return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
    }

    debug!("Auto-reload client connected");
    (
        [(header::CACHE_CONTROL, "no-cache"), (header::CONNECTION, "keep-alive")],
        Sse::new(reload_events(&state)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_points_at_events_path() {
        let script = reload_script("/__minioxygen_events", None);
        assert!(script.starts_with("<script defer type=\"application/javascript\">"));
        assert!(script.contains("new EventSource('/__minioxygen_events')"));
        assert!(script.ends_with("</script>"));
    }

    #[test]
    fn test_script_carries_nonce() {
        let script = reload_script(DEFAULT_EVENTS_PATH, Some("abc123"));
        assert!(script.starts_with("<script nonce=\"abc123\" defer"));
    }

    #[test]
    fn test_csp_nonce() {
        assert_eq!(csp_nonce("script-src 'self' 'nonce-r4nd0m' https:"), Some("r4nd0m"));
        assert_eq!(csp_nonce("default-src 'self'"), None);
    }
}
