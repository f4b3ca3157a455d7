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

//! Frame rewrites for debuggers running in a browser
//!
//! Browser DevTools cannot fetch `file://` source maps and would show the
//! console sentinels injected by the worker host, so frames relayed to a
//! browser debugger are patched on delivery. Editor debuggers receive
//! frames verbatim.

use std::borrow::Cow;

use chrono::Utc;
use minioxygen_common::strip_console_sentinels;
use serde_json::{json, Value};

/// `sourceMapURL` the runtime reports for the bundled worker
const LOCAL_SOURCE_MAP: &str = "index.js.map";

/// Shown in the debugger console before it is disconnected after a reload
pub const RECONNECT_WARNING: &str = "Source code changed. Please reload the DevTools to reconnect the debugger.";

/// Whether a debugger is DevTools running in a browser. So far only the
/// browser sends a `Mozilla/...` user agent.
pub fn user_agent_is_browser(user_agent: &str) -> bool {
    user_agent.to_ascii_lowercase().contains("mozilla")
}

/// Patch one runtime frame for a browser debugger.
///
/// Returns `None` for frames that are not valid JSON; those are dropped.
pub fn rewrite_for_browser<'a>(frame: &'a str, source_map_url: &str) -> Option<Cow<'a, str>> {
    let mut message: Value = serde_json::from_str(frame).ok()?;
    let mut changed = false;

    let method = message.get("method").and_then(Value::as_str).map(str::to_owned);
    match method.as_deref() {
        Some("Debugger.scriptParsed") => {
            if let Some(url) = message.pointer_mut("/params/sourceMapURL") {
                if url.as_str() == Some(LOCAL_SOURCE_MAP) {
                    *url = Value::String(source_map_url.to_string());
                    changed = true;
                }
            }
        }
        Some("Runtime.consoleAPICalled") => {
            if let Some(args) = message.pointer_mut("/params/args").and_then(Value::as_array_mut) {
                for value in args.iter_mut().filter_map(|arg| arg.get_mut("value")) {
                    if let Some(text) = value.as_str() {
                        let stripped = strip_console_sentinels(text);
                        if stripped != text {
                            *value = Value::String(stripped);
                            changed = true;
                        }
                    }
                }
            }
        }
        _ => {}
    }

    Some(if changed { Cow::Owned(message.to_string()) } else { Cow::Borrowed(frame) })
}

/// Synthetic `Runtime.consoleAPICalled` warning sent before a forced
/// disconnect.
pub fn reconnect_warning() -> String {
    let now = Utc::now().timestamp_millis();
    json!({
        "method": "Runtime.consoleAPICalled",
        "params": {
            "type": "warning",
            "args": [{ "type": "string", "value": RECONNECT_WARNING }],
            "executionContextId": now,
            "timestamp": now,
        }
    })
    .to_string()
}
