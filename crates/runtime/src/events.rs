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

//! Events published by the dispatcher

use std::sync::Arc;

use serde::Serialize;

use crate::RuntimeInstance;

/// One completed dispatch, as seen by the request logger and profilers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    /// `request-id` header value, generated when the client sent none
    pub request_id: String,
    /// HTTP method
    pub method: String,
    /// Path and query of the request
    pub url: String,
    /// Response status, 500 when the worker threw
    pub status: u16,
    /// Value of the `purpose` request header, if any
    pub purpose: Option<String>,
    /// Milliseconds since the Unix epoch
    pub start_time: u64,
    /// Milliseconds since the Unix epoch, taken when the response head was ready
    pub end_time: u64,
    /// `end_time - start_time`
    pub duration: u64,
}

impl RequestEvent {
    /// Sent by the browser speculatively, not by a user navigation
    pub fn is_prefetch(&self) -> bool {
        self.purpose.as_deref().is_some_and(|p| p.eq_ignore_ascii_case("prefetch"))
    }

    /// Terminal request line, e.g. `GET  200  /products (12ms)`
    pub fn request_line(&self) -> String {
        let prefetch = if self.is_prefetch() { "(prefetch) " } else { "" };
        format!("{}  {}  {}{} ({}ms)", self.method, self.status, prefetch, self.url, self.duration)
    }
}

/// Sent after the dispatcher swapped in a new runtime instance.
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    /// The instance now serving requests
    pub instance: Arc<RuntimeInstance>,
}
