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

//! Errors raised by worker code

use std::fmt;

/// The worker threw before it produced a response.
///
/// Carries enough of the original exception for the fallback 500 body and
/// for the console logger, which source-maps `stack` when it can.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct WorkerError {
    /// Error class name, `Error` unless the runtime reported something else
    pub name: String,
    /// Error message
    pub message: String,
    /// V8-style stack (`Error: message\n    at fn (file:line:col)`), if any
    pub stack: Option<String>,
}

impl WorkerError {
    /// Create an error with a message and no stack
    pub fn new(message: impl Into<String>) -> Self {
        Self { name: "Error".to_string(), message: message.into(), stack: None }
    }

    /// Attach the stack reported by the runtime
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Override the error class name (e.g. `TypeError`)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Best-effort text for the fallback response body
    pub fn body_text(&self) -> String {
        self.stack.clone().unwrap_or_else(|| self.to_string())
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}
