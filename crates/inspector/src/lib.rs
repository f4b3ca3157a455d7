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

//! MiniOxygen Inspector
//!
//! Everything that talks the Chrome DevTools Protocol:
//!
//! - [`InspectorConnection`]: websocket client to the worker runtime's own
//!   inspector, with internal (negative id) commands and frame fan-out
//! - [`InspectorProxy`]: the public debugger endpoint. Discovery routes,
//!   the single-debugger relay with buffering and browser rewrites, and the
//!   DevTools UI asset proxy
//! - [`logger`]: turns console and exception events into terminal output
//! - [`SourceMapResolver`]: lazily parsed source map per runtime generation
//! - [`InspectorBridge`]: keeps all of the above in sync with dispatcher reloads

pub mod bridge;
pub mod connection;
pub mod devtools;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod proxy;
pub mod remote_object;
pub mod rewrite;
pub mod source_map;
pub mod stack;

pub use bridge::InspectorBridge;
pub use connection::{find_inspector_url, InspectorConnection};
pub use error::{InspectorError, SourceMapError};
pub use logger::{ConsoleArg, ConsoleMethod, ConsoleSink, ReconstructedError, TracingSink};
pub use proxy::{InspectorProxy, InspectorProxyBuilder, SessionSnapshot};
pub use rewrite::user_agent_is_browser;
pub use source_map::{OriginalPosition, SourceMapConsumer, SourceMapResolver};
pub use stack::{format_stack, format_structured_error};
