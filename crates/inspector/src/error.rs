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

//! Inspector and source map errors

use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the runtime's inspector.
#[derive(Debug, Error)]
pub enum InspectorError {
    /// Websocket handshake with the runtime failed
    #[error("failed to connect to runtime inspector at {url}: {source}")]
    Connect {
        /// Inspector URL that was tried
        url: String,
        /// Underlying websocket error
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    /// No inspector target for the worker
    #[error("Unable to connect to Worker inspector. Please report this issue.\n{0}")]
    Discovery(String),

    /// Target discovery request failed
    #[error("inspector http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed frame or error response
    #[error("inspector protocol error: {0}")]
    Protocol(String),

    /// No response to an internal command in time
    #[error("inspector command {0} timed out")]
    Timeout(String),

    /// The socket went away
    #[error("inspector connection closed")]
    Closed,
}

/// Failures loading a source map. Never fatal: callers fall back to
/// unmapped output.
#[derive(Debug, Error)]
pub enum SourceMapError {
    /// Source map file could not be read
    #[error("failed to read source map {}: {source}", path.display())]
    Io {
        /// Source map path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Source map file is not a valid map
    #[error("failed to parse source map {}: {source}", path.display())]
    Parse {
        /// Source map path
        path: PathBuf,
        /// Parser error
        #[source]
        source: sourcemap::Error,
    },
}
