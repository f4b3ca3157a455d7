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

//! MiniOxygen Common - shared pieces used by every MiniOxygen crate
//!
//! Holds the logging setup, the well-known header names exchanged between
//! the front server and the dispatcher, and the helpers that deal with the
//! formatting sentinels the worker host injects into console output.

/// Console sentinel tagging and stripping
pub mod console;
/// Header names shared by the front server and the dispatcher
pub mod headers;
/// Logging setup and utilities for consistent logging across MiniOxygen components
pub mod logging;

pub use console::*;
pub use headers::*;
pub use logging::*;
