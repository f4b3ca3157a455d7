// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! MiniOxygen Front Server
//!
//! The HTTP entry point a developer's browser talks to. Requests go through,
//! in order:
//! 1. static files from the assets directory, when one is configured
//! 2. the auto-reload event stream, when auto-reload is on
//! 3. the [`Dispatcher`](minioxygen_runtime::Dispatcher), which runs the worker
//!
//! Responses from the worker are streamed back as they are, with every
//! repeated header (`Set-Cookie` in particular) kept on its own line.

pub mod dispatch;
pub mod reload;
pub mod server;

pub use reload::{reload_script, DEFAULT_EVENTS_PATH};
pub use server::{MiniOxygenServer, ServerOptions};
