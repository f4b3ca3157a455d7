// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! MiniOxygen Runtime Dispatcher
//!
//! Owns the worker runtime that user code runs in and exposes the two
//! operations everything else builds on:
//! - [`Dispatcher::dispatch`] turns an inbound request into a worker response,
//!   exactly like the production edge host (redirects are never followed)
//! - [`Dispatcher::reload`] swaps code and bindings atomically
//!
//! Request lifecycle events, reload notifications and worker failures are
//! published on broadcast channels so the front server, the inspector bridge
//! and any profiler can observe them without sitting on the response path.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod instance;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use error::WorkerError;
pub use events::{ReloadEvent, RequestEvent};
pub use instance::{InspectorEndpoint, RuntimeConfig, RuntimeInstance};
pub use worker::{Bindings, FnWorker, HttpWorker, Worker, WorkerRequest, WorkerResponse};
