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

//! Request dispatch and atomic runtime reload

use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode},
};
use eyre::Result;
use futures::FutureExt;
use minioxygen_common::{PURPOSE_HEADER, REQUEST_ID_HEADER};
use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    ReloadEvent, RequestEvent, RuntimeConfig, RuntimeInstance, WorkerError, WorkerRequest,
    WorkerResponse,
};

const REQUEST_EVENT_CAPACITY: usize = 1024;
const RELOAD_EVENT_CAPACITY: usize = 16;
const ERROR_EVENT_CAPACITY: usize = 64;

/// Front door to the worker runtime.
///
/// Cheap to clone; every clone shares the same current instance and the
/// same event channels.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    current: RwLock<Arc<RuntimeInstance>>,
    /// Serializes reloads so a mutator always sees the latest config
    reload_lock: Mutex<()>,
    requests: broadcast::Sender<RequestEvent>,
    reloads: broadcast::Sender<ReloadEvent>,
    errors: broadcast::Sender<Arc<WorkerError>>,
}

impl Dispatcher {
    /// Create a dispatcher running generation 0 of `config`
    pub fn new(config: RuntimeConfig) -> Self {
        let (requests, _) = broadcast::channel(REQUEST_EVENT_CAPACITY);
        let (reloads, _) = broadcast::channel(RELOAD_EVENT_CAPACITY);
        let (errors, _) = broadcast::channel(ERROR_EVENT_CAPACITY);

        Self {
            inner: Arc::new(DispatcherInner {
                current: RwLock::new(Arc::new(RuntimeInstance::new(0, config))),
                reload_lock: Mutex::new(()),
                requests,
                reloads,
                errors,
            }),
        }
    }

    /// The instance new requests are dispatched to
    pub fn current(&self) -> Arc<RuntimeInstance> {
        self.inner.current.read().clone()
    }

    /// Lifecycle event per completed dispatch
    pub fn subscribe_requests(&self) -> broadcast::Receiver<RequestEvent> {
        self.inner.requests.subscribe()
    }

    /// Notified after every successful reload
    pub fn subscribe_reloads(&self) -> broadcast::Receiver<ReloadEvent> {
        self.inner.reloads.subscribe()
    }

    /// Exceptions thrown by the worker before it produced a response
    pub fn subscribe_errors(&self) -> broadcast::Receiver<Arc<WorkerError>> {
        self.inner.errors.subscribe()
    }

    /// Run one request through the current worker.
    ///
    /// The instance is pinned when the call starts, so a concurrent reload
    /// never affects a request already in flight.
    pub async fn dispatch(&self, mut request: WorkerRequest) -> WorkerResponse {
        let instance = self.current();

        let request_id = ensure_request_id(&mut request);
        let purpose = request
            .headers()
            .get(PURPOSE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let method = request.method().to_string();
        let url = request.uri().path_and_query().map(|pq| pq.to_string()).unwrap_or_else(|| "/".into());
        let start_time = now_ms();

        let outcome =
            AssertUnwindSafe(instance.worker().fetch(request, instance.bindings())).catch_unwind().await;

        let response = match outcome {
            Ok(Ok(response)) => strip_redirect_body(response),
            Ok(Err(err)) => self.worker_failed(&request_id, err),
            Err(panic) => self.worker_failed(&request_id, WorkerError::new(panic_message(panic))),
        };

        let end_time = now_ms();
        let event = RequestEvent {
            request_id,
            method,
            url,
            status: response.status().as_u16(),
            purpose,
            start_time,
            end_time,
            duration: end_time.saturating_sub(start_time),
        };
        // No subscribers is fine
        let _ = self.inner.requests.send(event);

        response
    }

    /// Build the next runtime instance from the current config and swap it in.
    ///
    /// Requests dispatched after this returns see the new instance. If the
    /// mutator fails the current instance stays in place and no reload event
    /// is sent.
    pub async fn reload<F, Fut>(&self, mutator: F) -> Result<Arc<RuntimeInstance>>
    where
        F: FnOnce(RuntimeConfig) -> Fut,
        Fut: Future<Output = Result<RuntimeConfig>>,
    {
        let _guard = self.inner.reload_lock.lock().await;

        let previous = self.current();
        let config = mutator(previous.config().clone()).await?;
        let instance = Arc::new(RuntimeInstance::new(previous.generation() + 1, config));

        *self.inner.current.write() = instance.clone();
        info!(generation = instance.generation(), "Worker runtime reloaded");

        let _ = self.inner.reloads.send(ReloadEvent { instance: instance.clone() });
        Ok(instance)
    }

    /// Replace the whole config
    pub async fn replace(&self, config: RuntimeConfig) -> Result<Arc<RuntimeInstance>> {
        self.reload(|_| async move { Ok::<_, eyre::Report>(config) }).await
    }

    fn worker_failed(&self, request_id: &str, err: WorkerError) -> WorkerResponse {
        debug!(request_id, error = %err, "Worker threw before responding");

        let mut response = Response::new(Body::from(err.body_text()));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=UTF-8"));

        let _ = self.inner.errors.send(Arc::new(err));
        response
    }
}

/// Reuse the caller's `request-id` or generate one, making sure the worker
/// sees the same value that ends up in the lifecycle event.
fn ensure_request_id(request: &mut WorkerRequest) -> String {
    if let Some(id) = request.headers().get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
        return id.to_string();
    }

    let id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    id
}

/// Redirects travel back untouched apart from the body, which must be empty.
fn strip_redirect_body(response: WorkerResponse) -> WorkerResponse {
    if !response.status().is_redirection() {
        return response;
    }

    let (mut parts, _body) = response.into_parts();
    if parts.headers.contains_key(header::CONTENT_LENGTH) {
        parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    }
    Response::from_parts(parts, Body::empty())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".to_string()
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}
