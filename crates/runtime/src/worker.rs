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

//! Worker runtimes the dispatcher can drive
//!
//! A [`Worker`] is anything that turns a request plus the current bindings
//! into a response. Two flavours ship with the crate:
//! - [`FnWorker`] runs an async closure in-process (tests, embedders)
//! - [`HttpWorker`] forwards to an already running worker host over HTTP

use std::{collections::BTreeMap, future::Future, sync::Arc};

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, Response},
};
use futures::{future::BoxFuture, FutureExt, TryStreamExt};
use tracing::debug;

use crate::WorkerError;

/// Request handed to a worker
pub type WorkerRequest = Request<Body>;

/// Response produced by a worker
pub type WorkerResponse = Response<Body>;

/// Environment bindings (string variables and secrets) visible to the worker
pub type Bindings = BTreeMap<String, String>;

/// A request handler running inside the emulated edge runtime.
pub trait Worker: Send + Sync + 'static {
    /// Handle one request. Redirect responses must be returned as-is.
    fn fetch<'a>(
        &'a self,
        request: WorkerRequest,
        env: &'a Bindings,
    ) -> BoxFuture<'a, Result<WorkerResponse, WorkerError>>;
}

impl<W: Worker + ?Sized> Worker for Arc<W> {
    fn fetch<'a>(
        &'a self,
        request: WorkerRequest,
        env: &'a Bindings,
    ) -> BoxFuture<'a, Result<WorkerResponse, WorkerError>> {
        (**self).fetch(request, env)
    }
}

/// In-process worker backed by an async closure.
pub struct FnWorker<F> {
    handler: F,
}

impl<F, Fut> FnWorker<F>
where
    F: Fn(WorkerRequest, Bindings) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WorkerResponse, WorkerError>> + Send + 'static,
{
    /// Wrap `handler` as a worker
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Worker for FnWorker<F>
where
    F: Fn(WorkerRequest, Bindings) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WorkerResponse, WorkerError>> + Send + 'static,
{
    fn fetch<'a>(
        &'a self,
        request: WorkerRequest,
        env: &'a Bindings,
    ) -> BoxFuture<'a, Result<WorkerResponse, WorkerError>> {
        (self.handler)(request, env.clone()).boxed()
    }
}

/// Upper bound for request bodies buffered before forwarding.
const MAX_FORWARDED_BODY: usize = 100 * 1024 * 1024;

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP_HEADERS: &[&str] =
    &["connection", "keep-alive", "transfer-encoding", "upgrade", "te", "trailer", "proxy-authorization"];

/// Worker that forwards every request to an external worker host.
///
/// The host owns the code and bindings, so the `env` passed by the
/// dispatcher is not used. The HTTP client never follows redirects.
#[derive(Debug, Clone)]
pub struct HttpWorker {
    origin: String,
    client: reqwest::Client,
}

impl HttpWorker {
    /// Create a worker forwarding to `origin` (e.g. `http://127.0.0.1:8787`)
    pub fn new(origin: impl Into<String>) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { origin: origin.into().trim_end_matches('/').to_string(), client })
    }

    /// Origin requests are forwarded to
    pub fn origin(&self) -> &str {
        &self.origin
    }

    async fn forward(&self, request: WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let url = format!("{}{}", self.origin, path);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let body = axum::body::to_bytes(body, MAX_FORWARDED_BODY)
            .await
            .map_err(|e| WorkerError::new(format!("failed to read request body: {e}")))?;

        debug!("Forwarding {} {} to worker host", parts.method, url);
        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| WorkerError::new(format!("worker host request to {url} failed: {e}")))?;

        let mut response = Response::builder().status(upstream.status());
        if let Some(out) = response.headers_mut() {
            *out = upstream.headers().clone();
            strip_hop_by_hop(out);
        }

        let stream = upstream.bytes_stream().map_err(std::io::Error::other);
        response
            .body(Body::from_stream(stream))
            .map_err(|e| WorkerError::new(format!("invalid response from worker host: {e}")))
    }
}

impl Worker for HttpWorker {
    fn fetch<'a>(
        &'a self,
        request: WorkerRequest,
        _env: &'a Bindings,
    ) -> BoxFuture<'a, Result<WorkerResponse, WorkerError>> {
        self.forward(request).boxed()
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}
