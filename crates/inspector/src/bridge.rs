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

//! Keeps the inspector side in step with dispatcher reloads
//!
//! Every runtime generation gets its own inspector connection, console
//! logger and source map. On each reload the bridge tears the old set down
//! before it brings the new one up, and hands the fresh connection to the
//! [`InspectorProxy`] so an attached debugger is told to reconnect.

use std::{sync::Arc, time::Duration};

use minioxygen_runtime::{Dispatcher, InspectorEndpoint, RuntimeInstance, WorkerError};
use tokio::{
    sync::{broadcast::error::RecvError, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, error, info, warn};

use crate::{
    find_inspector_url, format_stack, logger::spawn_console_logger, ConsoleSink, InspectorConnection,
    InspectorError, InspectorProxy, ReconstructedError, SourceMapResolver,
};

/// Attempts to reach a runtime inspector that was just (re)started
const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(200);

struct Generation {
    connection: Option<Arc<InspectorConnection>>,
    logger: Option<JoinHandle<()>>,
    resolver: Arc<SourceMapResolver>,
}

/// Owner of the per-generation inspector connection.
pub struct InspectorBridge {
    sink: Arc<dyn ConsoleSink>,
    proxy: Option<InspectorProxy>,
    current: Mutex<Generation>,
}

impl std::fmt::Debug for InspectorBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectorBridge").field("proxy", &self.proxy).finish_non_exhaustive()
    }
}

impl InspectorBridge {
    /// Bridge reporting to `sink`, with no debugger endpoint
    pub fn new(sink: Arc<dyn ConsoleSink>) -> Self {
        Self {
            sink,
            proxy: None,
            current: Mutex::new(Generation {
                connection: None,
                logger: None,
                resolver: Arc::new(SourceMapResolver::new(None)),
            }),
        }
    }

    /// Relay every generation's connection through `proxy`.
    pub fn with_proxy(mut self, proxy: InspectorProxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Source map resolver of the current generation
    pub async fn resolver(&self) -> Arc<SourceMapResolver> {
        self.current.lock().await.resolver.clone()
    }

    /// Current runtime inspector connection, if any
    pub async fn connection(&self) -> Option<Arc<InspectorConnection>> {
        self.current.lock().await.connection.clone()
    }

    /// Switch to the inspector of `instance`.
    ///
    /// The previous connection is closed and its logger stopped first. When
    /// `instance` has no inspector, the proxy is left without a runtime.
    pub async fn connect(&self, instance: &RuntimeInstance) -> Result<(), InspectorError> {
        let mut current = self.current.lock().await;

        if let Some(connection) = current.connection.take() {
            connection.close();
        }
        if let Some(logger) = current.logger.take() {
            logger.abort();
        }
        current.resolver.invalidate().await;

        let resolver = Arc::new(SourceMapResolver::new(instance.source_map_path().cloned()));
        current.resolver = resolver.clone();
        if let Some(proxy) = &self.proxy {
            proxy.set_source_maps(resolver.clone());
        }

        let Some(endpoint) = instance.inspector() else {
            debug!(generation = instance.generation(), "Runtime has no inspector");
            self.swap_proxy_runtime(None).await;
            return Ok(());
        };

        let connection = match connect_with_retry(endpoint).await {
            Ok(connection) => connection,
            Err(e) => {
                self.swap_proxy_runtime(None).await;
                return Err(e);
            }
        };

        // Subscribers go first so nothing emitted after enable() is missed
        current.logger = Some(spawn_console_logger(connection.clone(), resolver, self.sink.clone()));
        self.swap_proxy_runtime(Some(connection.clone())).await;
        connection.enable();

        info!(generation = instance.generation(), "Inspector attached to {}", connection.url());
        current.connection = Some(connection);
        Ok(())
    }

    /// Print a dispatch failure, source-mapped when possible.
    pub async fn report(&self, error: &WorkerError) {
        let resolver = self.resolver().await;
        let stack = match (&error.stack, resolver.consumer().await) {
            (Some(stack), Some(consumer)) => Some(format_stack(&consumer, stack)),
            (stack, _) => stack.clone(),
        };

        self.sink.exception(&ReconstructedError { message: error.to_string(), stack, cause: None });
    }

    /// Follow `dispatcher` until it goes away.
    pub async fn run(self: Arc<Self>, dispatcher: Dispatcher) {
        let mut reloads = dispatcher.subscribe_reloads();
        let mut errors = dispatcher.subscribe_errors();

        if let Err(e) = self.connect(&dispatcher.current()).await {
            error!("{}", e);
        }

        loop {
            tokio::select! {
                reload = reloads.recv() => {
                    let instance = match reload {
                        Ok(event) => event.instance,
                        Err(RecvError::Lagged(_)) => dispatcher.current(),
                        Err(RecvError::Closed) => break,
                    };
                    if let Err(e) = self.connect(&instance).await {
                        error!("{}", e);
                    }
                }
                error = errors.recv() => match error {
                    Ok(error) => self.report(&error).await,
                    Err(RecvError::Lagged(skipped)) => warn!("Skipped {} worker errors", skipped),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    /// [`run`](Self::run) on its own task
    pub fn spawn(self: Arc<Self>, dispatcher: Dispatcher) -> JoinHandle<()> {
        tokio::spawn(self.run(dispatcher))
    }

    async fn swap_proxy_runtime(&self, connection: Option<Arc<InspectorConnection>>) {
        if let Some(proxy) = &self.proxy {
            proxy.replace_runtime(connection).await;
        }
    }
}

async fn resolve_url(endpoint: &InspectorEndpoint) -> Result<String, InspectorError> {
    match endpoint {
        InspectorEndpoint::Url(url) => Ok(url.clone()),
        InspectorEndpoint::Discover { port, worker_name } => find_inspector_url(*port, worker_name).await,
    }
}

async fn connect_with_retry(endpoint: &InspectorEndpoint) -> Result<Arc<InspectorConnection>, InspectorError> {
    let mut attempt = 1;
    loop {
        let result = match resolve_url(endpoint).await {
            Ok(url) => InspectorConnection::connect(&url).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(connection) => return Ok(connection),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                debug!(attempt, "Runtime inspector not ready: {}", e);
                attempt += 1;
                sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}
