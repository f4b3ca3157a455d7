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

//! Server assembly and lifecycle

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    http::{HeaderMap, HeaderName, HeaderValue},
    routing::{any, get},
    Router,
};
use eyre::{Result, WrapErr};
use minioxygen_common::headers::OXYGEN_DEFAULT_HEADERS;
use minioxygen_runtime::Dispatcher;
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{dispatch, reload, DEFAULT_EVENTS_PATH};

/// Front server configuration
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Directory served before requests reach the worker
    pub assets_dir: Option<PathBuf>,
    /// Inject the reload script into HTML and serve the event stream
    pub auto_reload: bool,
    /// Mount point of the event stream
    pub events_path: String,
    /// Request headers added when the client did not send them
    pub default_headers: Vec<(String, String)>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            assets_dir: None,
            auto_reload: false,
            events_path: DEFAULT_EVENTS_PATH.to_string(),
            default_headers: OXYGEN_DEFAULT_HEADERS
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        }
    }
}

impl ServerOptions {
    /// Serve static files from `dir`
    pub fn with_assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assets_dir = Some(dir.into());
        self
    }

    /// Turn live reload on or off
    pub fn with_auto_reload(mut self, enabled: bool) -> Self {
        self.auto_reload = enabled;
        self
    }

    /// Mount the event stream elsewhere
    pub fn with_events_path(mut self, path: impl Into<String>) -> Self {
        self.events_path = path.into();
        self
    }

    /// Add or override one default request header
    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.default_headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.default_headers.push((name, value.into()));
        self
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) auto_reload: bool,
    pub(crate) events_path: Arc<str>,
    pub(crate) default_headers: Arc<HeaderMap>,
}

/// The developer-facing HTTP server.
#[derive(Clone)]
pub struct MiniOxygenServer {
    dispatcher: Dispatcher,
    options: ServerOptions,
    shutdown_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for MiniOxygenServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiniOxygenServer").field("options", &self.options).finish_non_exhaustive()
    }
}

impl MiniOxygenServer {
    /// Server for `dispatcher`. Nothing listens until [`bind`](Self::bind).
    pub fn new(dispatcher: Dispatcher, options: ServerOptions) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { dispatcher, options, shutdown_tx }
    }

    /// Options the server was built with
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Static assets, then the event stream, then the worker.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: self.dispatcher.clone(),
            auto_reload: self.options.auto_reload,
            events_path: Arc::from(self.options.events_path.as_str()),
            default_headers: Arc::new(default_header_map(&self.options.default_headers)),
        };

        let worker = any(dispatch::dispatch).with_state(state.clone());
        let mut router = Router::new();

        if self.options.auto_reload {
            router = router.route(&self.options.events_path, get(reload::events).with_state(state));
        }

        let router = match &self.options.assets_dir {
            Some(dir) => router.fallback_service(
                ServeDir::new(dir)
                    .append_index_html_on_directories(false)
                    .call_fallback_on_method_not_allowed(true)
                    .fallback(worker),
            ),
            None => router.fallback_service(worker),
        };

        router.layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until [`shutdown`](Self::shutdown) is called.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Shutting down MiniOxygen server");
            })
            .await
            .wrap_err("MiniOxygen server failed")
    }

    /// Bind `addr` and serve in the background. Returns the bound address.
    pub async fn bind(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await.wrap_err_with(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr()?;

        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!("{:?}", e);
            }
        });

        info!("MiniOxygen server listening on http://{}", local_addr);
        Ok(local_addr)
    }

    /// Stop accepting connections
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

fn default_header_map(defaults: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(defaults.len());
    for (name, value) in defaults {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Ignoring invalid default header {}: {}", name, value),
        }
    }
    headers
}
