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

//! Public debugger endpoint
//!
//! Debuggers (browser DevTools or an editor) connect here instead of to the
//! runtime directly, so that the debugger survives runtime reloads and sees
//! patched frames. The relay state lives in a single session actor; the
//! HTTP handlers and websocket tasks only talk to it through [`Command`]s.
//!
//! # Session rules
//!
//! - At most one debugger is attached. Later attempts are closed with
//!   `1008` and the attached one is left alone.
//! - Runtime frames that arrive while nobody is attached are buffered and
//!   flushed, in order, to the next debugger that attaches.
//! - When the runtime connection is replaced, the attached debugger gets a
//!   console warning and is closed with `1001`.

use std::{
    collections::VecDeque,
    future::pending,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use axum::{
    body::Body,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        OriginalUri, RawQuery, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use eyre::Result;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, oneshot},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    devtools::{frontend_urls, proxy_asset, AssetPatch, DEVTOOLS_HOST, FAVICON_URL},
    protocol::{InspectorTarget, DEBUGGER_DISABLE},
    rewrite::{reconnect_warning, rewrite_for_browser, user_agent_is_browser},
    InspectorConnection, SourceMapResolver,
};

/// Default port of the debugger endpoint
pub const DEFAULT_INSPECTOR_PORT: u16 = 9229;

/// Close code for a rejected second debugger
pub const POLICY_VIOLATION: u16 = 1008;

/// Close code after the runtime was replaced
pub const GOING_AWAY: u16 = 1001;

const TOO_MANY_CLIENTS: &str = "Too many clients; only one can be connected at a time";
const SOURCE_CHANGED: &str = "Source code changed";

/// Decides from a `User-Agent` whether the debugger runs in a browser
pub type BrowserPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Builder for [`InspectorProxy`]
#[derive(Clone)]
pub struct InspectorProxyBuilder {
    host: IpAddr,
    port: u16,
    devtools_host: String,
    favicon_url: String,
    browser_predicate: BrowserPredicate,
    source_maps: Arc<SourceMapResolver>,
}

impl Default for InspectorProxyBuilder {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_INSPECTOR_PORT,
            devtools_host: DEVTOOLS_HOST.to_string(),
            favicon_url: FAVICON_URL.to_string(),
            browser_predicate: Arc::new(user_agent_is_browser),
            source_maps: Arc::new(SourceMapResolver::new(None)),
        }
    }
}

impl std::fmt::Debug for InspectorProxyBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectorProxyBuilder")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("devtools_host", &self.devtools_host)
            .finish_non_exhaustive()
    }
}

impl InspectorProxyBuilder {
    /// Loopback on 9229, DevTools assets from the public frontend
    pub fn new() -> Self {
        Self::default()
    }

    /// Port to listen on; `0` picks a free one.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Address to bind
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Origin the DevTools UI assets are fetched from
    pub fn devtools_host(mut self, host: impl Into<String>) -> Self {
        self.devtools_host = host.into().trim_end_matches('/').to_string();
        self
    }

    /// Icon advertised in `/json`
    pub fn favicon_url(mut self, url: impl Into<String>) -> Self {
        self.favicon_url = url.into();
        self
    }

    /// Replace the `User-Agent` heuristic used to detect browser DevTools.
    pub fn browser_predicate(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.browser_predicate = Arc::new(predicate);
        self
    }

    /// Source map served at `/__index.js.map`
    pub fn source_maps(mut self, resolver: Arc<SourceMapResolver>) -> Self {
        self.source_maps = resolver;
        self
    }

    /// Bind the listener, then start the session actor and the HTTP server.
    pub async fn start(self, runtime: Option<Arc<InspectorConnection>>) -> Result<InspectorProxy> {
        let listener = TcpListener::bind(SocketAddr::new(self.host, self.port)).await?;
        let local_addr = listener.local_addr()?;

        let client = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build()?;
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let proxy = InspectorProxy {
            inner: Arc::new(ProxyInner {
                local_addr,
                session_id: Uuid::new_v4(),
                commands,
                source_maps: RwLock::new(self.source_maps),
                runtime_url: RwLock::new(runtime.as_ref().map(|c| c.url().to_string())),
                devtools_host: self.devtools_host,
                favicon_url: self.favicon_url,
                browser_predicate: self.browser_predicate,
                client,
                shutdown_tx,
            }),
        };

        let session = Session::new(runtime, proxy.source_map_url());
        tokio::spawn(session.run(commands_rx, proxy.inner.shutdown_tx.subscribe()));

        let app = Router::new()
            .route("/json/version", get(json_version))
            .route("/json", get(json_list))
            .route("/json/list", get(json_list))
            .route("/__index.js.map", get(source_map))
            .route("/favicon.ico", get(favicon))
            .route("/ws", get(debugger_socket))
            .route("/", get(devtools_root))
            .fallback(devtools_asset)
            .layer(TraceLayer::new_for_http())
            .with_state(proxy.clone());

        let mut shutdown_rx = proxy.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                debug!("Inspector proxy shutting down");
            });
            if let Err(e) = server.await {
                error!("Inspector proxy server failed: {}", e);
            }
        });

        info!("Debugger listening on ws://localhost:{}/ws", local_addr.port());
        Ok(proxy)
    }
}

struct ProxyInner {
    local_addr: SocketAddr,
    session_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    source_maps: RwLock<Arc<SourceMapResolver>>,
    runtime_url: RwLock<Option<String>>,
    devtools_host: String,
    favicon_url: String,
    browser_predicate: BrowserPredicate,
    client: reqwest::Client,
    shutdown_tx: broadcast::Sender<()>,
}

/// Handle to a running debugger endpoint. Cheap to clone.
#[derive(Clone)]
pub struct InspectorProxy {
    inner: Arc<ProxyInner>,
}

impl std::fmt::Debug for InspectorProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectorProxy")
            .field("local_addr", &self.inner.local_addr)
            .field("session_id", &self.inner.session_id)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of the relay session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// A debugger is connected
    pub attached: bool,
    /// The connected debugger is browser DevTools
    pub is_browser: bool,
    /// Debugger frames waiting for a runtime
    pub buffered: usize,
    /// Runtime inspector the session relays to
    pub runtime_url: Option<String>,
}

impl InspectorProxy {
    /// Start configuring a proxy
    pub fn builder() -> InspectorProxyBuilder {
        InspectorProxyBuilder::new()
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Bound port
    pub fn port(&self) -> u16 {
        self.inner.local_addr.port()
    }

    /// Id advertised as the single target in `/json`
    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Where browser DevTools fetch the worker source map
    pub fn source_map_url(&self) -> String {
        format!("http://localhost:{}/__index.js.map", self.port())
    }

    /// Swap in the runtime connection of a new generation.
    ///
    /// Resolves once the session relays frames from `connection`, so the
    /// caller can enable the runtime without losing early events.
    pub async fn replace_runtime(&self, connection: Option<Arc<InspectorConnection>>) {
        *self.inner.runtime_url.write() = connection.as_ref().map(|c| c.url().to_string());

        let (done, done_rx) = oneshot::channel();
        if self.send(Command::ReplaceRuntime { connection, done }) {
            let _ = done_rx.await;
        }
    }

    /// Serve a new generation's source map
    pub fn set_source_maps(&self, resolver: Arc<SourceMapResolver>) {
        *self.inner.source_maps.write() = resolver;
    }

    /// Current session state, `None` once shut down
    pub async fn describe(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Describe(tx)) {
            return None;
        }
        rx.await.ok()
    }

    /// Stop the HTTP server and the session actor.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(());
    }

    fn send(&self, command: Command) -> bool {
        self.inner.commands.send(command).is_ok()
    }

    fn ws_host(&self) -> String {
        format!("localhost:{}/ws", self.port())
    }

    fn target(&self) -> InspectorTarget {
        let ws_host = self.ws_host();
        let (devtools_frontend_url, devtools_frontend_url_compat) = frontend_urls(&ws_host);
        let runtime_host =
            self.inner.runtime_url.read().as_deref().map(authority).unwrap_or_else(|| "localhost".to_string());

        InspectorTarget {
            id: self.session_id().to_string(),
            kind: "node".into(),
            title: "MiniOxygen Worker".into(),
            web_socket_debugger_url: format!("ws://{ws_host}"),
            devtools_frontend_url,
            devtools_frontend_url_compat,
            favicon_url: self.inner.favicon_url.clone(),
            url: format!("https://{runtime_host}"),
            ..Default::default()
        }
    }
}

/// `host:port` of a URL
fn authority(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(['/', '?', '#']).next().unwrap_or_default().to_string()
}

/// Frames queued for one debugger socket
#[derive(Debug)]
enum DebuggerFrame {
    Text(String),
    Close(u16, &'static str),
}

enum Command {
    Attach {
        conn_id: u64,
        is_browser: bool,
        outbound: mpsc::UnboundedSender<DebuggerFrame>,
        admitted: oneshot::Sender<bool>,
    },
    Detach {
        conn_id: u64,
    },
    FromDebugger {
        conn_id: u64,
        text: String,
    },
    ReplaceRuntime {
        connection: Option<Arc<InspectorConnection>>,
        done: oneshot::Sender<()>,
    },
    Describe(oneshot::Sender<SessionSnapshot>),
}

struct Debugger {
    conn_id: u64,
    is_browser: bool,
    outbound: mpsc::UnboundedSender<DebuggerFrame>,
}

impl Debugger {
    /// Returns `false` once the socket task is gone.
    fn deliver(&self, frame: &str, source_map_url: &str) -> bool {
        let text = if self.is_browser {
            match rewrite_for_browser(frame, source_map_url) {
                Some(text) => text.into_owned(),
                None => {
                    warn!("Dropping malformed inspector frame");
                    return true;
                }
            }
        } else {
            frame.to_string()
        };
        self.outbound.send(DebuggerFrame::Text(text)).is_ok()
    }
}

/// Relay state, owned by the actor task
struct Session {
    runtime: Option<Arc<InspectorConnection>>,
    frames: Option<mpsc::UnboundedReceiver<Arc<str>>>,
    debugger: Option<Debugger>,
    buffer: VecDeque<Arc<str>>,
    source_map_url: String,
}

impl Session {
    fn new(runtime: Option<Arc<InspectorConnection>>, source_map_url: String) -> Self {
        let frames = runtime.as_ref().map(|c| c.subscribe());
        Self { runtime, frames, debugger: None, buffer: VecDeque::new(), source_map_url }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                frame = recv_runtime(&mut self.frames) => match frame {
                    Some(frame) => self.relay(frame),
                    None => {
                        debug!("Runtime inspector stream ended");
                        self.frames = None;
                    }
                },
                _ = shutdown.recv() => break,
            }
        }

        if let Some(debugger) = self.debugger.take() {
            let _ = debugger.outbound.send(DebuggerFrame::Close(GOING_AWAY, "Shutting down"));
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Attach { conn_id, is_browser, outbound, admitted } => {
                let _ = admitted.send(self.attach(conn_id, is_browser, outbound));
            }
            Command::Detach { conn_id } => {
                if self.debugger.as_ref().is_some_and(|d| d.conn_id == conn_id) {
                    info!("Debugger disconnected");
                    self.debugger = None;
                }
            }
            Command::FromDebugger { conn_id, text } => {
                if !self.debugger.as_ref().is_some_and(|d| d.conn_id == conn_id) {
                    return;
                }
                match &self.runtime {
                    Some(runtime) => {
                        if let Err(e) = runtime.send_raw(text) {
                            debug!("Failed to forward debugger frame: {}", e);
                        }
                    }
                    None => debug!("No runtime inspector; dropping debugger frame"),
                }
            }
            Command::ReplaceRuntime { connection, done } => {
                self.replace_runtime(connection);
                let _ = done.send(());
            }
            Command::Describe(reply) => {
                let _ = reply.send(SessionSnapshot {
                    attached: self.debugger.is_some(),
                    is_browser: self.debugger.as_ref().is_some_and(|d| d.is_browser),
                    buffered: self.buffer.len(),
                    runtime_url: self.runtime.as_ref().map(|c| c.url().to_string()),
                });
            }
        }
    }

    fn attach(&mut self, conn_id: u64, is_browser: bool, outbound: mpsc::UnboundedSender<DebuggerFrame>) -> bool {
        if self.debugger.is_some() {
            return false;
        }

        // Restarting the debugger makes the runtime re-emit scriptParsed
        if let Some(runtime) = &self.runtime {
            if let Err(e) = runtime.send_raw(DEBUGGER_DISABLE) {
                debug!("Failed to reset runtime debugger: {}", e);
            }
        }

        let debugger = Debugger { conn_id, is_browser, outbound };
        for frame in self.buffer.drain(..) {
            debugger.deliver(&frame, &self.source_map_url);
        }
        self.debugger = Some(debugger);
        true
    }

    fn relay(&mut self, frame: Arc<str>) {
        if let Some(debugger) = &self.debugger {
            if debugger.deliver(&frame, &self.source_map_url) {
                return;
            }
            self.debugger = None;
        }
        self.buffer.push_back(frame);
    }

    fn replace_runtime(&mut self, connection: Option<Arc<InspectorConnection>>) {
        if let Some(debugger) = self.debugger.take() {
            info!("Runtime reloaded; disconnecting debugger");
            let _ = debugger.outbound.send(DebuggerFrame::Text(reconnect_warning()));
            let _ = debugger.outbound.send(DebuggerFrame::Close(GOING_AWAY, SOURCE_CHANGED));
        }

        // Dropping the old receiver unsubscribes from the old connection
        self.frames = connection.as_ref().map(|c| c.subscribe());
        self.runtime = connection;
    }
}

async fn recv_runtime(frames: &mut Option<mpsc::UnboundedReceiver<Arc<str>>>) -> Option<Arc<str>> {
    match frames {
        Some(frames) => frames.recv().await,
        None => pending().await,
    }
}

async fn json_version() -> Json<serde_json::Value> {
    Json(json!({ "Browser": "MiniOxygen", "Protocol-Version": "1.3" }))
}

async fn json_list(State(proxy): State<InspectorProxy>) -> Json<Vec<InspectorTarget>> {
    Json(vec![proxy.target()])
}

async fn source_map(State(proxy): State<InspectorProxy>, headers: HeaderMap) -> Response<Body> {
    let origin = headers.get(header::ORIGIN).cloned().unwrap_or_else(|| HeaderValue::from_static("devtools://devtools"));
    let common = [
        (header::CONTENT_TYPE, HeaderValue::from_static("text/plain")),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, origin),
    ];

    let resolver = proxy.inner.source_maps.read().clone();
    match resolver.raw().await {
        Ok(Some(text)) => (common, text).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, common).into_response(),
        Err(e) => {
            warn!("Failed to read source map: {}", e);
            (StatusCode::NOT_FOUND, common).into_response()
        }
    }
}

async fn favicon(State(proxy): State<InspectorProxy>, headers: HeaderMap) -> Response<Body> {
    proxy_asset(&proxy.inner.client, &proxy.inner.favicon_url, &headers, AssetPatch::None).await
}

async fn devtools_root(State(proxy): State<InspectorProxy>, RawQuery(query): RawQuery, headers: HeaderMap) -> Response<Body> {
    if query.as_deref().is_none_or(str::is_empty) {
        let location = format!("/?experiments=true&v8only=true&debugger=true&ws={}", proxy.ws_host());
        return (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
    }

    let url = format!("{}/js_app", proxy.inner.devtools_host);
    proxy_asset(&proxy.inner.client, &url, &headers, AssetPatch::AppendLoadingIndicator).await
}

async fn devtools_asset(
    State(proxy): State<InspectorProxy>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response<Body> {
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = format!("{}{}", proxy.inner.devtools_host, path_and_query);
    proxy_asset(&proxy.inner.client, &url, &headers, AssetPatch::for_path(uri.path())).await
}

async fn debugger_socket(ws: WebSocketUpgrade, headers: HeaderMap, State(proxy): State<InspectorProxy>) -> Response<Body> {
    let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or_default();
    let is_browser = (proxy.inner.browser_predicate)(user_agent);
    ws.on_upgrade(move |socket| relay_debugger(socket, proxy, is_browser))
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame { code, reason: reason.into() }))
}

async fn relay_debugger(socket: WebSocket, proxy: InspectorProxy, is_browser: bool) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
    let (admitted, admitted_rx) = oneshot::channel();

    if !proxy.send(Command::Attach { conn_id, is_browser, outbound, admitted }) {
        let _ = sink.send(close_message(GOING_AWAY, "Shutting down")).await;
        return;
    }
    if !admitted_rx.await.unwrap_or(false) {
        error!("Tried to open a new DevTools window when a previous one was already open.");
        let _ = sink.send(close_message(POLICY_VIOLATION, TOO_MANY_CLIENTS)).await;
        return;
    }
    info!(browser = is_browser, "Debugger attached");

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let (message, last) = match frame {
                DebuggerFrame::Text(text) => (Message::Text(text.into()), false),
                DebuggerFrame::Close(code, reason) => (close_message(code, reason), true),
            };
            if sink.send(message).await.is_err() || last {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                proxy.send(Command::FromDebugger { conn_id, text: text.as_str().to_owned() });
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Debugger socket error: {}", e);
                break;
            }
        }
    }

    proxy.send(Command::Detach { conn_id });
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;


    fn text(frame: DebuggerFrame) -> String {
        match frame {
            DebuggerFrame::Text(text) => text,
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_authority() {
        assert_eq!(authority("ws://127.0.0.1:9222/abc"), "127.0.0.1:9222");
        assert_eq!(authority("ws://localhost:9222"), "localhost:9222");
        assert_eq!(authority(""), "");
    }

    #[test]
    fn test_buffer_flushed_in_order_then_live() {
        let mut session = Session::new(None, "http://localhost:1/__index.js.map".into());
        session.relay(Arc::from("one"));
        session.relay(Arc::from("two"));
        assert_eq!(session.buffer.len(), 2);

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(session.attach(1, false, tx));
        assert!(session.buffer.is_empty());
        session.relay(Arc::from("three"));

        assert_eq!(text(rx.try_recv().unwrap()), "one");
        assert_eq!(text(rx.try_recv().unwrap()), "two");
        assert_eq!(text(rx.try_recv().unwrap()), "three");
        assert!(session.buffer.is_empty());
    }

    #[test]
    fn test_second_debugger_rejected() {
        let mut session = Session::new(None, String::new());
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        assert!(session.attach(1, false, tx1));
        assert!(!session.attach(2, true, tx2));
        assert_eq!(session.debugger.as_ref().map(|d| d.conn_id), Some(1));

        // Detach of the rejected socket must not drop the attached one
        session.handle(Command::Detach { conn_id: 2 });
        assert!(session.debugger.is_some());
        session.handle(Command::Detach { conn_id: 1 });
        assert!(session.debugger.is_none());
    }

    #[test]
    fn test_gone_debugger_falls_back_to_buffering() {
        let mut session = Session::new(None, String::new());
        let (tx, rx) = mpsc::unbounded_channel();
        session.attach(1, false, tx);
        drop(rx);

        session.relay(Arc::from("late"));
        assert!(session.debugger.is_none());
        assert_eq!(session.buffer.len(), 1);
    }

    #[test]
    fn test_replacement_warns_then_closes() {
        let mut session = Session::new(None, String::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.attach(1, true, tx);

        session.replace_runtime(None);
        assert!(text(rx.try_recv().unwrap()).contains("Source code changed"));
        assert!(matches!(rx.try_recv().unwrap(), DebuggerFrame::Close(GOING_AWAY, SOURCE_CHANGED)));
        assert!(session.debugger.is_none());
    }

    #[test]
    fn test_browser_frames_rewritten_on_delivery() {
        let mut session = Session::new(None, "http://localhost:9229/__index.js.map".into());
        session.relay(Arc::from(r#"{"method":"Debugger.scriptParsed","params":{"sourceMapURL":"index.js.map"}}"#));
        session.relay(Arc::from("not json"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.attach(1, true, tx);

        assert!(text(rx.try_recv().unwrap()).contains("http://localhost:9229/__index.js.map"));
        assert!(rx.try_recv().is_err());
    }
}
