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

//! Connection to the worker runtime's own inspector socket
//!
//! The connection has two jobs: relay raw frames to whoever subscribed
//! (the console logger and the debugger proxy), and run internal commands
//! for the logger. Internal commands use negative ids so they can never
//! collide with ids chosen by an attached debugger; their responses are
//! consumed here and never fanned out.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{interval, timeout, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{
    protocol::{InspectorMessage, InspectorTarget},
    InspectorError,
};

/// Interval of the `Runtime.getIsolateId` keep-alive
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Internal commands that take longer than this are abandoned
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value, InspectorError>>>>>;
type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<Arc<str>>>>>;

/// Find the inspector websocket URL of the user worker.
///
/// A worker host can run several workers; the one running user code is
/// listed as `core:user:<worker_name>` in the `/json` target list.
pub async fn find_inspector_url(port: u16, worker_name: &str) -> Result<String, InspectorError> {
    let json_url = format!("http://127.0.0.1:{port}/json");
    let wanted = format!("core:user:{worker_name}");

    let targets: Vec<InspectorTarget> = reqwest::get(&json_url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| InspectorError::Discovery(e.to_string()))?
        .json()
        .await
        .map_err(|e| InspectorError::Discovery(e.to_string()))?;

    targets
        .into_iter()
        .find(|t| t.id == wanted)
        .map(|t| t.web_socket_debugger_url)
        .ok_or_else(|| InspectorError::Discovery("Unable to find inspector URL".into()))
}

/// Live websocket connection to the runtime inspector.
pub struct InspectorConnection {
    url: String,
    outbound: mpsc::UnboundedSender<Message>,
    subscribers: Subscribers,
    pending: Pending,
    next_id: AtomicI64,
    closed: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for InspectorConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectorConnection")
            .field("url", &self.url)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl InspectorConnection {
    /// Open the websocket. Frames are relayed to subscribers right away;
    /// call [`enable`](Self::enable) once everyone has subscribed.
    pub async fn connect(url: &str) -> Result<Arc<Self>, InspectorError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| InspectorError::Connect { url: url.to_string(), source: Box::new(e) })?;
        let (mut sink, mut stream) = socket.split();
        info!("Connected to runtime inspector at {}", url);

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let subscribers: Subscribers = Arc::default();
        let pending: Pending = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    debug!("Runtime inspector write failed: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        let reader = {
            let subscribers = subscribers.clone();
            let pending = pending.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(message) = stream.next().await {
                    match message {
                        Ok(Message::Text(text)) => route_frame(text.as_str(), &pending, &subscribers),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Runtime inspector socket error: {}", e);
                            break;
                        }
                    }
                }

                debug!("Runtime inspector socket closed");
                closed.store(true, Ordering::SeqCst);
                // Ends every subscriber stream and fails outstanding commands
                subscribers.lock().clear();
                pending.lock().clear();
            })
        };

        Ok(Arc::new(Self {
            url: url.to_string(),
            outbound,
            subscribers,
            pending,
            next_id: AtomicI64::new(-1),
            closed,
            tasks: Mutex::new(vec![writer, reader]),
        }))
    }

    /// The runtime inspector websocket URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The socket is gone, the reader task has stopped
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Receive every frame from now on, in order. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<str>> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_closed() {
            self.subscribers.lock().push(tx);
        }
        rx
    }

    /// Send `Runtime.enable` and start the keep-alive.
    pub fn enable(self: &Arc<Self>) {
        self.notify("Runtime.enable", None);

        let weak = Arc::downgrade(self);
        let keep_alive = tokio::spawn(async move {
            let mut ticker = interval(KEEP_ALIVE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(connection) = weak.upgrade() else { break };
                if connection.is_closed() {
                    break;
                }
                connection.notify("Runtime.getIsolateId", None);
            }
        });
        self.tasks.lock().push(keep_alive);
    }

    /// Forward a raw frame (e.g. from an attached debugger) unchanged.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<(), InspectorError> {
        if self.is_closed() {
            return Err(InspectorError::Closed);
        }
        self.outbound.send(Message::text(text.into())).map_err(|_| InspectorError::Closed)
    }

    /// Run an internal command and wait for its `result`.
    pub async fn send_command(&self, method: &str, params: Option<Value>) -> Result<Value, InspectorError> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.send_raw(command_frame(id, method, params)) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(InspectorError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(InspectorError::Timeout(method.to_string()))
            }
        }
    }

    /// Close the socket and stop all background tasks.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing runtime inspector connection to {}", self.url);
            let _ = self.outbound.send(Message::Close(None));
        }
        self.subscribers.lock().clear();
        self.pending.lock().clear();

        // Give the writer a chance to flush the close frame
        let tasks = std::mem::take(&mut *self.tasks.lock());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            for task in tasks {
                task.abort();
            }
        });
    }

    /// Fire-and-forget internal command.
    fn notify(&self, method: &str, params: Option<Value>) {
        let id = self.next_id();
        if let Err(e) = self.send_raw(command_frame(id, method, params)) {
            debug!("Failed to send {}: {}", method, e);
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_sub(1, Ordering::SeqCst)
    }
}

impl Drop for InspectorConnection {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

fn command_frame(id: i64, method: &str, params: Option<Value>) -> String {
    let mut frame = json!({ "id": id, "method": method });
    if let Some(params) = params {
        frame["params"] = params;
    }
    frame.to_string()
}

/// Resolve internal responses, fan everything else out to subscribers.
fn route_frame(text: &str, pending: &Pending, subscribers: &Subscribers) {
    if let Ok(InspectorMessage { id: Some(id), result, error, .. }) = serde_json::from_str(text) {
        if id < 0 {
            if let Some(tx) = pending.lock().remove(&id) {
                let outcome = match error {
                    Some(error) => Err(InspectorError::Protocol(error.to_string())),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
            return;
        }
    }

    let frame: Arc<str> = Arc::from(text);
    subscribers.lock().retain(|tx| tx.send(frame.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame() {
        let frame: Value = serde_json::from_str(&command_frame(-1, "Runtime.enable", None)).unwrap();
        assert_eq!(frame, json!({"id": -1, "method": "Runtime.enable"}));

        let frame: Value =
            serde_json::from_str(&command_frame(-2, "Runtime.getProperties", Some(json!({"objectId": "1"})))).unwrap();
        assert_eq!(frame["params"]["objectId"], "1");
    }

    #[test]
    fn test_internal_responses_are_not_relayed() {
        let pending: Pending = Arc::default();
        let subscribers: Subscribers = Arc::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        subscribers.lock().push(tx);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        pending.lock().insert(-4, reply_tx);

        route_frame(r#"{"id":-4,"result":{"id":"isolate-1"}}"#, &pending, &subscribers);
        route_frame(r#"{"id":7,"result":{}}"#, &pending, &subscribers);
        route_frame(r#"{"method":"Runtime.executionContextCreated","params":{}}"#, &pending, &subscribers);

        assert_eq!(reply_rx.try_recv().unwrap().unwrap(), json!({"id": "isolate-1"}));
        assert_eq!(&*rx.try_recv().unwrap(), r#"{"id":7,"result":{}}"#);
        assert!(rx.try_recv().unwrap().contains("executionContextCreated"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let pending: Pending = Arc::default();
        let subscribers: Subscribers = Arc::default();
        let (tx, rx) = mpsc::unbounded_channel();
        subscribers.lock().push(tx);
        drop(rx);

        route_frame(r#"{"method":"Debugger.paused"}"#, &pending, &subscribers);
        assert!(subscribers.lock().is_empty());
    }
}
