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

//! Debugger relay through the inspector proxy

mod common;

use std::{sync::Arc, time::Duration};

use common::FakeRuntime;
use futures::{SinkExt, StreamExt};
use minioxygen_common::ensure_test_logging;
use minioxygen_inspector::{InspectorConnection, InspectorProxy, SessionSnapshot};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::frame::coding::CloseCode, Message},
    MaybeTlsStream, WebSocketStream,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_proxy(runtime: &FakeRuntime) -> (InspectorProxy, Arc<InspectorConnection>) {
    let connection = InspectorConnection::connect(&runtime.url).await.unwrap();
    let proxy = InspectorProxy::builder().port(0).start(Some(connection.clone())).await.unwrap();
    (proxy, connection)
}

async fn attach(proxy: &InspectorProxy, user_agent: Option<&str>) -> Client {
    let mut request = format!("ws://127.0.0.1:{}/ws", proxy.port()).into_client_request().unwrap();
    if let Some(user_agent) = user_agent {
        request.headers_mut().insert("user-agent", user_agent.parse().unwrap());
    }
    connect_async(request).await.unwrap().0
}

async fn next_message(client: &mut Client) -> Message {
    timeout(Duration::from_secs(5), client.next()).await.expect("no frame").expect("stream ended").unwrap()
}

async fn next_text(client: &mut Client) -> String {
    match next_message(client).await {
        Message::Text(text) => text.as_str().to_owned(),
        other => panic!("expected text, got {other:?}"),
    }
}

async fn wait_for(proxy: &InspectorProxy, check: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
    timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = proxy.describe().await.unwrap();
            if check(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session never reached the expected state")
}

#[tokio::test]
async fn test_buffered_frames_flushed_in_order() {
    ensure_test_logging(None);
    let mut runtime = FakeRuntime::start().await;
    let (proxy, _connection) = start_proxy(&runtime).await;

    runtime.emit(r#"{"method":"Runtime.consoleAPICalled","params":{"n":1}}"#);
    runtime.emit(r#"{"method":"Runtime.consoleAPICalled","params":{"n":2}}"#);
    wait_for(&proxy, |s| s.buffered == 2).await;

    let mut debugger = attach(&proxy, None).await;
    assert!(next_text(&mut debugger).await.contains(r#""n":1"#));
    assert!(next_text(&mut debugger).await.contains(r#""n":2"#));
    runtime.expect("Debugger.disable").await;

    runtime.emit(r#"{"method":"Runtime.consoleAPICalled","params":{"n":3}}"#);
    assert!(next_text(&mut debugger).await.contains(r#""n":3"#));

    let snapshot = proxy.describe().await.unwrap();
    assert!(snapshot.attached);
    assert!(!snapshot.is_browser);
    assert_eq!(snapshot.buffered, 0);
}

#[tokio::test]
async fn test_debugger_frames_forwarded_verbatim() {
    ensure_test_logging(None);
    let mut runtime = FakeRuntime::start().await;
    let (proxy, _connection) = start_proxy(&runtime).await;

    let mut debugger = attach(&proxy, None).await;
    let frame = r#"{"id":1,"method":"Debugger.enable","params":{"maxScriptsCacheSize":10000000}}"#;
    debugger.send(Message::text(frame)).await.unwrap();

    assert_eq!(runtime.expect("Debugger.enable").await, frame);
}

#[tokio::test]
async fn test_second_debugger_rejected() {
    ensure_test_logging(None);
    let runtime = FakeRuntime::start().await;
    let (proxy, _connection) = start_proxy(&runtime).await;

    let mut first = attach(&proxy, None).await;
    wait_for(&proxy, |s| s.attached).await;

    let mut second = attach(&proxy, None).await;
    match next_message(&mut second).await {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert!(frame.reason.as_str().contains("only one"));
        }
        other => panic!("expected close, got {other:?}"),
    }

    runtime.emit(r#"{"method":"Debugger.resumed"}"#);
    assert_eq!(next_text(&mut first).await, r#"{"method":"Debugger.resumed"}"#);
    assert!(proxy.describe().await.unwrap().attached);
}

#[tokio::test]
async fn test_runtime_replacement_disconnects_debugger() {
    ensure_test_logging(None);
    let runtime = FakeRuntime::start().await;
    let (proxy, _connection) = start_proxy(&runtime).await;

    let mut debugger = attach(&proxy, None).await;
    wait_for(&proxy, |s| s.attached).await;

    let next_runtime = FakeRuntime::start().await;
    let next_connection = InspectorConnection::connect(&next_runtime.url).await.unwrap();
    proxy.replace_runtime(Some(next_connection)).await;

    let warning = next_text(&mut debugger).await;
    assert!(warning.contains("Runtime.consoleAPICalled"));
    assert!(warning.contains("Source code changed"));
    match next_message(&mut debugger).await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close, got {other:?}"),
    }

    let snapshot = wait_for(&proxy, |s| !s.attached).await;
    assert_eq!(snapshot.runtime_url.as_deref(), Some(next_runtime.url.as_str()));

    // A reconnecting debugger sees the new runtime only
    let mut debugger = attach(&proxy, None).await;
    wait_for(&proxy, |s| s.attached).await;
    runtime.emit(r#"{"method":"Old.event"}"#);
    next_runtime.emit(r#"{"method":"New.event"}"#);
    assert_eq!(next_text(&mut debugger).await, r#"{"method":"New.event"}"#);
}

#[tokio::test]
async fn test_browser_debugger_gets_rewritten_frames() {
    ensure_test_logging(None);
    let runtime = FakeRuntime::start().await;
    let (proxy, _connection) = start_proxy(&runtime).await;

    let mut debugger = attach(&proxy, Some("Mozilla/5.0 (X11; Linux x86_64) Chrome/126.0")).await;
    assert!(wait_for(&proxy, |s| s.attached).await.is_browser);

    runtime.emit(r#"{"method":"Debugger.scriptParsed","params":{"scriptId":"3","sourceMapURL":"index.js.map"}}"#);
    let frame: serde_json::Value = serde_json::from_str(&next_text(&mut debugger).await).unwrap();
    assert_eq!(
        frame["params"]["sourceMapURL"],
        format!("http://localhost:{}/__index.js.map", proxy.port())
    );
}

#[tokio::test]
async fn test_editor_debugger_gets_frames_verbatim() {
    ensure_test_logging(None);
    let runtime = FakeRuntime::start().await;
    let (proxy, _connection) = start_proxy(&runtime).await;

    let mut debugger = attach(&proxy, Some("vscode-js-debug")).await;
    wait_for(&proxy, |s| s.attached).await;

    let frame = r#"{"method":"Debugger.scriptParsed","params":{"scriptId":"3","sourceMapURL":"index.js.map"}}"#;
    runtime.emit(frame);
    assert_eq!(next_text(&mut debugger).await, frame);
}

#[tokio::test]
async fn test_internal_command_responses_not_relayed() {
    ensure_test_logging(None);
    let mut runtime = FakeRuntime::start().await;
    let (proxy, connection) = start_proxy(&runtime).await;

    let mut debugger = attach(&proxy, None).await;
    wait_for(&proxy, |s| s.attached).await;

    let pending = tokio::spawn({
        let connection = connection.clone();
        async move { connection.send_command("Runtime.getIsolateId", None).await }
    });
    let request: serde_json::Value = serde_json::from_str(&runtime.expect("Runtime.getIsolateId").await).unwrap();
    let id = request["id"].as_i64().unwrap();
    assert!(id < 0);

    runtime.emit(&format!(r#"{{"id":{id},"result":{{"id":"isolate"}}}}"#));
    runtime.emit(r#"{"method":"After.internal"}"#);

    assert_eq!(pending.await.unwrap().unwrap()["id"], "isolate");
    assert_eq!(next_text(&mut debugger).await, r#"{"method":"After.internal"}"#);
}
