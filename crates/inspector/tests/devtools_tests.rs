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

//! Discovery, source map and DevTools asset routes of the inspector proxy

mod common;

use std::sync::Arc;

use common::{FakeRuntime, SOURCE_MAP};
use minioxygen_common::ensure_test_logging;
use minioxygen_inspector::{devtools::LOADING_INDICATOR, InspectorConnection, InspectorProxy, SourceMapResolver};
use reqwest::{header, redirect::Policy, StatusCode};
use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn client() -> reqwest::Client {
    reqwest::Client::builder().redirect(Policy::none()).build().unwrap()
}

fn base(proxy: &InspectorProxy) -> String {
    format!("http://127.0.0.1:{}", proxy.port())
}

#[tokio::test]
async fn test_json_version() {
    ensure_test_logging(None);
    let proxy = InspectorProxy::builder().port(0).start(None).await.unwrap();

    let body: Value = client().get(format!("{}/json/version", base(&proxy))).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["Browser"], "MiniOxygen");
    assert_eq!(body["Protocol-Version"], "1.3");
}

#[tokio::test]
async fn test_target_list_points_at_proxy() {
    ensure_test_logging(None);
    let runtime = FakeRuntime::start().await;
    let connection = InspectorConnection::connect(&runtime.url).await.unwrap();
    let proxy = InspectorProxy::builder().port(0).start(Some(connection)).await.unwrap();
    let port = proxy.port();

    for route in ["/json", "/json/list"] {
        let targets: Value = client().get(format!("{}{route}", base(&proxy))).send().await.unwrap().json().await.unwrap();
        let targets = targets.as_array().unwrap();
        assert_eq!(targets.len(), 1);

        let target = &targets[0];
        assert_eq!(target["id"], proxy.session_id().to_string());
        assert_eq!(target["type"], "node");
        assert_eq!(target["title"], "MiniOxygen Worker");
        assert_eq!(target["webSocketDebuggerUrl"], format!("ws://localhost:{port}/ws"));
        assert_eq!(
            target["devtoolsFrontendUrl"],
            format!("devtools://devtools/bundled/js_app.html?experiments=true&v8only=true&ws=localhost:{port}/ws")
        );
        assert!(target["devtoolsFrontendUrlCompat"].as_str().unwrap().contains("inspector.html"));

        let runtime_host = runtime.url.trim_start_matches("ws://").trim_end_matches("/isolate");
        assert_eq!(target["url"], format!("https://{runtime_host}"));
    }
}

#[tokio::test]
async fn test_target_list_without_runtime() {
    ensure_test_logging(None);
    let proxy = InspectorProxy::builder().port(0).start(None).await.unwrap();

    let targets: Value = client().get(format!("{}/json", base(&proxy))).send().await.unwrap().json().await.unwrap();
    assert_eq!(targets[0]["url"], "https://localhost");
    assert_eq!(targets[0]["webSocketDebuggerUrl"], format!("ws://localhost:{}/ws", proxy.port()));
}

#[tokio::test]
async fn test_source_map_missing() {
    ensure_test_logging(None);
    let proxy = InspectorProxy::builder().port(0).start(None).await.unwrap();

    let response = client().get(format!("{}/__index.js.map", base(&proxy))).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "devtools://devtools");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
}

#[tokio::test]
async fn test_source_map_served_with_origin() {
    ensure_test_logging(None);
    let dir = tempfile::tempdir().unwrap();
    let map_path = dir.path().join("index.js.map");
    std::fs::write(&map_path, SOURCE_MAP).unwrap();

    let proxy = InspectorProxy::builder()
        .port(0)
        .source_maps(Arc::new(SourceMapResolver::new(Some(map_path))))
        .start(None)
        .await
        .unwrap();

    let response = client()
        .get(format!("{}/__index.js.map", base(&proxy)))
        .header(header::ORIGIN, "http://localhost:3000")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
    assert_eq!(response.text().await.unwrap(), SOURCE_MAP);

    // Swapped on reload
    proxy.set_source_maps(Arc::new(SourceMapResolver::new(None)));
    let response = client().get(format!("{}/__index.js.map", base(&proxy))).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_root_redirects_to_devtools_ui() {
    ensure_test_logging(None);
    let proxy = InspectorProxy::builder().port(0).start(None).await.unwrap();

    let response = client().get(format!("{}/", base(&proxy))).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("/?experiments=true&v8only=true&debugger=true&ws=localhost:{}/ws", proxy.port()).as_str()
    );
}

#[tokio::test]
async fn test_root_document_gets_loading_indicator() {
    ensure_test_logging(None);
    let devtools = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/js_app"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>"))
        .mount(&devtools)
        .await;

    let proxy = InspectorProxy::builder().port(0).devtools_host(devtools.uri()).start(None).await.unwrap();
    let body = client()
        .get(format!("{}/?experiments=true", base(&proxy)))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(body, format!("<html><body>{LOADING_INDICATOR}"));
    assert!(body.ends_with("</body></html>"));
}

#[tokio::test]
async fn test_vendor_name_patched_and_cookies_dropped() {
    ensure_test_logging(None);
    let devtools = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/panels/sources/sources-meta.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("const title = 'Cloudflare';"))
        .mount(&devtools)
        .await;

    let proxy = InspectorProxy::builder().port(0).devtools_host(devtools.uri()).start(None).await.unwrap();
    let response = client()
        .get(format!("{}/panels/sources/sources-meta.js", base(&proxy)))
        .header(header::COOKIE, "secret=1")
        .header(header::ACCEPT_ENCODING, "gzip")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), r#"const title = "MiniOxygen";"#);

    let received = devtools.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("cookie").is_none());
    assert!(received[0].headers.get("accept-encoding").is_none());
}

#[tokio::test]
async fn test_unpatched_asset_streams_and_keeps_encoding_header() {
    ensure_test_logging(None);
    let devtools = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entrypoints/js_app/js_app.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("'Cloudflare'"))
        .mount(&devtools)
        .await;

    let proxy = InspectorProxy::builder().port(0).devtools_host(devtools.uri()).start(None).await.unwrap();
    let body = client()
        .get(format!("{}/entrypoints/js_app/js_app.js", base(&proxy)))
        .header(header::ACCEPT_ENCODING, "identity")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "'Cloudflare'");

    let received = devtools.received_requests().await.unwrap();
    assert_eq!(received[0].headers.get("accept-encoding").unwrap(), "identity");
}

#[tokio::test]
async fn test_upstream_error_status_has_empty_body() {
    ensure_test_logging(None);
    let devtools = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.js"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&devtools)
        .await;

    let proxy = InspectorProxy::builder().port(0).devtools_host(devtools.uri()).start(None).await.unwrap();
    let response = client().get(format!("{}/missing.js", base(&proxy))).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "");
}

#[tokio::test]
async fn test_unreachable_devtools_host() {
    ensure_test_logging(None);
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let host = format!("http://{}", unused.local_addr().unwrap());
    drop(unused);

    let proxy = InspectorProxy::builder().port(0).devtools_host(host).start(None).await.unwrap();
    let response = client().get(format!("{}/some/asset.js", base(&proxy))).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text().await.unwrap(), "Internal error");
}
