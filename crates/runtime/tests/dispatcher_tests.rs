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

//! Integration tests for the runtime dispatcher

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
};
use minioxygen_common::ensure_test_logging;
use minioxygen_runtime::{
    Bindings, Dispatcher, FnWorker, HttpWorker, RuntimeConfig, WorkerError, WorkerRequest,
};
use tokio::sync::Notify;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn text_response(text: &'static str) -> Response<Body> {
    Response::builder()
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(text))
        .unwrap()
}

fn text_worker(text: &'static str) -> RuntimeConfig {
    RuntimeConfig::new(FnWorker::new(move |_req: WorkerRequest, _env: Bindings| async move {
        Ok::<_, WorkerError>(text_response(text))
    }))
}

async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_reload_swaps_behavior() {
    ensure_test_logging(None);

    let dispatcher = Dispatcher::new(text_worker("foo"));
    assert_eq!(body_string(dispatcher.dispatch(get("/")).await).await, "foo");

    let instance = dispatcher.replace(text_worker("bar")).await.unwrap();
    assert_eq!(instance.generation(), 1);
    assert_eq!(body_string(dispatcher.dispatch(get("/")).await).await, "bar");
}

#[tokio::test]
async fn test_in_flight_request_finishes_on_old_instance() {
    ensure_test_logging(None);

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let (started_w, release_w) = (started.clone(), release.clone());
    let slow = RuntimeConfig::new(FnWorker::new(move |_req: WorkerRequest, _env: Bindings| {
        let started = started_w.clone();
        let release = release_w.clone();
        async move {
            started.notify_one();
            release.notified().await;
            Ok::<_, WorkerError>(text_response("foo"))
        }
    }));
    let dispatcher = Dispatcher::new(slow);

    let in_flight = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { body_string(dispatcher.dispatch(get("/")).await).await })
    };
    started.notified().await;

    dispatcher.replace(text_worker("bar")).await.unwrap();
    assert_eq!(body_string(dispatcher.dispatch(get("/")).await).await, "bar");

    release.notify_one();
    assert_eq!(in_flight.await.unwrap(), "foo");
}

#[tokio::test]
async fn test_reload_mutator_sees_previous_bindings() {
    ensure_test_logging(None);

    let mut bindings = Bindings::new();
    bindings.insert("PUBLIC_STORE_DOMAIN".into(), "shop.example".into());

    let echo = FnWorker::new(|_req: WorkerRequest, env: Bindings| async move {
        let body = env.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(";");
        Ok::<_, WorkerError>(Response::new(Body::from(body)))
    });
    let dispatcher = Dispatcher::new(RuntimeConfig::new(echo).with_bindings(bindings));
    let mut reloads = dispatcher.subscribe_reloads();

    dispatcher
        .reload(|mut config| async move {
            config.bindings.insert("SESSION_SECRET".into(), "s3cr3t".into());
            Ok::<_, eyre::Report>(config)
        })
        .await
        .unwrap();

    let event = reloads.recv().await.unwrap();
    assert_eq!(event.instance.generation(), 1);
    assert_eq!(
        body_string(dispatcher.dispatch(get("/")).await).await,
        "PUBLIC_STORE_DOMAIN=shop.example;SESSION_SECRET=s3cr3t"
    );
}

#[tokio::test]
async fn test_redirect_is_returned_verbatim_with_empty_body() {
    ensure_test_logging(None);

    let redirect = FnWorker::new(|_req: WorkerRequest, _env: Bindings| async move {
        Ok::<_, WorkerError>(
            Response::builder()
                .status(StatusCode::FOUND)
                .header(header::LOCATION, "/account/login")
                .header(header::SET_COOKIE, "session_token=abc; Path=/")
                .header(header::SET_COOKIE, "refresh_token=def; Path=/")
                .body(Body::from("Redirecting to /account/login"))
                .unwrap(),
        )
    });
    let dispatcher = Dispatcher::new(RuntimeConfig::new(redirect));

    let response = dispatcher.dispatch(get("/account")).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/account/login");
    assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
    assert_eq!(body_string(response).await, "");
}

#[tokio::test]
async fn test_worker_error_becomes_500_and_is_broadcast() {
    ensure_test_logging(None);

    let failing = FnWorker::new(|_req: WorkerRequest, _env: Bindings| async move {
        Err::<Response<Body>, _>(
            WorkerError::new("oops").with_stack("Error: oops\n    at handler (index.js:3:11)"),
        )
    });
    let dispatcher = Dispatcher::new(RuntimeConfig::new(failing));
    let mut errors = dispatcher.subscribe_errors();
    let mut requests = dispatcher.subscribe_requests();

    let response = dispatcher.dispatch(get("/broken")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain; charset=UTF-8");
    assert_eq!(body_string(response).await, "Error: oops\n    at handler (index.js:3:11)");

    let err = errors.recv().await.unwrap();
    assert_eq!(err.message, "oops");

    let event = requests.recv().await.unwrap();
    assert_eq!(event.status, 500);
    assert_eq!(event.url, "/broken");
}

#[tokio::test]
async fn test_request_event_carries_id_and_purpose() {
    ensure_test_logging(None);

    let dispatcher = Dispatcher::new(text_worker("ok"));
    let mut requests = dispatcher.subscribe_requests();

    let request = Request::builder()
        .method("POST")
        .uri("/cart?step=2")
        .header("request-id", "req-42")
        .header("purpose", "prefetch")
        .body(Body::empty())
        .unwrap();
    let response = dispatcher.dispatch(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let event = requests.recv().await.unwrap();
    assert_eq!(event.request_id, "req-42");
    assert_eq!(event.method, "POST");
    assert_eq!(event.url, "/cart?step=2");
    assert_eq!(event.purpose.as_deref(), Some("prefetch"));
    assert!(event.is_prefetch());
    assert!(event.end_time >= event.start_time);
}

#[tokio::test]
async fn test_http_worker_does_not_follow_redirects() {
    ensure_test_logging(None);

    let host = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/account/login")
                .append_header("set-cookie", "session_token=abc")
                .append_header("set-cookie", "refresh_token=def")
                .append_header("set-cookie", "user_id=42")
                .set_body_string("Redirecting"),
        )
        .mount(&host)
        .await;

    let worker = HttpWorker::new(host.uri()).unwrap();
    let dispatcher = Dispatcher::new(RuntimeConfig::new(worker));

    let response = dispatcher.dispatch(get("/account")).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/account/login");
    let cookies: Vec<_> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cookies, vec!["session_token=abc", "refresh_token=def", "user_id=42"]);
    assert_eq!(body_string(response).await, "");
}

#[tokio::test]
async fn test_http_worker_forwards_method_path_and_body() {
    ensure_test_logging(None);

    let host = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/cart"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .mount(&host)
        .await;

    let worker = HttpWorker::new(host.uri()).unwrap();
    let dispatcher = Dispatcher::new(RuntimeConfig::new(worker));

    let request = Request::builder()
        .method("POST")
        .uri("/api/cart?x=1")
        .body(Body::from("{\"line\":1}"))
        .unwrap();
    let response = dispatcher.dispatch(request).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_string(response).await, "created");

    let received = host.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, b"{\"line\":1}");
    assert!(received[0].headers.contains_key("request-id"));
}

#[tokio::test]
async fn test_http_worker_unreachable_host_is_500() {
    ensure_test_logging(None);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let worker = HttpWorker::new(format!("http://{addr}")).unwrap();
    let dispatcher = Dispatcher::new(RuntimeConfig::new(worker));

    let response = dispatcher.dispatch(get("/")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
