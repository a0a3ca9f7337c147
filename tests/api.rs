// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The HTTP control surface, exercised in process through the router

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use sermn::{api, ProcessSupervisor, Registry, SupervisorConfig, WorkloadSpec};

fn app() -> (Router, Arc<ProcessSupervisor>) {
    let registry = Arc::new(Registry::new(vec![
        WorkloadSpec::native("echo", "sleep 5"),
        WorkloadSpec::container("database", "db"),
        WorkloadSpec::native("broken", "/nonexistent/sermn-test-binary"),
    ]));
    let supervisor = Arc::new(ProcessSupervisor::new(registry, &SupervisorConfig::default()));

    (api::router(Arc::clone(&supervisor)), supervisor)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    (status, String::from_utf8(body.to_vec()).unwrap())
}

async fn control(app: &Router, form: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/process/control")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap();

    send(app, request).await
}

async fn list(app: &Router) -> Value {
    let request = Request::get("/process/list").body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);

    serde_json::from_str(&body).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let request = Request::get("/health").body(Body::empty()).unwrap();

    assert_eq!(send(&app, request).await, (StatusCode::OK, "OK".to_string()));
}

#[tokio::test]
async fn test_list_schema() {
    let (app, _) = app();

    assert_eq!(
        list(&app).await,
        json!([
            {"id": 0, "desc": "echo", "status": "DEAD", "mode": "C", "pid": -1},
            {"id": 1, "desc": "database", "status": "DEAD", "mode": "D", "pid": -1},
            {"id": 2, "desc": "broken", "status": "DEAD", "mode": "C", "pid": -1},
        ])
    );
}

#[tokio::test]
async fn test_start_list_kill_list() {
    let (app, _) = app();

    let (status, body) = control(&app, "fn=start&id=0").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("Process started successfully (PID: "), "{}", body);

    let entry = list(&app).await[0].clone();
    assert_eq!(entry["status"], "RUNNING");
    let pid = entry["pid"].as_i64().unwrap();
    assert!(pid > 0);

    let (status, body) = control(&app, "fn=start&id=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, format!("Process is already running (PID: {})", pid));

    let (status, body) = control(&app, "fn=kill&id=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Process terminated successfully");

    let entry = list(&app).await[0].clone();
    assert_eq!(entry["status"], "DEAD");
    assert_eq!(entry["pid"], -1);
}

#[tokio::test]
async fn test_status_function() {
    let (app, _) = app();

    let (status, body) = control(&app, "fn=status&id=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!({"id": 1, "desc": "database", "status": "DEAD", "pid": -1})
    );
}

#[tokio::test]
async fn test_stop_on_dead_is_a_noop() {
    let (app, supervisor) = app();

    for function in ["stop", "kill", "end"] {
        let (status, body) = control(&app, &format!("fn={}&id=0", function)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Process is not running");
    }

    assert!(!supervisor.status(0).unwrap().runtime.is_running());
}

#[tokio::test]
async fn test_graceful_end_alias() {
    let (app, supervisor) = app();

    control(&app, "fn=start&id=0").await;
    let (status, body) = control(&app, "fn=end&id=0").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Process terminated successfully");
    assert!(!supervisor.status(0).unwrap().runtime.is_running());
}

#[tokio::test]
async fn test_bad_requests() {
    let (app, _) = app();

    assert_eq!(control(&app, "fn=start&id=3").await.0, StatusCode::NOT_FOUND);
    assert_eq!(control(&app, "fn=start&id=-1").await.0, StatusCode::NOT_FOUND);
    assert_eq!(control(&app, "fn=start&id=zero").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(control(&app, "fn=restart&id=0").await.0, StatusCode::BAD_REQUEST);
    // the id is checked before the function
    assert_eq!(control(&app, "fn=restart&id=9").await.0, StatusCode::NOT_FOUND);
    assert_eq!(control(&app, "fn=restart&id=x").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(control(&app, "fn=start").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(control(&app, "id=0").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(control(&app, "").await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_spawn_failure_is_a_server_error() {
    let (app, _) = app();

    let (status, body) = control(&app, "fn=start&id=2").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("failed to spawn workload 2"), "{}", body);
    assert_eq!(list(&app).await[2]["status"], "DEAD");
}

#[tokio::test]
async fn test_params_from_query_string() {
    let (app, _) = app();
    let request = Request::post("/process/control?fn=status&id=0")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"desc\":\"echo\""), "{}", body);
}

#[tokio::test]
async fn test_control_requires_post() {
    let (app, _) = app();
    let request = Request::get("/process/control?fn=status&id=0")
        .body(Body::empty())
        .unwrap();

    assert_eq!(send(&app, request).await.0, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_cors() {
    let (app, _) = app();

    let request = Request::get("/process/list")
        .header(header::ORIGIN, "http://dashboard.local")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );

    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/process/control")
        .header(header::ORIGIN, "http://dashboard.local")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(preflight).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let methods = response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap()
        .to_string();
    assert!(methods.contains("POST"), "{}", methods);
}
