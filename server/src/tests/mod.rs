//! Integration tests for the server binary's HTTP surface, wired end-to-end
//! through `create_router` with the real filesystem/SQLite `infra` port
//! implementations, following the teacher's `oneshot`-driven `api_tests.rs`.

use super::*;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

fn build_test_registry(stream_root: &std::path::Path, program_root: &std::path::Path, data_dir: &std::path::Path) -> Arc<SchedulerRegistry> {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".into(),
        database_path: data_dir.join("schedules.sqlite3"),
        polling_delay_seconds: 3600,
        stream_root: stream_root.to_path_buf(),
        dispatch_program_root: program_root.to_path_buf(),
    };
    build_registry(&config).unwrap()
}

async fn json_request(method: Method, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&value).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn health_check_returns_ok() {
    let temp = tempfile::tempdir().unwrap();
    let registry = build_test_registry(&temp.path().join("streams"), &temp.path().join("programs"), &temp.path().join("data"));
    let app = api::create_router(AppState { registry });

    let response = app
        .oneshot(json_request(Method::GET, "/health", None).await)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn full_lifecycle_through_the_http_surface() {
    let temp = tempfile::tempdir().unwrap();
    let stream_root = temp.path().join("streams");
    std::fs::create_dir_all(&stream_root).unwrap();
    std::fs::write(stream_root.join("logs"), b"").unwrap();

    let registry = build_test_registry(&stream_root, &temp.path().join("programs"), &temp.path().join("data"));
    let app = api::create_router(AppState { registry });

    let create_body = serde_json::json!({
        "namespace": "ns",
        "application": "app",
        "program": "prog",
        "program_type": "batch",
        "stream_name": "logs",
        "data_trigger_mb": 1,
        "schedule_name": "sched",
    });
    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/schedules", Some(create_body)).await)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(json_request(Method::GET, "/schedules/ns/app/batch/prog/sched/state", None).await)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, "\"scheduled\"".as_bytes());

    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/schedules/ns/app/batch/prog/sched/suspend", None).await)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(json_request(Method::GET, "/schedules/ns/app/batch/prog", None).await)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let ids: Vec<String> = serde_json::from_slice(&body).unwrap();
    assert_eq!(ids, vec!["ns:app:batch:prog:sched".to_string()]);

    let response = app
        .oneshot(json_request(Method::DELETE, "/schedules/ns/app/batch/prog/sched", None).await)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn suspending_an_unknown_schedule_returns_404() {
    let temp = tempfile::tempdir().unwrap();
    let registry = build_test_registry(&temp.path().join("streams"), &temp.path().join("programs"), &temp.path().join("data"));
    let app = api::create_router(AppState { registry });

    let response = app
        .oneshot(json_request(Method::POST, "/schedules/ns/app/batch/prog/missing/suspend", None).await)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn creating_with_a_zero_trigger_returns_400() {
    let temp = tempfile::tempdir().unwrap();
    let stream_root = temp.path().join("streams");
    std::fs::create_dir_all(&stream_root).unwrap();
    std::fs::write(stream_root.join("logs"), b"").unwrap();
    let registry = build_test_registry(&stream_root, &temp.path().join("programs"), &temp.path().join("data"));
    let app = api::create_router(AppState { registry });

    let create_body = serde_json::json!({
        "namespace": "ns",
        "application": "app",
        "program": "prog",
        "program_type": "batch",
        "stream_name": "logs",
        "data_trigger_mb": 0,
        "schedule_name": "sched",
    });
    let response = app
        .oneshot(json_request(Method::POST, "/schedules", Some(create_body)).await)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
