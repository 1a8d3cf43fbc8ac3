//! Operator API integration tests: submission round trips, error mapping,
//! batch partial failure, and shutdown over HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use docpool::{api::api_router, ApiState, FunctionRegistry, PoolConfig, WorkerPool};
use serde_json::{json, Value};
use tower::ServiceExt;

fn started_app() -> (Router, Arc<WorkerPool>) {
    let registry = Arc::new(FunctionRegistry::new());
    registry.register_fn("echo", |args| async move { Ok(args) });
    registry.register_fn("sleep", |args| async move {
        let ms = args["ms"].as_u64().unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    });

    let pool = Arc::new(WorkerPool::new(PoolConfig::default(), registry));
    pool.start();

    let state = ApiState::new(Arc::clone(&pool), Duration::from_secs(5));
    (api_router(state), pool)
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_submit_and_poll_round_trip() {
    let (app, pool) = started_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/submit",
            r#"{"category":"rag_query","priority":"critical","function_key":"echo","args":{"q":"how do I install?"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let submit = json_body(response).await;
    let task_id = submit["task_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(get(&format!("/tasks/{task_id}?wait_ms=5000")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let task = json_body(response).await;
    assert_eq!(task["status"], "completed");
    assert_eq!(task["value"]["q"], "how do I install?");
    assert_eq!(task["attempts"], 1);
    assert_eq!(task["timed_out"], false);

    pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn test_bounded_wait_reports_timeout() {
    let (app, pool) = started_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/submit",
            r#"{"category":"batch","priority":"bulk","function_key":"sleep","args":{"ms":60000}}"#,
        ))
        .await
        .unwrap();
    let task_id = json_body(response).await["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(get(&format!("/tasks/{task_id}?wait_ms=50")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let task = json_body(response).await;
    assert_eq!(task["timed_out"], true);
    assert_ne!(task["status"], "completed");

    pool.stop(Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn test_batch_reports_partial_failure() {
    let (app, pool) = started_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/submit_batch",
            r#"[
                {"category":"embedding","priority":"normal","function_key":"echo"},
                {"category":"embedding","priority":"normal","function_key":"not_registered"}
            ]"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let items = json_body(response).await;
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items[0]["task_id"].is_string());
    assert!(items[0].get("error").is_none());
    assert_eq!(items[1]["error"], "invalid_task");
    assert!(items[1].get("task_id").is_none());

    pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn test_stats_reflect_completed_work() {
    let (app, pool) = started_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/submit",
            r#"{"category":"scraping","priority":"normal","function_key":"echo"}"#,
        ))
        .await
        .unwrap();
    let task_id = json_body(response).await["task_id"]
        .as_str()
        .unwrap()
        .to_string();
    pool.await_result(&task_id, Duration::from_secs(5))
        .await
        .unwrap();

    let response = app.clone().oneshot(get("/stats")).await.unwrap();
    let stats = json_body(response).await;
    assert_eq!(stats["categories"]["scraping"]["completed"], 1);
    assert_eq!(stats["categories"]["scraping"]["workers"], 6);
    assert_eq!(stats["running"], true);
    assert!(stats["breakers"]["openai"]["state"].is_string());

    pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn test_health_reports_healthy_pool() {
    let (app, pool) = started_app();

    // Let the worker loops come up.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = json_body(response).await;
    assert_eq!(health["healthy"], true);
    assert_eq!(health["running"], true);
    assert_eq!(health["workers"]["total"], 22);
    assert_eq!(health["workers"]["alive"], 22);
    assert_eq!(health["workers"]["health_percent"], 100.0);

    pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn test_activity_endpoint_honors_limit() {
    let (app, pool) = started_app();

    for i in 0..5 {
        let response = app
            .clone()
            .oneshot(post_json(
                "/submit",
                &format!(
                    r#"{{"category":"batch","priority":"normal","function_key":"echo","args":{{"i":{i}}}}}"#
                ),
            ))
            .await
            .unwrap();
        let task_id = json_body(response).await["task_id"]
            .as_str()
            .unwrap()
            .to_string();
        pool.await_result(&task_id, Duration::from_secs(5))
            .await
            .unwrap();
    }

    let response = app.clone().oneshot(get("/activity?limit=3")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = json_body(response).await;
    let events = events.as_array().unwrap().clone();
    assert_eq!(events.len(), 3);
    // Oldest first: timestamps never decrease.
    let stamps: Vec<chrono::DateTime<chrono::Utc>> = events
        .iter()
        .map(|e| {
            e["timestamp"]
                .as_str()
                .unwrap()
                .parse()
                .expect("rfc3339 timestamp")
        })
        .collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));

    pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_endpoint_stops_pool() {
    let (app, pool) = started_app();

    let response = app
        .clone()
        .oneshot(post_json("/shutdown", r#"{"drain_timeout_secs":2}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["stopped"], true);
    assert!(!pool.is_running());

    let response = app
        .clone()
        .oneshot(post_json(
            "/submit",
            r#"{"category":"batch","priority":"normal","function_key":"echo"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"], "pool_shutting_down");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_without_body_uses_default_drain() {
    let (app, pool) = started_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/shutdown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["stopped"], true);
    assert!(!pool.is_running());
}
