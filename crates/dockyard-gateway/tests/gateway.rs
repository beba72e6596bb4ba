use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use dockyard_gateway::{create_app, AppState};
use dockyard_orchestrator::{BlockingBridge, BridgeConfig, Orchestrator};
use dockyard_runtime::test_utils::{MockBehavior, MockRuntime};
use dockyard_store::{InMemoryStore, StatusStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    orchestrator: Orchestrator,
    runtime: MockRuntime,
}

fn create_test_app() -> TestApp {
    let store: Arc<dyn StatusStore> = Arc::new(InMemoryStore::new());
    let runtime = MockRuntime::new();
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(runtime.clone()),
        BlockingBridge::new(BridgeConfig::default()),
    );
    let app = create_app(AppState {
        store,
        orchestrator: orchestrator.clone(),
    });
    TestApp {
        app,
        orchestrator,
        runtime,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn register_demo(app: &Router) -> Value {
    let (status, json) = send(
        app,
        "POST",
        "/images",
        Some(json!({ "name": "demo", "base": "alpine:3.18", "code": "RUN echo hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    json["image"].clone()
}

#[tokio::test]
async fn test_health_endpoint() {
    let t = create_test_app();
    let (status, json) = send(&t.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_create_and_list_images() {
    let t = create_test_app();

    let image = register_demo(&t.app).await;
    assert_eq!(image["id"], 1);
    assert_eq!(image["name"], "demo");
    assert_eq!(image["base"], "alpine:3.18");

    let (status, json) = send(&t.app, "GET", "/images", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["images"].as_array().unwrap().len(), 1);
    assert_eq!(json["images"][0], image);
}

#[tokio::test]
async fn test_invalid_image_is_rejected() {
    let t = create_test_app();

    let long_name = "x".repeat(101);
    for body in [
        json!({ "name": "", "base": "alpine:3.18", "code": "" }),
        json!({ "name": long_name, "base": "alpine:3.18", "code": "" }),
        json!({ "name": "demo", "base": " ", "code": "" }),
    ] {
        let (status, json) = send(&t.app, "POST", "/images", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_IMAGE");
        assert!(json["error"].is_string());
    }

    let (_, json) = send(&t.app, "GET", "/images", None).await;
    assert!(json["images"].as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_build_lifecycle_over_http() {
    let t = create_test_app();
    let image = register_demo(&t.app).await;

    let (status, json) = send(&t.app, "POST", "/builds", Some(json!({ "image_id": image["id"] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["build"]["id"], 1);
    assert_eq!(json["build"]["status"], "new");
    assert_eq!(json["build"]["is_success"], true);
    assert!(json["build"]["container_id"].is_null());

    t.orchestrator.wait_idle().await;
    let (status, json) = send(&t.app, "GET", "/builds/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["build"]["status"], "running");
    assert_eq!(json["build"]["container_id"], "mock-container-1");

    let (status, json) = send(&t.app, "POST", "/stop/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");

    t.orchestrator.wait_idle().await;
    let (_, json) = send(&t.app, "GET", "/builds", None).await;
    assert_eq!(json["builds"].as_array().unwrap().len(), 1);
    assert_eq!(json["builds"][0]["status"], "finished");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_build_is_visible_through_flag() {
    let t = create_test_app();
    t.runtime.set_behavior(MockBehavior::BuildError);
    register_demo(&t.app).await;

    let (status, _) = send(&t.app, "POST", "/builds", Some(json!({ "image_id": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    t.orchestrator.wait_idle().await;

    let (_, json) = send(&t.app, "GET", "/builds/1", None).await;
    assert_eq!(json["build"]["status"], "new");
    assert_eq!(json["build"]["is_success"], false);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let t = create_test_app();

    let (status, json) = send(&t.app, "POST", "/builds", Some(json!({ "image_id": 7 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "Not found");

    let (status, json) = send(&t.app, "GET", "/builds/7", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "Not found");

    let (status, json) = send(&t.app, "POST", "/stop/7", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "Not found");

    let (_, json) = send(&t.app, "GET", "/builds", None).await;
    assert!(json["builds"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_submission_after_shutdown_is_internal_error() {
    let t = create_test_app();
    register_demo(&t.app).await;
    t.orchestrator.shutdown().await;

    let (status, json) = send(&t.app, "POST", "/builds", Some(json!({ "image_id": 1 }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL");
}
