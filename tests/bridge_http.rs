//! Bridge HTTP API and liveness monitor.

#![cfg(feature = "http")]

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post as route_post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{fast_timings, FakeDriver};
use penpot_mcp_bridge::bridge::monitor::{self, MonitorTick};
use penpot_mcp_bridge::bridge::{
    http, Bridge, BridgeConfig, ConnectMode, NavigationStatus, WorkspaceFile,
};

fn bridge_with(driver: FakeDriver) -> (Arc<Bridge>, Arc<FakeDriver>) {
    // Nothing listens on port 9; Penpot calls fail fast.
    bridge_on(BridgeConfig::for_penpot("http://127.0.0.1:9"), driver)
}

fn bridge_on(config: BridgeConfig, driver: FakeDriver) -> (Arc<Bridge>, Arc<FakeDriver>) {
    let driver = Arc::new(driver);
    let bridge = Bridge::new(config, driver.clone())
        .unwrap()
        .with_connect_timings(fast_timings());
    (Arc::new(bridge), driver)
}

fn app(bridge: &Arc<Bridge>) -> Router {
    http::router(bridge.clone())
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn wait_for_status(bridge: &Bridge, wanted: NavigationStatus) {
    for _ in 0..200 {
        if bridge.state().status().await == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "status stayed {:?}, wanted {:?}",
        bridge.state().status().await,
        wanted
    );
}

async fn wait_for_idle(bridge: &Bridge) {
    for _ in 0..200 {
        if bridge.state().try_lock_ops().is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operations guard stayed held");
}

// ============================================================================
// Penpot RPC server
// ============================================================================

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    command: String,
    cookie: Option<String>,
    accept: Option<String>,
    query: Option<String>,
    body: String,
}

type Calls = Arc<Mutex<Vec<Seen>>>;

async fn rpc_command(
    State(calls): State<Calls>,
    method: Method,
    Path(command): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let header_of = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    calls.lock().unwrap().push(Seen {
        method,
        command: command.clone(),
        cookie: header_of(header::COOKIE),
        accept: header_of(header::ACCEPT),
        query,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    match command.as_str() {
        "get-teams" => Json(json!([
            {"id": "t-default", "name": "Default", "isDefault": true},
            {"id": "t-shared", "name": "Shared Workspace"}
        ]))
        .into_response(),
        "get-projects" => Json(json!([])).into_response(),
        "create-project" => Json(json!({"id": "p-new", "name": "MCP Workspace"})).into_response(),
        "get-project-files" => Json(json!([
            {"id": "f-lib", "name": "Tokens", "isShared": true},
            {"id": "f-draft", "name": "Draft"}
        ]))
        .into_response(),
        "update-file" => StatusCode::OK.into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(json!({"late": true})).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

async fn penpot_server() -> (String, Calls) {
    let calls: Calls = Arc::default();
    let app = Router::new()
        .route("/api/rpc/command/:command", route_post(rpc_command).get(rpc_command))
        .with_state(calls.clone());
    let addr = serve(app).await;
    (format!("http://{addr}"), calls)
}

/// A bridge whose REST calls go to a fresh Penpot RPC server.
async fn bridge_against_penpot(api_timeout_ms: u64) -> (Arc<Bridge>, Calls) {
    let (url, calls) = penpot_server().await;
    let mut config = BridgeConfig::for_penpot(url);
    config.timings.api_timeout_ms = api_timeout_ms;
    let (bridge, _) = bridge_on(config, FakeDriver::healthy());
    (bridge, calls)
}

// ============================================================================
// Status and Errors
// ============================================================================

#[tokio::test]
async fn test_status_reports_ready() {
    let (bridge, _) = bridge_with(FakeDriver::healthy());

    let response = app(&bridge).oneshot(get("/status")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ready");
    assert!(body["updatedAt"].is_string());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (bridge, _) = bridge_with(FakeDriver::healthy());

    let response = app(&bridge).oneshot(get("/nope")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await, json!({"error": "Not found"}));
}

#[tokio::test]
async fn test_preflight_is_no_content() {
    let (bridge, _) = bridge_with(FakeDriver::healthy());
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api-proxy")
        .header(header::ORIGIN, "http://localhost:4400")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .unwrap();

    let response = app(&bridge).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn test_simple_requests_carry_cors_origin() {
    let (bridge, _) = bridge_with(FakeDriver::healthy());
    let request = Request::builder()
        .uri("/status")
        .header(header::ORIGIN, "http://localhost:4400")
        .body(Body::empty())
        .unwrap();

    let response = app(&bridge).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

// ============================================================================
// API Proxy
// ============================================================================

#[tokio::test]
async fn test_api_proxy_rejects_invalid_json() {
    let (bridge, _) = bridge_with(FakeDriver::healthy());

    let response = app(&bridge)
        .oneshot(post("/api-proxy", "{oops"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "Invalid JSON body");
}

#[tokio::test]
async fn test_api_proxy_requires_command() {
    let (bridge, _) = bridge_with(FakeDriver::healthy());

    let response = app(&bridge)
        .oneshot(post("/api-proxy", r#"{"params": {"id": "1"}}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "command is required");
}

#[tokio::test]
async fn test_api_proxy_get_requires_command() {
    let (bridge, _) = bridge_with(FakeDriver::healthy());

    let response = app(&bridge)
        .oneshot(get("/api-proxy?team-id=1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "command query parameter is required"
    );
}

#[tokio::test]
async fn test_api_proxy_reports_unreachable_penpot() {
    let (bridge, _) = bridge_with(FakeDriver::healthy());

    let response = app(&bridge)
        .oneshot(post("/api-proxy", r#"{"command": "get-teams"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn test_api_proxy_post_forwards_browser_session() {
    let (bridge, calls) = bridge_against_penpot(5_000).await;

    let response = app(&bridge)
        .oneshot(post(
            "/api-proxy",
            r#"{"command": "get-teams", "params": {"profile": "me"}}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body[0]["id"], "t-default");
    assert_eq!(body[1]["name"], "Shared Workspace");

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let seen = &calls[0];
    assert_eq!(seen.method, Method::POST);
    assert_eq!(seen.command, "get-teams");
    assert_eq!(seen.cookie.as_deref(), Some("auth-token=fake"));
    assert!(seen.accept.as_deref().unwrap_or("").contains("application/json"));
    let sent: Value = serde_json::from_str(&seen.body).unwrap();
    assert_eq!(sent, json!({"profile": "me"}));
}

#[tokio::test]
async fn test_api_proxy_post_without_params_sends_empty_object() {
    let (bridge, calls) = bridge_against_penpot(5_000).await;

    let response = app(&bridge)
        .oneshot(post("/api-proxy", r#"{"command": "get-teams"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let sent: Value = serde_json::from_str(&calls.lock().unwrap()[0].body).unwrap();
    assert_eq!(sent, json!({}));
}

#[tokio::test]
async fn test_api_proxy_get_forwards_query() {
    let (bridge, calls) = bridge_against_penpot(5_000).await;

    let response = app(&bridge)
        .oneshot(get("/api-proxy?command=get-project-files&project-id=p1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await[1]["id"], "f-draft");

    let calls = calls.lock().unwrap();
    assert_eq!(calls[0].method, Method::GET);
    assert_eq!(calls[0].command, "get-project-files");
    assert_eq!(calls[0].query.as_deref(), Some("project-id=p1"));
    assert_eq!(calls[0].cookie.as_deref(), Some("auth-token=fake"));
}

#[tokio::test]
async fn test_api_proxy_empty_body_is_null() {
    let (bridge, _) = bridge_against_penpot(5_000).await;

    let response = app(&bridge)
        .oneshot(post("/api-proxy", r#"{"command": "update-file", "params": {"id": "f1"}}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, Value::Null);
}

#[tokio::test]
async fn test_api_proxy_penpot_error_status_is_bad_gateway() {
    let (bridge, _) = bridge_against_penpot(5_000).await;

    let response = app(&bridge)
        .oneshot(post("/api-proxy", r#"{"command": "no-such-command"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let error = json_body(response).await["error"].as_str().unwrap().to_string();
    assert!(error.contains("404"), "{error}");
}

#[tokio::test]
async fn test_api_proxy_slow_penpot_is_gateway_timeout() {
    let (bridge, _) = bridge_against_penpot(200).await;

    let response = app(&bridge)
        .oneshot(post("/api-proxy", r#"{"command": "slow"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn test_workspace_file_created_when_team_has_no_project() {
    let (bridge, calls) = bridge_against_penpot(5_000).await;

    let file = bridge
        .api()
        .ensure_workspace_file("Shared Workspace")
        .await
        .unwrap();

    assert_eq!(
        file,
        WorkspaceFile {
            project_id: "p-new".into(),
            file_id: "f-draft".into(),
        }
    );
    let calls = calls.lock().unwrap();
    let commands: Vec<&str> = calls.iter().map(|c| c.command.as_str()).collect();
    assert_eq!(
        commands,
        ["get-teams", "get-projects", "create-project", "get-project-files"]
    );
    assert_eq!(calls[1].query.as_deref(), Some("team-id=t-shared"));
    let created: Value = serde_json::from_str(&calls[2].body).unwrap();
    assert_eq!(created, json!({"teamId": "t-shared", "name": "MCP Workspace"}));
    assert_eq!(calls[3].query.as_deref(), Some("project-id=p-new"));
}

// ============================================================================
// Navigation
// ============================================================================

#[tokio::test]
async fn test_navigate_requires_ids() {
    let (bridge, _) = bridge_with(FakeDriver::healthy());

    let response = app(&bridge)
        .oneshot(post("/navigate", r#"{"projectId": "p1"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "projectId and fileId are required"
    );
    assert_eq!(bridge.state().status().await, NavigationStatus::Ready);
}

#[tokio::test]
async fn test_navigate_opens_file_and_reconnects() {
    let (bridge, driver) = bridge_with(FakeDriver::healthy());

    let response = app(&bridge)
        .oneshot(post("/navigate", r#"{"projectId": "p1", "fileId": "f1"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"status": "navigating", "projectId": "p1", "fileId": "f1"})
    );

    wait_for_status(&bridge, NavigationStatus::Ready).await;
    let state = driver.state.lock().unwrap();
    assert_eq!(
        state.visited.last().map(String::as_str),
        Some("http://127.0.0.1:9/#/workspace/p1/f1")
    );
    assert!(state.connected);
}

#[tokio::test]
async fn test_navigate_failure_sets_error() {
    let (bridge, _) = bridge_with(FakeDriver::with(|s| {
        s.navigation_fails = true;
    }));

    let response = app(&bridge)
        .oneshot(post("/navigate", r#"{"projectId": "p1", "fileId": "f1"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    wait_for_status(&bridge, NavigationStatus::Error).await;

    let status = app(&bridge).oneshot(get("/status")).await.unwrap();
    assert_eq!(json_body(status).await["status"], "error");
}

#[tokio::test]
async fn test_navigate_hang_times_out_to_error() {
    let mut config = BridgeConfig::for_penpot("http://127.0.0.1:9");
    config.timings.nav_timeout_ms = 20;
    config.timings.plugin_action_timeout_ms = 20;
    let (bridge, driver) = bridge_on(
        config,
        FakeDriver::with(|s| {
            s.navigation_hangs = true;
        }),
    );

    let response = app(&bridge)
        .oneshot(post("/navigate", r#"{"projectId": "p1", "fileId": "f1"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    wait_for_status(&bridge, NavigationStatus::Error).await;
    assert_eq!(driver.state.lock().unwrap().visited.len(), 1);
    wait_for_idle(&bridge).await;
}

// ============================================================================
// Monitor
// ============================================================================

#[tokio::test]
async fn test_monitor_healthy_plugin() {
    let (bridge, _) = bridge_with(FakeDriver::healthy());
    bridge.connect_plugin(ConnectMode::Initial).await.unwrap();

    assert_eq!(monitor::tick(&bridge).await, MonitorTick::Healthy);
}

#[tokio::test]
async fn test_monitor_reconnects_then_cools_down() {
    let (bridge, driver) = bridge_with(FakeDriver::healthy());
    bridge.connect_plugin(ConnectMode::Initial).await.unwrap();
    driver.disconnect_plugin();

    assert_eq!(monitor::tick(&bridge).await, MonitorTick::Reconnected);
    assert!(driver.state.lock().unwrap().connected);
    assert_eq!(bridge.state().status().await, NavigationStatus::Ready);

    driver.disconnect_plugin();
    assert_eq!(monitor::tick(&bridge).await, MonitorTick::Skipped);
}

#[tokio::test]
async fn test_monitor_failed_reconnect_returns_to_ready() {
    let (bridge, driver) = bridge_with(FakeDriver::healthy());
    bridge.connect_plugin(ConnectMode::Initial).await.unwrap();
    driver.disconnect_plugin();
    driver.state.lock().unwrap().connect_button = false;

    assert_eq!(monitor::tick(&bridge).await, MonitorTick::ReconnectFailed);
    assert_eq!(bridge.state().status().await, NavigationStatus::Ready);
}

#[tokio::test]
async fn test_monitor_skips_while_busy() {
    let (bridge, driver) = bridge_with(FakeDriver::healthy());
    driver.disconnect_plugin();

    let ops = bridge.state().lock_ops().await;
    assert_eq!(monitor::tick(&bridge).await, MonitorTick::Skipped);

    drop(ops);
    bridge.state().set_status(NavigationStatus::Navigating).await;
    assert_eq!(monitor::tick(&bridge).await, MonitorTick::Skipped);
}

#[tokio::test]
async fn test_monitor_recovers_after_failed_navigation() {
    let (bridge, driver) = bridge_with(FakeDriver::healthy());
    bridge.connect_plugin(ConnectMode::Initial).await.unwrap();
    driver.state.lock().unwrap().navigation_fails = true;

    app(&bridge)
        .oneshot(post("/navigate", r#"{"projectId": "p1", "fileId": "f1"}"#))
        .await
        .unwrap();
    wait_for_status(&bridge, NavigationStatus::Error).await;
    wait_for_idle(&bridge).await;
    assert!(!driver.state.lock().unwrap().connected);
    driver.state.lock().unwrap().navigation_fails = false;

    assert_eq!(monitor::tick(&bridge).await, MonitorTick::Reconnected);
    assert_eq!(bridge.state().status().await, NavigationStatus::Ready);
    assert!(driver.state.lock().unwrap().connected);
}

#[tokio::test]
async fn test_monitor_clears_error_when_plugin_connected() {
    let (bridge, _) = bridge_with(FakeDriver::healthy());
    bridge.connect_plugin(ConnectMode::Initial).await.unwrap();
    bridge.state().set_status(NavigationStatus::Error).await;

    assert_eq!(monitor::tick(&bridge).await, MonitorTick::Healthy);
    assert_eq!(bridge.state().status().await, NavigationStatus::Ready);
}
