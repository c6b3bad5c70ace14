//! Local HTTP API for code running inside the plugin.
//!
//! | Route              | Purpose                                          |
//! |--------------------|--------------------------------------------------|
//! | `GET /status`      | Current [`NavigationStatus`] and its timestamp   |
//! | `POST /api-proxy`  | `{command, params}` → POST Penpot RPC command    |
//! | `GET /api-proxy`   | `?command=..&k=v` → GET Penpot RPC command       |
//! | `POST /navigate`   | `{projectId, fileId}` → open file, reconnect     |

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::api::WorkspaceFile;
use super::state::NavigationStatus;
use super::Bridge;
use crate::error::Error;

/// Handler failures, each with its status code.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - Malformed request.
    BadRequest(&'static str),
    /// 404 - Unknown route.
    NotFound,
    /// 502 or 504 - The Penpot call failed.
    Upstream(Error),
}

impl ApiError {
    /// Status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Upstream(Error::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(message) => (*message).to_string(),
            ApiError::NotFound => "Not found".to_string(),
            ApiError::Upstream(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.message() }))).into_response()
    }
}

#[derive(Deserialize)]
struct ApiProxyRequest {
    command: Option<String>,
    #[serde(default)]
    params: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigateRequest {
    project_id: Option<String>,
    file_id: Option<String>,
}

/// Build the router.
pub fn router(bridge: Arc<Bridge>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/status", get(status))
        .route("/api-proxy", post(api_proxy_post).get(api_proxy_get))
        .route("/navigate", post(navigate))
        .fallback(not_found)
        .with_state(bridge)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::map_response(preflight_no_content))
                .layer(cors),
        )
}

/// Preflight answers carry `Access-Control-Allow-Methods`; send them as 204.
async fn preflight_no_content(mut response: Response) -> Response {
    if response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS)
    {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

async fn status(State(bridge): State<Arc<Bridge>>) -> impl IntoResponse {
    Json(bridge.state().snapshot().await)
}

async fn api_proxy_post(
    State(bridge): State<Arc<Bridge>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: ApiProxyRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest("Invalid JSON body"))?;
    let command = request
        .command
        .filter(|c| !c.is_empty())
        .ok_or(ApiError::BadRequest("command is required"))?;
    let params = if request.params.is_null() {
        json!({})
    } else {
        request.params
    };

    bridge
        .api()
        .post_command(&command, &params)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(%command, "api-proxy failed: {}", e);
            ApiError::Upstream(e)
        })
}

async fn api_proxy_get(
    State(bridge): State<Arc<Bridge>>,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let command = query
        .iter()
        .find(|(k, v)| k == "command" && !v.is_empty())
        .map(|(_, v)| v.clone())
        .ok_or(ApiError::BadRequest("command query parameter is required"))?;
    let params: Vec<(String, String)> = query.into_iter().filter(|(k, _)| k != "command").collect();

    bridge
        .api()
        .get_command(&command, &params)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(%command, "api-proxy GET failed: {}", e);
            ApiError::Upstream(e)
        })
}

async fn navigate(
    State(bridge): State<Arc<Bridge>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: NavigateRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest("Invalid JSON body"))?;
    let (Some(project_id), Some(file_id)) = (
        request.project_id.filter(|id| !id.is_empty()),
        request.file_id.filter(|id| !id.is_empty()),
    ) else {
        return Err(ApiError::BadRequest("projectId and fileId are required"));
    };

    bridge.state().set_status(NavigationStatus::Navigating).await;
    tracing::info!(project = %project_id, file = %file_id, "Navigation requested");

    let file = WorkspaceFile {
        project_id: project_id.clone(),
        file_id: file_id.clone(),
    };
    let budget = bridge.config().timings.navigation_budget();
    let task = bridge.clone();
    tokio::spawn(async move {
        let _ops = task.state().lock_ops().await;
        task.state().set_status(NavigationStatus::Navigating).await;
        // Failures inside `navigate` already set the error status.
        if tokio::time::timeout(budget, task.navigate(&file)).await.is_err() {
            tracing::warn!(ms = budget.as_millis() as u64, "Navigation timed out");
            task.state().set_status(NavigationStatus::Error).await;
        }
    });

    Ok(Json(json!({
        "status": "navigating",
        "projectId": project_id,
        "fileId": file_id,
    })))
}
