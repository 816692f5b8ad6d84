//! Control-plane HTTP handlers under `/api/workspaces`.
//!
//! Every response uses the `{ret, msg, data}` envelope; failures map the
//! error kind onto the HTTP status.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use codepass_common::{
    ApiResponse, CreatedWorkspace, CreationLog, WorkspaceInfo, WorkspaceList,
    WorkspaceStateView,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::application::{CreateRequest, WorkspaceManager};
use crate::domain::ResourceSpec;
use crate::server::auth::{BearerToken, require_bearer};
use crate::server::error::ApiResult;

#[derive(Debug, Default, Deserialize)]
pub struct CreateQuery {
    #[serde(default)]
    pub name: String,
    pub pass: Option<String>,
    #[serde(default)]
    pub cpus: String,
    #[serde(default)]
    pub disk: String,
    #[serde(default)]
    pub memory: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NameQuery {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub name: String,
    /// Kept as text so a malformed value falls back to the default tail.
    pub tail: Option<String>,
}

/// Control-plane router. Everything except `/health` sits behind the bearer
/// gate when `api_token` is set.
pub fn router(manager: WorkspaceManager, api_token: Option<String>) -> Router {
    let mut api = Router::new()
        .route("/api/workspaces/create", post(create))
        .route("/api/workspaces/log", get(creation_log))
        .route("/api/workspaces/list", get(list))
        .route("/api/workspaces/info", get(info))
        .route("/api/workspaces/state", get(state))
        .route("/api/workspaces/delete", post(delete))
        .with_state(manager);
    if let Some(token) = api_token {
        api = api.route_layer(middleware::from_fn_with_state(
            BearerToken::new(token),
            require_bearer,
        ));
    }

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn create(
    State(manager): State<WorkspaceManager>,
    Query(q): Query<CreateQuery>,
) -> ApiResult<Json<ApiResponse<CreatedWorkspace>>> {
    let created = manager
        .create(CreateRequest {
            name: q.name,
            password: q.pass,
            resources: ResourceSpec {
                cpus: q.cpus,
                disk: q.disk,
                memory: q.memory,
            },
        })
        .await?;
    Ok(Json(ApiResponse::ok("workspace creation started", created)))
}

async fn creation_log(
    State(manager): State<WorkspaceManager>,
    Query(q): Query<LogQuery>,
) -> ApiResult<Json<ApiResponse<CreationLog>>> {
    let tail = q.tail.and_then(|t| t.trim().parse::<i64>().ok());
    let log = manager.creation_log(&q.name, tail).await?;
    Ok(Json(ApiResponse::ok("ok", log)))
}

async fn list(State(manager): State<WorkspaceManager>) -> ApiResult<Json<ApiResponse<WorkspaceList>>> {
    Ok(Json(match manager.list().await? {
        Some(list) => ApiResponse::ok("ok", WorkspaceList { list }),
        None => ApiResponse::fail("no workspaces"),
    }))
}

async fn info(
    State(manager): State<WorkspaceManager>,
    Query(q): Query<NameQuery>,
) -> ApiResult<Json<ApiResponse<WorkspaceInfo>>> {
    let info = manager.info(&q.name).await?;
    Ok(Json(ApiResponse::ok("ok", info)))
}

async fn state(
    State(manager): State<WorkspaceManager>,
    Query(q): Query<NameQuery>,
) -> ApiResult<Json<ApiResponse<WorkspaceStateView>>> {
    let state = manager.state(&q.name).await?;
    Ok(Json(ApiResponse::ok(
        "ok",
        WorkspaceStateView {
            name: q.name,
            state,
        },
    )))
}

async fn delete(
    State(manager): State<WorkspaceManager>,
    Query(q): Query<NameQuery>,
) -> ApiResult<Json<ApiResponse>> {
    let outcome = manager.delete(&q.name).await?;
    let msg = match &outcome.directory_error {
        None => "workspace deleted".to_string(),
        Some(e) => format!("workspace deleted; directory not removed: {e}"),
    };
    Ok(Json(ApiResponse::ok(
        msg,
        json!({ "instance_purged": outcome.instance_purged }),
    )))
}
