pub mod nodes;
pub mod snapshots;
pub mod storage;
pub mod tasks;
pub mod templates;
pub mod vms;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;

use crate::app_state::AppState;

/// 所有 API 路由（统一入口）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/nodes", nodes::routes())
        .nest("/storage", storage::routes())
        .nest("/snapshots", snapshots::routes())
        .nest("/templates", templates::routes())
        .nest("/vms", vms::routes())
        .nest("/tasks", tasks::routes())
}

/// API 错误响应
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let message = err.to_string();
        if message.contains("不存在") {
            ApiError::NotFound(message)
        } else {
            ApiError::Internal(message)
        }
    }
}
