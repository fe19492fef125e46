/// 任务查询接口

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::services::task_service::TaskService;

use super::ApiError;

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub status: Option<String>,
    pub target_id: Option<String>,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

/// 创建路由
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks))
        .route("/:task_id", get(get_task))
}

/// 获取任务列表
async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = TaskService::new(state);
    let tasks = service
        .list_tasks(query.page, query.page_size, query.status, query.target_id)
        .await?;
    Ok(Json(tasks))
}

/// 获取单个任务
async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = TaskService::new(state);
    let task = service.get_task(&task_id).await?;
    Ok(Json(task))
}
