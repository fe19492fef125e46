/// 快照管理接口

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::db::models::snapshot::CreateSnapshotDto;
use crate::services::snapshot_service::SnapshotService;

use super::ApiError;

/// 快照查询参数
#[derive(Debug, Deserialize)]
pub struct ListSnapshotsQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub volume_id: Option<String>,
}

/// 备份快照请求
#[derive(Debug, Deserialize)]
pub struct BackupSnapshotRequest {
    pub dest_pool_id: Option<String>,
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
        .route("/", post(create_snapshot))
        .route("/", get(list_snapshots))
        .route("/:snapshot_id", get(get_snapshot))
        .route("/:snapshot_id/backup", post(backup_snapshot))
}

/// 创建快照
async fn create_snapshot(
    State(state): State<AppState>,
    Json(dto): Json<CreateSnapshotDto>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SnapshotService::new(state);
    let snapshot = service.create_snapshot(dto).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// 获取快照列表
async fn list_snapshots(
    State(state): State<AppState>,
    Query(query): Query<ListSnapshotsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SnapshotService::new(state);
    let response = service
        .list_snapshots(query.page, query.page_size, query.volume_id)
        .await?;
    Ok(Json(response))
}

/// 获取单个快照
async fn get_snapshot(
    State(state): State<AppState>,
    Path(snapshot_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SnapshotService::new(state);
    let snapshot = service.get_snapshot(&snapshot_id).await?;
    Ok(Json(snapshot))
}

/// 备份快照到二级存储（返回任务）
async fn backup_snapshot(
    State(state): State<AppState>,
    Path(snapshot_id): Path<String>,
    Json(req): Json<BackupSnapshotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SnapshotService::new(state);
    let task = service.backup_snapshot(&snapshot_id, req.dest_pool_id).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}
