/// 虚拟机管理接口

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::db::models::vm::MigrateVmStorageDto;
use crate::services::vm_service::VmService;

use super::ApiError;

/// 虚拟机查询参数
#[derive(Debug, Deserialize)]
pub struct ListVmsQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub node_id: Option<String>,
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
        .route("/", get(list_vms))
        .route("/:vm_id", get(get_vm))
        .route("/:vm_id/migrate-storage", post(migrate_vm_storage))
}

/// 获取虚拟机列表
async fn list_vms(
    State(state): State<AppState>,
    Query(query): Query<ListVmsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = VmService::new(state);
    let response = service
        .list_vms(query.page, query.page_size, query.node_id)
        .await?;
    Ok(Json(response))
}

/// 获取单个虚拟机
async fn get_vm(
    State(state): State<AppState>,
    Path(vm_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = VmService::new(state);
    let vm = service.get_vm(&vm_id).await?;
    Ok(Json(vm))
}

/// 整机在线存储迁移（返回任务）
async fn migrate_vm_storage(
    State(state): State<AppState>,
    Path(vm_id): Path<String>,
    Json(dto): Json<MigrateVmStorageDto>,
) -> Result<impl IntoResponse, ApiError> {
    let service = VmService::new(state);
    let task = service.migrate_vm_storage(&vm_id, dto).await
        .map_err(|err| {
            if err.to_string().contains("源节点和目标节点相同") {
                ApiError::BadRequest(err.to_string())
            } else {
                ApiError::from(err)
            }
        })?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}
