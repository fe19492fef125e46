/// 节点管理接口

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::services::node_service::NodeService;

use super::ApiError;

/// 节点查询参数
#[derive(Debug, Deserialize)]
pub struct ListNodesQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub status: Option<String>,
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
        .route("/", get(list_nodes))
        .route("/:node_id", get(get_node))
}

/// 获取节点列表
async fn list_nodes(
    State(state): State<AppState>,
    Query(query): Query<ListNodesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = NodeService::new(state);
    let response = service
        .list_nodes(query.page, query.page_size, query.status)
        .await?;
    Ok(Json(response))
}

/// 获取单个节点
async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = NodeService::new(state);
    let node = service.get_node(&node_id).await?;
    Ok(Json(node))
}
