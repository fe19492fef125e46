/// 模板管理接口

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::db::models::template::CreateTemplateDto;
use crate::services::template_service::TemplateService;

use super::ApiError;

/// 模板查询参数
#[derive(Debug, Deserialize)]
pub struct ListTemplatesQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub pool_id: Option<String>,
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
        .route("/", post(create_template))
        .route("/", get(list_templates))
        .route("/:template_id", get(get_template))
}

/// 登记模板或从快照出模板
///
/// 带 snapshot_id 时返回任务，数据由迁移引擎异步填充
async fn create_template(
    State(state): State<AppState>,
    Json(dto): Json<CreateTemplateDto>,
) -> Result<impl IntoResponse, ApiError> {
    let service = TemplateService::new(state);

    if dto.snapshot_id.is_some() {
        let (template, task) = service.create_template_from_snapshot(dto).await?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "template": template, "task": task })),
        ));
    }

    let template = service.create_template(dto).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "template": template })),
    ))
}

/// 获取模板列表
async fn list_templates(
    State(state): State<AppState>,
    Query(query): Query<ListTemplatesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = TemplateService::new(state);
    let response = service
        .list_templates(query.page, query.page_size, query.pool_id)
        .await?;
    Ok(Json(response))
}

/// 获取单个模板
async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = TemplateService::new(state);
    let template = service.get_template(&template_id).await?;
    Ok(Json(template))
}
