/// 模板管理服务

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set};

use common::models::DataObjectKind;

use crate::db::models::snapshot::Entity as SnapshotEntity;
use crate::db::models::storage_pool::Entity as StoragePoolEntity;
use crate::db::models::template::{
    CreateTemplateDto, TemplateListResponse, TemplateResponse,
    Entity as TemplateEntity, Column as TemplateColumn, ActiveModel as TemplateActiveModel,
};
use crate::app_state::AppState;
use crate::motion::lifecycle::ObjectState;
use crate::motion::{CopyOutcome, DataMotionService};
use crate::services::storage_service::finish_task;
use crate::services::task_service::TaskService;
use crate::db::models::task::{TaskResponse, TaskType};

pub struct TemplateService {
    state: AppState,
}

impl TemplateService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 登记模板
    ///
    /// 给定 path 时镜像已在二级存储上就位，记录直接就绪；
    /// 否则建 allocated 记录，等待快照出模板等流程填充数据
    pub async fn create_template(&self, dto: CreateTemplateDto) -> anyhow::Result<TemplateResponse> {
        let db = &self.state.sea_db();

        let pool = StoragePoolEntity::find_by_id(&dto.pool_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("存储池不存在"))?;
        if pool.role != "image" {
            return Err(anyhow::anyhow!("模板只能登记到二级存储"));
        }

        let state = if dto.path.is_some() {
            ObjectState::Ready
        } else {
            ObjectState::Allocated
        };

        let now = Utc::now();
        let template_active = TemplateActiveModel {
            id: Set(common::utils::generate_id()),
            uuid: Set(common::utils::generate_id()),
            name: Set(dto.name),
            format: Set(dto.format),
            size_gb: Set(dto.size_gb),
            hypervisor_type: Set(dto.hypervisor_type),
            pool_id: Set(pool.id),
            path: Set(dto.path),
            state: Set(state.as_str().to_string()),
            removed_at: Set(None),
            metadata: Set(dto.metadata),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let template = template_active.insert(db).await?;
        Ok(TemplateResponse::from(template))
    }

    /// 从快照出模板（异步任务）
    pub async fn create_template_from_snapshot(
        &self,
        dto: CreateTemplateDto,
    ) -> anyhow::Result<(TemplateResponse, TaskResponse)> {
        let db = &self.state.sea_db();

        let snapshot_id = dto
            .snapshot_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("缺少来源快照"))?;
        let snapshot = SnapshotEntity::find_by_id(&snapshot_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("快照不存在"))?;
        if ObjectState::from(snapshot.state.as_str()) != ObjectState::Ready {
            return Err(anyhow::anyhow!("快照状态不允许出模板: {}", snapshot.state));
        }

        let template = self
            .create_template(CreateTemplateDto {
                path: None,
                snapshot_id: None,
                ..dto
            })
            .await?;

        let task_service = TaskService::new(self.state.clone());
        let task = task_service
            .create_task(
                TaskType::CopyObject,
                Some("template".to_string()),
                Some(template.id.clone()),
                None,
                serde_json::json!({ "src_snapshot_id": snapshot_id }),
            )
            .await?;

        let state = self.state.clone();
        let task_id = task.id.clone();
        let template_id = template.id.clone();
        tokio::spawn(async move {
            let motion = DataMotionService::from_state(&state);
            let outcome = async {
                let src = match motion.load_entry(DataObjectKind::Snapshot, &snapshot_id).await {
                    Ok(e) => e,
                    Err(e) => return CopyOutcome::failed(e.to_string()),
                };
                let dest = match motion.load_entry(DataObjectKind::Template, &template_id).await {
                    Ok(e) => e,
                    Err(e) => return CopyOutcome::failed(e.to_string()),
                };
                motion.copy(&src, &dest, None).await
            }
            .await;

            finish_task(&state, &task_id, outcome).await;
        });

        Ok((template, task))
    }

    /// 获取模板列表
    pub async fn list_templates(
        &self,
        page: usize,
        page_size: usize,
        pool_id: Option<String>,
    ) -> anyhow::Result<TemplateListResponse> {
        let db = &self.state.sea_db();

        let mut query = TemplateEntity::find().filter(TemplateColumn::RemovedAt.is_null());

        if let Some(pid) = pool_id {
            query = query.filter(TemplateColumn::PoolId.eq(pid));
        }

        let total = query.clone().count(db).await? as usize;

        let templates = query
            .order_by_desc(TemplateColumn::CreatedAt)
            .offset(((page - 1) * page_size) as u64)
            .limit(page_size as u64)
            .all(db)
            .await?;

        Ok(TemplateListResponse {
            templates: templates.into_iter().map(TemplateResponse::from).collect(),
            total,
            page,
            page_size,
        })
    }

    /// 获取单个模板
    pub async fn get_template(&self, template_id: &str) -> anyhow::Result<TemplateResponse> {
        let db = &self.state.sea_db();

        let template = TemplateEntity::find_by_id(template_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("模板不存在"))?;

        Ok(TemplateResponse::from(template))
    }
}
