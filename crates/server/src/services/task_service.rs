/// 任务管理服务

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set};
use tracing::info;

use crate::db::models::task::{
    TaskResponse, TaskStatus, TaskType,
    Entity as TaskEntity, Column as TaskColumn, ActiveModel as TaskActiveModel,
};
use crate::app_state::AppState;

pub struct TaskService {
    state: AppState,
}

impl TaskService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 创建任务（引擎随即接手执行）
    pub async fn create_task(
        &self,
        task_type: TaskType,
        target_type: Option<String>,
        target_id: Option<String>,
        node_id: Option<String>,
        payload: serde_json::Value,
    ) -> anyhow::Result<TaskResponse> {
        let db = &self.state.sea_db();
        let now = Utc::now();

        let task_active = TaskActiveModel {
            id: Set(common::utils::generate_id()),
            task_type: Set(task_type.as_str().to_string()),
            status: Set(TaskStatus::Running.as_str().to_string()),
            progress: Set(0),
            payload: Set(payload),
            result: Set(None),
            error_message: Set(None),
            target_type: Set(target_type),
            target_id: Set(target_id),
            node_id: Set(node_id),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            started_at: Set(Some(now.into())),
            completed_at: Set(None),
        };

        let task = task_active.insert(db).await?;
        info!("任务已创建: id={}, type={}", task.id, task.task_type);
        Ok(TaskResponse::from(task))
    }

    /// 更新任务状态
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        progress: Option<i32>,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> anyhow::Result<()> {
        let db = &self.state.sea_db();

        let task = TaskEntity::find_by_id(task_id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("任务不存在: {}", task_id))?;

        let mut task_active: TaskActiveModel = task.into();
        task_active.status = Set(status.as_str().to_string());
        task_active.updated_at = Set(Utc::now().into());

        if let Some(progress) = progress {
            task_active.progress = Set(progress);
        }

        if let Some(result) = result {
            task_active.result = Set(Some(result));
        }

        if let Some(error_message) = error_message {
            task_active.error_message = Set(Some(error_message));
        }

        // 设置完成时间
        if matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
            task_active.completed_at = Set(Some(Utc::now().into()));
        }

        task_active.update(db).await?;

        info!("任务状态已更新: task_id={}, status={}", task_id, status.as_str());
        Ok(())
    }

    /// 获取单个任务
    pub async fn get_task(&self, task_id: &str) -> anyhow::Result<TaskResponse> {
        let db = &self.state.sea_db();

        let task = TaskEntity::find_by_id(task_id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("任务不存在: {}", task_id))?;

        Ok(TaskResponse::from(task))
    }

    /// 获取任务列表
    pub async fn list_tasks(
        &self,
        page: usize,
        page_size: usize,
        status: Option<String>,
        target_id: Option<String>,
    ) -> anyhow::Result<Vec<TaskResponse>> {
        let db = &self.state.sea_db();

        let mut query = TaskEntity::find();

        if let Some(s) = status {
            query = query.filter(TaskColumn::Status.eq(s));
        }

        if let Some(t) = target_id {
            query = query.filter(TaskColumn::TargetId.eq(t));
        }

        let tasks = query
            .order_by_desc(TaskColumn::CreatedAt)
            .offset(((page - 1) * page_size) as u64)
            .limit(page_size as u64)
            .all(db)
            .await?;

        Ok(tasks.into_iter().map(TaskResponse::from).collect())
    }
}
