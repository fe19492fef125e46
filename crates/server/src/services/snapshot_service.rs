/// 快照管理服务

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set};

use common::models::DataObjectKind;

use crate::db::models::snapshot::{
    CreateSnapshotDto, SnapshotListResponse, SnapshotResponse,
    Entity as SnapshotEntity, Column as SnapshotColumn, ActiveModel as SnapshotActiveModel,
};
use crate::db::models::storage_pool::Entity as StoragePoolEntity;
use crate::db::models::task::{TaskResponse, TaskType};
use crate::db::models::volume::Entity as VolumeEntity;
use crate::app_state::AppState;
use crate::motion::lifecycle::ObjectState;
use crate::motion::{CopyOutcome, DataMotionService};
use crate::services::storage_service::finish_task;
use crate::services::task_service::TaskService;

pub struct SnapshotService {
    state: AppState,
}

impl SnapshotService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 创建快照记录
    ///
    /// 快照沿 parent_snapshot_id 成链：新快照以该卷最近一个快照为父
    pub async fn create_snapshot(&self, dto: CreateSnapshotDto) -> anyhow::Result<SnapshotResponse> {
        let db = &self.state.sea_db();

        let volume = VolumeEntity::find_by_id(&dto.volume_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("存储卷不存在"))?;

        let parent = SnapshotEntity::find()
            .filter(SnapshotColumn::VolumeId.eq(&dto.volume_id))
            .filter(SnapshotColumn::RemovedAt.is_null())
            .order_by_desc(SnapshotColumn::CreatedAt)
            .one(db)
            .await?;

        let now = Utc::now();
        let snapshot_active = SnapshotActiveModel {
            id: Set(common::utils::generate_id()),
            uuid: Set(common::utils::generate_id()),
            name: Set(dto.name),
            volume_id: Set(volume.id.clone()),
            parent_snapshot_id: Set(parent.map(|p| p.id)),
            pool_id: Set(volume.pool_id.clone()),
            path: Set(None),
            state: Set(ObjectState::Allocated.as_str().to_string()),
            size_gb: Set(Some(volume.size_gb)),
            removed_at: Set(None),
            metadata: Set(dto.metadata),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let snapshot = snapshot_active.insert(db).await?;
        Ok(SnapshotResponse::from(snapshot))
    }

    /// 获取快照列表
    pub async fn list_snapshots(
        &self,
        page: usize,
        page_size: usize,
        volume_id: Option<String>,
    ) -> anyhow::Result<SnapshotListResponse> {
        let db = &self.state.sea_db();

        let mut query = SnapshotEntity::find().filter(SnapshotColumn::RemovedAt.is_null());

        if let Some(vid) = volume_id {
            query = query.filter(SnapshotColumn::VolumeId.eq(vid));
        }

        let total = query.clone().count(db).await? as usize;

        let snapshots = query
            .order_by_desc(SnapshotColumn::CreatedAt)
            .offset(((page - 1) * page_size) as u64)
            .limit(page_size as u64)
            .all(db)
            .await?;

        Ok(SnapshotListResponse {
            snapshots: snapshots.into_iter().map(SnapshotResponse::from).collect(),
            total,
            page,
            page_size,
        })
    }

    /// 获取单个快照
    pub async fn get_snapshot(&self, snapshot_id: &str) -> anyhow::Result<SnapshotResponse> {
        let db = &self.state.sea_db();

        let snapshot = SnapshotEntity::find_by_id(snapshot_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("快照不存在"))?;

        Ok(SnapshotResponse::from(snapshot))
    }

    /// 备份快照到二级存储（异步任务）
    ///
    /// 在目标存储上建快照记录，数据搬运交给迁移引擎；
    /// 全量/增量由引擎按快照链与明细标记判定
    pub async fn backup_snapshot(
        &self,
        snapshot_id: &str,
        dest_pool_id: Option<String>,
    ) -> anyhow::Result<TaskResponse> {
        let db = &self.state.sea_db();

        let snapshot = SnapshotEntity::find_by_id(snapshot_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("快照不存在"))?;

        if ObjectState::from(snapshot.state.as_str()) != ObjectState::Ready {
            return Err(anyhow::anyhow!("快照状态不允许备份: {}", snapshot.state));
        }

        // 目标：指定的二级存储，或第一个可用的二级存储
        let dest_pool = match dest_pool_id {
            Some(id) => StoragePoolEntity::find_by_id(&id)
                .one(db)
                .await?
                .ok_or_else(|| anyhow::anyhow!("目标存储池不存在"))?,
            None => {
                StoragePoolEntity::find()
                    .filter(crate::db::models::storage_pool::Column::Role.eq("image"))
                    .filter(crate::db::models::storage_pool::Column::Status.eq("active"))
                    .one(db)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("没有可用的二级存储"))?
            }
        };

        // 目标存储上的快照记录
        let now = Utc::now();
        let dest_active = SnapshotActiveModel {
            id: Set(common::utils::generate_id()),
            uuid: Set(common::utils::generate_id()),
            name: Set(snapshot.name.clone()),
            volume_id: Set(snapshot.volume_id.clone()),
            parent_snapshot_id: Set(snapshot.parent_snapshot_id.clone()),
            pool_id: Set(dest_pool.id.clone()),
            path: Set(None),
            state: Set(ObjectState::Allocated.as_str().to_string()),
            size_gb: Set(snapshot.size_gb),
            removed_at: Set(None),
            metadata: Set(snapshot.metadata.clone()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        let dest_snapshot = dest_active.insert(db).await?;

        let task_service = TaskService::new(self.state.clone());
        let task = task_service
            .create_task(
                TaskType::CopyObject,
                Some("snapshot".to_string()),
                Some(dest_snapshot.id.clone()),
                None,
                serde_json::json!({ "src_snapshot_id": snapshot_id }),
            )
            .await?;

        let state = self.state.clone();
        let task_id = task.id.clone();
        let src_id = snapshot_id.to_string();
        let dest_id = dest_snapshot.id.clone();
        tokio::spawn(async move {
            let motion = DataMotionService::from_state(&state);
            let outcome = async {
                let src = match motion.load_entry(DataObjectKind::Snapshot, &src_id).await {
                    Ok(e) => e,
                    Err(e) => return CopyOutcome::failed(e.to_string()),
                };
                let dest = match motion.load_entry(DataObjectKind::Snapshot, &dest_id).await {
                    Ok(e) => e,
                    Err(e) => return CopyOutcome::failed(e.to_string()),
                };
                motion.copy(&src, &dest, None).await
            }
            .await;

            finish_task(&state, &task_id, outcome).await;
        });

        Ok(task)
    }
}
