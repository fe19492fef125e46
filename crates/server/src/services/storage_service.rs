/// 存储管理服务

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set};
use tracing::{error, info};

use common::models::DataObjectKind;

use crate::db::models::storage_pool::{
    CreateStoragePoolDto, StoragePoolListResponse, StoragePoolResponse,
    Entity as StoragePoolEntity, Column as StoragePoolColumn, ActiveModel as StoragePoolActiveModel,
};
use crate::db::models::volume::{
    CopyVolumeDto, CreateVolumeDto, MigrateVolumeDto, VolumeListResponse, VolumeResponse,
    Entity as VolumeEntity, Column as VolumeColumn, ActiveModel as VolumeActiveModel,
};
use crate::db::models::task::{TaskResponse, TaskStatus, TaskType};
use crate::app_state::AppState;
use crate::motion::catalog::{MotionCatalog, ObjectChanges};
use crate::motion::driver::StoreDriver;
use crate::motion::lifecycle::{ObjectEvent, ObjectState};
use crate::motion::object::{DataEntry, DataObject, DataStore, ObjectRef};
use crate::motion::{CopyOutcome, DataMotionService};
use crate::services::task_service::TaskService;

pub struct StorageService {
    state: AppState,
}

impl StorageService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    // ==================== 存储池 ====================

    /// 创建存储池
    pub async fn create_storage_pool(&self, dto: CreateStoragePoolDto) -> anyhow::Result<StoragePoolResponse> {
        let pool_id = common::utils::generate_id();
        let now = Utc::now();

        let pool_active = StoragePoolActiveModel {
            id: Set(pool_id),
            name: Set(dto.name),
            pool_type: Set(dto.pool_type),
            role: Set(dto.role),
            scope: Set(dto.scope),
            scope_id: Set(dto.scope_id),
            managed: Set(dto.managed),
            status: Set("active".to_string()),
            path: Set(dto.path),
            capabilities: Set(dto.capabilities.unwrap_or_else(|| serde_json::json!({}))),
            capacity_gb: Set(dto.capacity_gb),
            allocated_gb: Set(Some(0)),
            available_gb: Set(dto.capacity_gb),
            node_id: Set(dto.node_id),
            metadata: Set(dto.metadata),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let pool = pool_active.insert(&self.state.sea_db()).await?;
        Ok(StoragePoolResponse::from(pool))
    }

    /// 获取存储池列表
    pub async fn list_storage_pools(
        &self,
        page: usize,
        page_size: usize,
        pool_type: Option<String>,
        role: Option<String>,
    ) -> anyhow::Result<StoragePoolListResponse> {
        let db = &self.state.sea_db();

        let mut query = StoragePoolEntity::find();

        if let Some(pt) = pool_type {
            query = query.filter(StoragePoolColumn::PoolType.eq(pt));
        }

        if let Some(r) = role {
            query = query.filter(StoragePoolColumn::Role.eq(r));
        }

        let total = query.clone().count(db).await? as usize;

        let pools = query
            .order_by_desc(StoragePoolColumn::CreatedAt)
            .offset(((page - 1) * page_size) as u64)
            .limit(page_size as u64)
            .all(db)
            .await?;

        let pool_responses: Vec<StoragePoolResponse> = pools.into_iter().map(StoragePoolResponse::from).collect();

        Ok(StoragePoolListResponse {
            pools: pool_responses,
            total,
            page,
            page_size,
        })
    }

    /// 获取单个存储池
    pub async fn get_storage_pool(&self, pool_id: &str) -> anyhow::Result<StoragePoolResponse> {
        let db = &self.state.sea_db();

        let pool = StoragePoolEntity::find_by_id(pool_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("存储池不存在"))?;

        Ok(StoragePoolResponse::from(pool))
    }

    /// 删除存储池
    pub async fn delete_storage_pool(&self, pool_id: &str) -> anyhow::Result<()> {
        let db = &self.state.sea_db();

        // 检查是否有存储卷在使用此存储池
        let volume_count = VolumeEntity::find()
            .filter(VolumeColumn::PoolId.eq(pool_id))
            .filter(VolumeColumn::RemovedAt.is_null())
            .count(db)
            .await?;

        if volume_count > 0 {
            return Err(anyhow::anyhow!("存储池下还有存储卷，无法删除"));
        }

        StoragePoolEntity::delete_by_id(pool_id)
            .exec(db)
            .await?;

        Ok(())
    }

    // ==================== 存储卷 ====================

    /// 创建存储卷
    ///
    /// 仅建目录记录（allocated）；指定快照或模板来源时，
    /// 由数据迁移引擎异步完成数据落位
    pub async fn create_volume(&self, dto: CreateVolumeDto) -> anyhow::Result<VolumeResponse> {
        let db = &self.state.sea_db();

        if dto.template_id.is_some() && dto.snapshot_id.is_some() {
            return Err(anyhow::anyhow!("模板来源与快照来源只能指定其一"));
        }

        let pool = StoragePoolEntity::find_by_id(&dto.pool_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("存储池不存在"))?;

        let volume_id = common::utils::generate_id();
        let now = Utc::now();

        let volume_active = VolumeActiveModel {
            id: Set(volume_id.clone()),
            uuid: Set(common::utils::generate_id()),
            name: Set(dto.name.clone()),
            volume_kind: Set(dto.volume_kind.clone()),
            format: Set(dto.format.clone()),
            size_gb: Set(dto.size_gb),
            pool_id: Set(pool.id.clone()),
            last_pool_id: Set(None),
            path: Set(None),
            folder: Set(None),
            chain_info: Set(None),
            array_id: Set(None),
            state: Set(ObjectState::Allocated.as_str().to_string()),
            node_id: Set(dto.node_id.clone()),
            vm_id: Set(dto.vm_id.clone()),
            template_id: Set(dto.template_id.clone()),
            removed_at: Set(None),
            metadata: Set(dto.metadata),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let volume = volume_active.insert(db).await?;

        // 模板/快照来源：引擎异步完成数据落位
        if let Some(template_id) = dto.template_id {
            self.spawn_copy_task(
                DataObjectKind::Template,
                template_id,
                DataObjectKind::Volume,
                volume_id.clone(),
                None,
            )
            .await?;
        } else if let Some(snapshot_id) = dto.snapshot_id {
            self.spawn_copy_task(
                DataObjectKind::Snapshot,
                snapshot_id,
                DataObjectKind::Volume,
                volume_id.clone(),
                None,
            )
            .await?;
        }

        Ok(VolumeResponse::from(volume))
    }

    /// 获取存储卷列表
    pub async fn list_volumes(
        &self,
        page: usize,
        page_size: usize,
        pool_id: Option<String>,
        state: Option<String>,
    ) -> anyhow::Result<VolumeListResponse> {
        let db = &self.state.sea_db();

        let mut query = VolumeEntity::find().filter(VolumeColumn::RemovedAt.is_null());

        if let Some(pid) = pool_id {
            query = query.filter(VolumeColumn::PoolId.eq(pid));
        }

        if let Some(s) = state {
            query = query.filter(VolumeColumn::State.eq(s));
        }

        let total = query.clone().count(db).await? as usize;

        let volumes = query
            .order_by_desc(VolumeColumn::CreatedAt)
            .offset(((page - 1) * page_size) as u64)
            .limit(page_size as u64)
            .all(db)
            .await?;

        // 填充存储池名称
        let mut volume_responses = Vec::new();
        for volume in volumes {
            let mut volume_response = VolumeResponse::from(volume.clone());
            if let Ok(Some(pool)) = StoragePoolEntity::find_by_id(&volume.pool_id).one(db).await {
                volume_response.pool_name = Some(pool.name);
            }
            volume_responses.push(volume_response);
        }

        Ok(VolumeListResponse {
            volumes: volume_responses,
            total,
            page,
            page_size,
        })
    }

    /// 获取单个存储卷
    pub async fn get_volume(&self, volume_id: &str) -> anyhow::Result<VolumeResponse> {
        let db = &self.state.sea_db();

        let volume = VolumeEntity::find_by_id(volume_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("存储卷不存在"))?;

        Ok(VolumeResponse::from(volume))
    }

    /// 删除存储卷
    pub async fn delete_volume(&self, volume_id: &str) -> anyhow::Result<()> {
        let db = &self.state.sea_db();

        let volume = VolumeEntity::find_by_id(volume_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("存储卷不存在"))?;

        if volume.vm_id.is_some() {
            return Err(anyhow::anyhow!("存储卷正在被虚拟机使用，无法删除"));
        }

        let motion = DataMotionService::from_state(&self.state);
        let volume_ref = ObjectRef::volume(volume_id);

        // 远端数据清理尽力而为，目录状态必须收敛
        if volume.path.is_some() {
            match motion.load_entry(DataObjectKind::Volume, volume_id).await {
                Ok(entry) => {
                    let driver = motion.context().drivers.for_store(&entry.store);
                    if let Err(e) = driver.delete_object(&entry).await {
                        tracing::warn!("远端卷数据清理失败（忽略）: {}", e);
                    }
                }
                Err(e) => tracing::warn!("装载卷端点失败（忽略）: {}", e),
            }
        }

        let catalog = &motion.context().catalog;
        catalog
            .transition(&volume_ref, ObjectEvent::DestroyRequested, ObjectChanges::none())
            .await
            .ok();
        catalog
            .transition(&volume_ref, ObjectEvent::OperationSucceeded, ObjectChanges::none())
            .await
            .ok();
        catalog.expunge(&volume_ref).await?;

        info!("存储卷已删除: {}", volume_id);
        Ok(())
    }

    /// 复制存储卷到目标池（异步任务）
    pub async fn copy_volume(&self, volume_id: &str, dto: CopyVolumeDto) -> anyhow::Result<TaskResponse> {
        let db = &self.state.sea_db();

        let volume = VolumeEntity::find_by_id(volume_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("存储卷不存在"))?;

        if ObjectState::from(volume.state.as_str()) != ObjectState::Ready {
            return Err(anyhow::anyhow!("存储卷状态不允许复制: {}", volume.state));
        }

        StoragePoolEntity::find_by_id(&dto.dest_pool_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("目标存储池不存在"))?;

        // 目标池上的新卷记录
        let motion = DataMotionService::from_state(&self.state);
        let dup = motion
            .context()
            .catalog
            .duplicate_volume(volume_id, &dto.dest_pool_id)
            .await?;

        self.spawn_copy_task(
            DataObjectKind::Volume,
            volume_id.to_string(),
            DataObjectKind::Volume,
            dup.id,
            dto.dest_node_id,
        )
        .await
    }

    /// 迁移存储卷到目标池（异步任务）
    ///
    /// 挂载中的卷走同主机在线迁移；空闲卷经引擎搬数据后
    /// 由目标记录收养源卷身份
    pub async fn migrate_volume(&self, volume_id: &str, dto: MigrateVolumeDto) -> anyhow::Result<TaskResponse> {
        let db = &self.state.sea_db();

        let volume = VolumeEntity::find_by_id(volume_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("存储卷不存在"))?;

        if ObjectState::from(volume.state.as_str()) != ObjectState::Ready {
            return Err(anyhow::anyhow!("存储卷状态不允许迁移: {}", volume.state));
        }
        if volume.pool_id == dto.dest_pool_id {
            return Err(anyhow::anyhow!("源存储池与目标存储池相同"));
        }

        StoragePoolEntity::find_by_id(&dto.dest_pool_id)
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("目标存储池不存在"))?;

        let motion = DataMotionService::from_state(&self.state);
        motion
            .context()
            .catalog
            .transition(
                &ObjectRef::volume(volume_id),
                ObjectEvent::MigrateRequested,
                ObjectChanges::none(),
            )
            .await?;

        let task_service = TaskService::new(self.state.clone());
        let task = task_service
            .create_task(
                TaskType::MigrateVolume,
                Some("volume".to_string()),
                Some(volume_id.to_string()),
                volume.node_id.clone(),
                serde_json::json!({ "dest_pool_id": dto.dest_pool_id }),
            )
            .await?;

        let state = self.state.clone();
        let task_id = task.id.clone();
        let volume_id = volume_id.to_string();
        let dest_pool_id = dto.dest_pool_id.clone();
        let attached_node = volume.node_id.clone();
        tokio::spawn(async move {
            let outcome = run_volume_migration(&state, &volume_id, &dest_pool_id, attached_node).await;
            finish_task(&state, &task_id, outcome).await;
        });

        Ok(task)
    }

    /// 建复制任务并派发引擎
    async fn spawn_copy_task(
        &self,
        src_kind: DataObjectKind,
        src_id: String,
        dest_kind: DataObjectKind,
        dest_id: String,
        dest_node_id: Option<String>,
    ) -> anyhow::Result<TaskResponse> {
        let task_service = TaskService::new(self.state.clone());
        let task = task_service
            .create_task(
                TaskType::CopyObject,
                Some(dest_kind.as_str().to_string()),
                Some(dest_id.clone()),
                dest_node_id.clone(),
                serde_json::json!({
                    "src_kind": src_kind.as_str(),
                    "src_id": src_id,
                }),
            )
            .await?;

        let state = self.state.clone();
        let task_id = task.id.clone();
        tokio::spawn(async move {
            let motion = DataMotionService::from_state(&state);
            let outcome = async {
                let src = match motion.load_entry(src_kind, &src_id).await {
                    Ok(e) => e,
                    Err(e) => return CopyOutcome::failed(e.to_string()),
                };
                let dest = match motion.load_entry(dest_kind, &dest_id).await {
                    Ok(e) => e,
                    Err(e) => return CopyOutcome::failed(e.to_string()),
                };
                let host = match &dest_node_id {
                    Some(id) => match motion.load_host(id).await {
                        Ok(h) => Some(h),
                        Err(e) => return CopyOutcome::failed(e.to_string()),
                    },
                    None => None,
                };
                motion.copy(&src, &dest, host.as_ref()).await
            }
            .await;

            finish_task(&state, &task_id, outcome).await;
        });

        Ok(task)
    }
}

/// 卷迁移的完整旅程（引擎复制 + 身份收养 + 源端处置）
async fn run_volume_migration(
    state: &AppState,
    volume_id: &str,
    dest_pool_id: &str,
    attached_node: Option<String>,
) -> CopyOutcome {
    let motion = DataMotionService::from_state(state);
    let catalog = motion.context().catalog.clone();

    let src = match motion.load_entry(DataObjectKind::Volume, volume_id).await {
        Ok(e) => e,
        Err(e) => return CopyOutcome::failed(e.to_string()),
    };

    // 挂载中的卷：同主机在线迁移，卷记录原地换池
    if let Some(node_id) = attached_node {
        let host = match motion.load_host(&node_id).await {
            Ok(h) => h,
            Err(e) => return CopyOutcome::failed(e.to_string()),
        };
        let dest_pool = match catalog.pool(dest_pool_id).await {
            Ok(Some(p)) => p,
            _ => return CopyOutcome::failed(format!("目标存储池不存在: {}", dest_pool_id)),
        };
        let dest = DataEntry::new(src.object.clone(), DataStore::from_pool(&dest_pool));
        return motion.copy(&src, &dest, Some(&host)).await;
    }

    // 空闲卷：目标池上建新记录，引擎搬数据后收养身份
    let dup = match catalog.duplicate_volume(volume_id, dest_pool_id).await {
        Ok(d) => d,
        Err(e) => return CopyOutcome::failed(e.to_string()),
    };
    let dup_id = dup.id.clone();
    let dest = match motion.load_entry(DataObjectKind::Volume, &dup_id).await {
        Ok(e) => e,
        Err(e) => return CopyOutcome::failed(e.to_string()),
    };

    let outcome = motion.copy(&src, &dest, None).await;
    let src_ref = ObjectRef::volume(volume_id);

    if outcome.success {
        if let Err(e) = catalog.adopt_volume_identity(volume_id, &dup_id).await {
            error!("目标卷身份收养失败: {}", e);
        }
        if let Err(e) = catalog.reparent_snapshots(volume_id, &dup_id).await {
            error!("快照改挂失败: {}", e);
        }
        // 源卷退役
        catalog
            .transition(&src_ref, ObjectEvent::OperationSucceeded, ObjectChanges::none())
            .await
            .ok();
        catalog
            .transition(&src_ref, ObjectEvent::DestroyRequested, ObjectChanges::none())
            .await
            .ok();
        catalog
            .transition(&src_ref, ObjectEvent::OperationSucceeded, ObjectChanges::none())
            .await
            .ok();
        catalog.expunge(&src_ref).await.ok();
    } else {
        // 未发生数据移动：源卷复位就绪，目标记录打删除标记
        catalog
            .transition(&src_ref, ObjectEvent::OperationSucceeded, ObjectChanges::none())
            .await
            .ok();
        catalog.expunge(&ObjectRef::volume(&dup_id)).await.ok();
    }

    outcome
}

/// 任务收尾
pub(crate) async fn finish_task(state: &AppState, task_id: &str, outcome: CopyOutcome) {
    let task_service = TaskService::new(state.clone());
    let result = if outcome.success {
        task_service
            .update_task_status(
                task_id,
                TaskStatus::Completed,
                Some(100),
                Some(serde_json::json!({
                    "message": outcome.message,
                    "new_object": outcome.new_object,
                })),
                None,
            )
            .await
    } else {
        task_service
            .update_task_status(task_id, TaskStatus::Failed, Some(100), None, Some(outcome.message))
            .await
    };

    if let Err(e) = result {
        error!("任务收尾失败: task_id={}, error={}", task_id, e);
    }
}
