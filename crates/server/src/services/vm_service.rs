/// 虚拟机管理服务
///
/// 数据迁移引擎只需要精简的虚拟机视图：
/// 名称、所在节点、客户机类型，以及整机存储迁移的入口

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set};
use tracing::{error, info};

use crate::db::models::node::Entity as NodeEntity;
use crate::db::models::task::{TaskResponse, TaskType};
use crate::db::models::vm::{
    MigrateVmStorageDto, VmListResponse, VmResponse, VmStatus,
    Entity as VmEntity, Column as VmColumn, ActiveModel as VmActiveModel,
};
use crate::app_state::AppState;
use crate::motion::catalog::MotionCatalog;
use crate::motion::endpoint::HostEndpoint;
use crate::motion::object::{DataEntry, DataObject, DataStore};
use crate::motion::strategy::{VmStorageMigrationJob, VolumePlacement};
use crate::motion::{CopyOutcome, DataMotionService};
use crate::services::storage_service::finish_task;
use crate::services::task_service::TaskService;

pub struct VmService {
    state: AppState,
}

impl VmService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 获取虚拟机列表
    pub async fn list_vms(
        &self,
        page: usize,
        page_size: usize,
        node_id: Option<String>,
    ) -> anyhow::Result<VmListResponse> {
        let db = &self.state.sea_db();

        let mut query = VmEntity::find();

        if let Some(nid) = node_id {
            query = query.filter(VmColumn::NodeId.eq(nid));
        }

        let total = query.clone().count(db).await? as usize;

        let vms = query
            .order_by_desc(VmColumn::CreatedAt)
            .offset(((page - 1) * page_size) as u64)
            .limit(page_size as u64)
            .all(db)
            .await?;

        let mut responses = Vec::new();
        for vm in vms {
            let mut response = VmResponse::from(vm.clone());
            if let Some(node_id) = &vm.node_id {
                if let Ok(Some(node)) = NodeEntity::find_by_id(node_id.clone()).one(db).await {
                    response.node_name = Some(node.hostname);
                }
            }
            responses.push(response);
        }

        Ok(VmListResponse {
            vms: responses,
            total,
            page,
            page_size,
        })
    }

    /// 获取单个虚拟机
    pub async fn get_vm(&self, id: &str) -> anyhow::Result<VmResponse> {
        let db = &self.state.sea_db();

        let vm = VmEntity::find_by_id(id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("虚拟机不存在"))?;

        Ok(VmResponse::from(vm))
    }

    /// 整机在线存储迁移（异步任务）
    ///
    /// 装配迁移作业（卷 → 目标池安置表 + 主机对）交给引擎，
    /// 结束后按结果更新虚拟机的节点归属
    pub async fn migrate_vm_storage(
        &self,
        vm_id: &str,
        dto: MigrateVmStorageDto,
    ) -> anyhow::Result<TaskResponse> {
        let db = &self.state.sea_db();

        let vm = VmEntity::find_by_id(vm_id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("虚拟机不存在"))?;

        let src_node_id = vm
            .node_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("虚拟机未分配节点"))?;
        if src_node_id == dto.dest_node_id {
            return Err(anyhow::anyhow!("源节点和目标节点相同"));
        }

        let motion = DataMotionService::from_state(&self.state);
        let catalog = motion.context().catalog.clone();

        let src_host = motion.load_host(&src_node_id).await?;
        let dest_host = motion.load_host(&dto.dest_node_id).await?;

        // 逐卷装配安置表
        let volumes = catalog.volumes_of_vm(vm_id).await?;
        if volumes.is_empty() {
            return Err(anyhow::anyhow!("虚拟机没有关联的存储卷"));
        }

        let mut placements = Vec::new();
        for volume in volumes {
            let src_pool = catalog
                .pool(&volume.pool_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("找不到数据存储: pool={}", volume.pool_id))?;

            let dest_pool_id = dto
                .volume_pool_map
                .get(&volume.id)
                .cloned()
                .unwrap_or_else(|| volume.pool_id.clone());
            let dest_pool = catalog
                .pool(&dest_pool_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("目标存储池不存在: {}", dest_pool_id))?;

            placements.push(VolumePlacement {
                source: DataEntry::new(
                    DataObject::Volume(volume),
                    DataStore::from_pool(&src_pool),
                ),
                dest_store: DataStore::from_pool(&dest_pool),
            });
        }

        let job = VmStorageMigrationJob {
            vm: vm.clone(),
            src_host,
            dest_host: dest_host.clone(),
            placements,
        };

        // 虚拟机进入迁移中
        let now = Utc::now();
        let mut vm_active: VmActiveModel = vm.into();
        vm_active.status = Set(VmStatus::Migrating.as_str().to_string());
        vm_active.updated_at = Set(now.into());
        vm_active.update(db).await?;

        let task_service = TaskService::new(self.state.clone());
        let task = task_service
            .create_task(
                TaskType::MigrateVmStorage,
                Some("vm".to_string()),
                Some(vm_id.to_string()),
                Some(dto.dest_node_id.clone()),
                serde_json::json!({
                    "dest_node_id": dto.dest_node_id,
                    "volume_pool_map": dto.volume_pool_map,
                }),
            )
            .await?;

        let state = self.state.clone();
        let task_id = task.id.clone();
        let vm_id = vm_id.to_string();
        tokio::spawn(async move {
            let motion = DataMotionService::from_state(&state);
            let outcome = motion.migrate_vm_storage(&job).await;

            if let Err(e) = Self::settle_vm_after_migration(&state, &vm_id, &dest_host, &outcome).await {
                error!("虚拟机迁移收尾失败: vm={}, error={}", vm_id, e);
            }

            finish_task(&state, &task_id, outcome).await;
        });

        Ok(task)
    }

    /// 迁移结束后的虚拟机归属处置
    async fn settle_vm_after_migration(
        state: &AppState,
        vm_id: &str,
        dest_host: &HostEndpoint,
        outcome: &CopyOutcome,
    ) -> anyhow::Result<()> {
        let db = &state.sea_db();
        let vm = VmEntity::find_by_id(vm_id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("虚拟机不存在"))?;

        let now = Utc::now();
        let mut vm_active: VmActiveModel = vm.into();
        if outcome.success {
            vm_active.node_id = Set(Some(dest_host.node_id.clone()));
            vm_active.status = Set(VmStatus::Running.as_str().to_string());
            info!("虚拟机已迁往目标节点: vm={}, node={}", vm_id, dest_host.node_id);
        } else {
            // 迁移失败：虚拟机留在源节点继续运行
            vm_active.status = Set(VmStatus::Running.as_str().to_string());
        }
        vm_active.updated_at = Set(now.into());
        vm_active.update(db).await?;

        Ok(())
    }
}
