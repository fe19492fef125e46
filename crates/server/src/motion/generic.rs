/// 通用（缓存中转）迁移策略
///
/// 面向任意端点对的兜底复制：当两端无法由单台宿主机直达时
/// 插入中转缓存；覆盖快照建卷、快照出模板、快照备份、
/// 模板克隆、跨主存储池搬卷、同主机跨池迁移等组合

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use common::models::{DataObjectKind, StoreRole};
use common::utils::strip_credential_query;
use common::ws_rpc::{CopyObjectRequest, DataObjectDescriptor, DeleteObjectRequest, MigrateVolumeRequest};
use common::Result;

use super::cache::CacheEntry;
use super::catalog::{MotionCatalog, ObjectChanges};
use super::endpoint::{EndpointSelector, HostEndpoint};
use super::lifecycle::{ObjectEvent, ObjectState};
use super::object::{DataEntry, DataObject, DataStore, ObjectRef};
use super::runner::{AgentAnswer, AgentCommand, CommandRunner};
use super::strategy::{
    CopyOutcome, DataMotionStrategy, StrategyPriority, VmStorageMigrationJob,
};
use super::MotionContext;

/// 快照备份选项键
const OPTION_FULL_SNAPSHOT: &str = "full_snapshot";
/// 快照上标记全量备份的明细键
const DETAIL_FULL_SNAPSHOT: &str = "full_snapshot";

pub struct GenericMotionStrategy {
    ctx: Arc<MotionContext>,
}

impl GenericMotionStrategy {
    pub fn new(ctx: Arc<MotionContext>) -> Self {
        Self { ctx }
    }

    /// 判定是否需要经过中转缓存
    ///
    /// 任一端是文件协议存储或本身就是缓存存储时，宿主机可以直达，无需中转
    pub fn needs_cache_storage(src: &DataEntry, dest: &DataEntry) -> bool {
        let direct = |s: &DataStore| s.is_file_protocol() || s.role == StoreRole::ImageCache;
        !(direct(&src.store) || direct(&dest.store))
    }

    /// 通用复制编排
    ///
    /// 建缓存（如需）→ 选端点 → 发复制命令 → 缓存处置 → 目标状态收尾。
    /// 全程恰好产生一个结果，内部错误折算为失败结果
    async fn copy_object(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        dest_host: Option<&HostEndpoint>,
        wait_secs: u64,
        options: HashMap<String, String>,
    ) -> CopyOutcome {
        if dest.object.state() == ObjectState::Allocated {
            if let Err(e) = self
                .ctx
                .catalog
                .transition(&dest.object.object_ref(), ObjectEvent::CreateRequested, ObjectChanges::none())
                .await
            {
                return CopyOutcome::failed(format!("目标对象状态转换失败: {}", e));
            }
        }

        let mut cache_entry: Option<CacheEntry> = None;
        let outcome = match self
            .copy_object_inner(src, dest, dest_host, wait_secs, options, &mut cache_entry)
            .await
        {
            Ok(outcome) => {
                if let Some(entry) = &cache_entry {
                    self.dispose_cache(src, dest, entry, outcome.success).await;
                }
                outcome
            }
            Err(e) => {
                // 异常路径：缓存一律删除，不留半成品
                if let Some(entry) = &cache_entry {
                    if let Err(del) = self.ctx.cache.delete(entry).await {
                        warn!("异常清理缓存失败（忽略）: {}", del);
                    }
                }
                CopyOutcome::failed(e.to_string())
            }
        };

        self.finish_dest(dest, &outcome).await;
        outcome
    }

    async fn copy_object_inner(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        dest_host: Option<&HostEndpoint>,
        wait_secs: u64,
        options: HashMap<String, String>,
        cache_slot: &mut Option<CacheEntry>,
    ) -> Result<CopyOutcome> {
        let src_desc = if Self::needs_cache_storage(src, dest) {
            let entry = self.ctx.cache.create_or_get(src, &dest.store).await?;
            let desc = entry.descriptor(src);
            *cache_slot = Some(entry);
            desc
        } else {
            src.descriptor()
        };

        let endpoint = match dest_host {
            Some(h) => h.clone(),
            None => {
                let from_store = cache_slot
                    .as_ref()
                    .map(|e| &e.store)
                    .unwrap_or(&src.store);
                match self.ctx.selector.select(from_store, &dest.store).await? {
                    Some(ep) => ep,
                    None => return Ok(CopyOutcome::failed("没有可用的远程执行端点")),
                }
            }
        };

        Ok(self
            .send_copy(&endpoint, src_desc, dest.descriptor(), wait_secs, options)
            .await)
    }

    /// 发送一条复制命令并折算结果
    async fn send_copy(
        &self,
        endpoint: &HostEndpoint,
        src_desc: DataObjectDescriptor,
        dest_desc: DataObjectDescriptor,
        wait_secs: u64,
        options: HashMap<String, String>,
    ) -> CopyOutcome {
        let command = AgentCommand::Copy(CopyObjectRequest {
            src: src_desc,
            dest: dest_desc,
            wait_secs,
            execute_in_sequence: self.ctx.config.execute_in_sequence,
            options,
        });

        match self.ctx.runner.send(&endpoint.node_id, command).await {
            AgentAnswer::Copy(resp) if resp.success => match resp.new_object {
                Some(obj) => CopyOutcome::ok_with(resp.message, obj),
                None => CopyOutcome::ok(resp.message),
            },
            other => CopyOutcome::failed(other.message().to_string()),
        }
    }

    /// 复制后的缓存处置
    ///
    /// 搬运卷数据时缓存一律删除（下次必须重读最新源）；
    /// 模板缓存场景按创建者 + 引用计数决定删除或归还复用
    async fn dispose_cache(&self, src: &DataEntry, dest: &DataEntry, entry: &CacheEntry, success: bool) {
        let moving_volume_data = src.kind() == DataObjectKind::Volume
            && matches!(dest.kind(), DataObjectKind::Volume | DataObjectKind::Template);

        let result = if moving_volume_data {
            self.ctx.cache.delete(entry).await
        } else if !success && entry.created_here && entry.row.ref_count < 2 {
            self.ctx.cache.delete(entry).await
        } else {
            self.ctx.cache.release(entry).await
        };

        if let Err(e) = result {
            warn!("缓存处置失败（忽略）: source={}, error={}", entry.row.source_uuid, e);
        }
    }

    /// 目标对象的状态收尾
    async fn finish_dest(&self, dest: &DataEntry, outcome: &CopyOutcome) {
        let dest_ref = dest.object.object_ref();
        let current = match self.current_state(&dest_ref).await {
            Some(s) => s,
            None => return,
        };
        if current != ObjectState::Creating && current != ObjectState::Copying {
            return;
        }

        let (event, changes) = if outcome.success {
            let mut changes = ObjectChanges::none();
            if let Some(obj) = &outcome.new_object {
                changes.path = obj.path.clone();
                changes.size_gb = Some(obj.size_gb);
            }
            (ObjectEvent::OperationSucceeded, changes)
        } else {
            (ObjectEvent::OperationFailed, ObjectChanges::none())
        };

        if let Err(e) = self.ctx.catalog.transition(&dest_ref, event, changes).await {
            warn!("目标对象状态收尾失败（忽略）: id={}, error={}", dest_ref.id, e);
        }
    }

    async fn current_state(&self, object: &ObjectRef) -> Option<ObjectState> {
        let state = match object.kind {
            DataObjectKind::Volume => self.ctx.catalog.volume(&object.id).await.ok()??.state,
            DataObjectKind::Snapshot => self.ctx.catalog.snapshot(&object.id).await.ok()??.state,
            DataObjectKind::Template => self.ctx.catalog.template(&object.id).await.ok()??.state,
        };
        Some(ObjectState::from(state.as_str()))
    }

    // ------------------------------------------------------------------
    // 专用子操作
    // ------------------------------------------------------------------

    async fn create_volume_from_snapshot(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        dest_host: Option<&HostEndpoint>,
    ) -> CopyOutcome {
        info!("从快照建卷: snapshot={}, volume={}", src.object.uuid(), dest.object.uuid());
        self.copy_object(
            src,
            dest,
            dest_host,
            self.ctx.config.create_from_snapshot_wait_secs,
            HashMap::new(),
        )
        .await
    }

    async fn create_template_from_snapshot(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        dest_host: Option<&HostEndpoint>,
    ) -> CopyOutcome {
        info!("从快照出模板: snapshot={}, template={}", src.object.uuid(), dest.object.uuid());
        self.copy_object(
            src,
            dest,
            dest_host,
            self.ctx.config.create_from_snapshot_wait_secs,
            HashMap::new(),
        )
        .await
    }

    /// 快照备份到二级存储（全量或增量，经选项表传递）
    async fn backup_snapshot(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        dest_host: Option<&HostEndpoint>,
    ) -> CopyOutcome {
        let mut full = match &src.object {
            DataObject::Snapshot(s) => s.parent_snapshot_id.is_none(),
            _ => true,
        };
        // 明细行上的显式标记覆盖链推断
        if let Ok(Some(v)) = self
            .ctx
            .catalog
            .get_detail(&src.object.object_ref(), DETAIL_FULL_SNAPSHOT)
            .await
        {
            full = v == "true";
        }

        let mut options = HashMap::new();
        options.insert(OPTION_FULL_SNAPSHOT.to_string(), full.to_string());

        info!(
            "备份快照: snapshot={}, full={}",
            src.object.uuid(),
            full
        );
        self.copy_object(
            src,
            dest,
            dest_host,
            self.ctx.config.backup_snapshot_wait_secs,
            options,
        )
        .await
    }

    async fn clone_volume_from_template(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        dest_host: Option<&HostEndpoint>,
    ) -> CopyOutcome {
        info!("从模板克隆卷: template={}, volume={}", src.object.uuid(), dest.object.uuid());
        self.copy_object(
            src,
            dest,
            dest_host,
            self.ctx.config.download_wait_secs,
            HashMap::new(),
        )
        .await
    }

    /// 跨主存储池搬卷
    ///
    /// 没有可共享的缓存存储时经二级存储全量中转：
    /// 建中间对象 → 拷入 → 拷出 → 删除，全程驱动中间对象状态机
    async fn copy_volume_between_pools(&self, src: &DataEntry, dest: &DataEntry) -> CopyOutcome {
        let both_primary =
            src.store.role == StoreRole::Primary && dest.store.role == StoreRole::Primary;
        let has_cache = match self.ctx.cache.has_cache_store(&src.store, &dest.store).await {
            Ok(v) => v,
            Err(e) => return CopyOutcome::failed(format!("缓存存储探测失败: {}", e)),
        };

        if !both_primary || has_cache || !Self::needs_cache_storage(src, dest) {
            return self
                .copy_object(src, dest, None, self.ctx.config.copy_volume_wait_secs, HashMap::new())
                .await;
        }

        match self.copy_via_image_store(src, dest).await {
            Ok(outcome) => outcome,
            Err(e) => CopyOutcome::failed(e.to_string()),
        }
    }

    async fn copy_via_image_store(&self, src: &DataEntry, dest: &DataEntry) -> Result<CopyOutcome> {
        let image_pool = match self.ctx.catalog.image_stores().await?.into_iter().next() {
            Some(p) => p,
            None => return Ok(CopyOutcome::failed("没有可用的二级存储进行中转")),
        };
        let image_store = DataStore::from_pool(&image_pool);
        info!(
            "经二级存储中转搬卷: volume={}, image_store={}",
            src.object.uuid(),
            image_store.id
        );

        // 中间对象记录
        let mid = self
            .ctx
            .catalog
            .duplicate_volume(src.object.id(), &image_store.id)
            .await?;
        let mid_ref = ObjectRef::volume(&mid.id);
        self.ctx
            .catalog
            .transition(&mid_ref, ObjectEvent::CreateRequested, ObjectChanges::none())
            .await?;

        // 拷入二级存储
        let inbound = match self.ctx.selector.select(&src.store, &image_store).await? {
            Some(ep) => {
                let mut mid_desc = src.descriptor();
                mid_desc.id = mid.id.clone();
                mid_desc.uuid = mid.uuid.clone();
                mid_desc.path = None;
                mid_desc.store = image_store.descriptor();
                self.send_copy(
                    &ep,
                    src.descriptor(),
                    mid_desc,
                    self.ctx.config.copy_volume_wait_secs,
                    HashMap::new(),
                )
                .await
            }
            None => CopyOutcome::failed("没有可触达二级存储的端点"),
        };

        if !inbound.success {
            self.ctx
                .catalog
                .transition(&mid_ref, ObjectEvent::OperationFailed, ObjectChanges::none())
                .await
                .ok();
            self.ctx.catalog.expunge(&mid_ref).await.ok();
            self.finish_dest(dest, &inbound).await;
            return Ok(CopyOutcome::failed(format!("拷入二级存储失败: {}", inbound.message)));
        }

        let mut mid_changes = ObjectChanges::none();
        let mid_path = inbound.new_object.as_ref().and_then(|o| o.path.clone());
        mid_changes.path = mid_path.clone();
        self.ctx
            .catalog
            .transition(&mid_ref, ObjectEvent::OperationSucceeded, mid_changes)
            .await?;

        // 从二级存储拷出到目标池
        if dest.object.state() == ObjectState::Allocated {
            self.ctx
                .catalog
                .transition(&dest.object.object_ref(), ObjectEvent::CreateRequested, ObjectChanges::none())
                .await?;
        }
        self.ctx
            .catalog
            .transition(&mid_ref, ObjectEvent::CopyRequested, ObjectChanges::none())
            .await?;

        let mut mid_src_desc = src.descriptor();
        mid_src_desc.id = mid.id.clone();
        mid_src_desc.uuid = mid.uuid.clone();
        mid_src_desc.path = mid_path;
        mid_src_desc.store = image_store.descriptor();

        let outbound = match self.ctx.selector.select(&image_store, &dest.store).await? {
            Some(ep) => {
                self.send_copy(
                    &ep,
                    mid_src_desc.clone(),
                    dest.descriptor(),
                    self.ctx.config.copy_volume_wait_secs,
                    HashMap::new(),
                )
                .await
            }
            None => CopyOutcome::failed("没有可触达目标池的端点"),
        };

        let mid_event = if outbound.success {
            ObjectEvent::OperationSucceeded
        } else {
            ObjectEvent::OperationFailed
        };
        self.ctx
            .catalog
            .transition(&mid_ref, mid_event, ObjectChanges::none())
            .await
            .ok();

        // 清理中间对象（尽力而为删远端数据，目录行打删除标记）
        if let Ok(Some(ep)) = self.ctx.selector.select_for_store(&image_store).await {
            let answer = self
                .ctx
                .runner
                .send(
                    &ep.node_id,
                    AgentCommand::Delete(DeleteObjectRequest { object: mid_src_desc }),
                )
                .await;
            if !answer.success() {
                warn!("中间对象数据清理失败（忽略）: {}", answer.message());
            }
        }
        self.ctx.catalog.expunge(&mid_ref).await.ok();

        self.finish_dest(dest, &outbound).await;
        Ok(outbound)
    }

    /// 同主机跨池迁移（在线或离线）
    ///
    /// 单条迁移命令完成数据搬运，成功后持久化新路径/链信息/池归属。
    /// 持久化前截断路径中的凭据查询串，连接凭据不落库
    async fn migrate_volume_to_pool(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        host: &HostEndpoint,
    ) -> CopyOutcome {
        let volume = match &src.object {
            DataObject::Volume(v) => v,
            _ => return CopyOutcome::failed("跨池迁移只支持存储卷"),
        };

        let attached_vm_name = match &volume.vm_id {
            Some(vm_id) => match self.ctx.catalog.vm(vm_id).await {
                Ok(Some(vm)) => Some(vm.name),
                _ => None,
            },
            None => None,
        };

        let command = AgentCommand::MigrateVolume(MigrateVolumeRequest {
            volume_id: volume.id.clone(),
            volume_uuid: volume.uuid.clone(),
            path: volume.path.clone().unwrap_or_default(),
            dest_pool: dest.store.descriptor(),
            attached_vm_name,
            volume_kind: volume.volume_kind.clone(),
            wait_secs: self.ctx.config.migrate_wait_secs,
        });

        let volume_ref = ObjectRef::volume(&volume.id);
        match self.ctx.runner.send(&host.node_id, command).await {
            AgentAnswer::MigrateVolume(resp) if resp.success => {
                let new_path = resp
                    .new_path
                    .as_deref()
                    .map(|p| strip_credential_query(p).to_string());
                let folder = dest
                    .store
                    .path
                    .as_deref()
                    .map(|p| strip_credential_query(p).to_string());

                let mut changes = ObjectChanges::none();
                changes.path = new_path;
                changes.folder = folder;
                changes.chain_info = resp.new_chain_info.clone();
                changes.pool_id = Some(dest.store.id.clone());
                changes.last_pool_id = Some(src.store.id.clone());

                if let Err(e) = self
                    .ctx
                    .catalog
                    .transition(&volume_ref, ObjectEvent::OperationSucceeded, changes)
                    .await
                {
                    return CopyOutcome::failed(format!("迁移结果持久化失败: {}", e));
                }
                CopyOutcome::ok(resp.message)
            }
            other => {
                self.ctx
                    .catalog
                    .transition(&volume_ref, ObjectEvent::OperationFailed, ObjectChanges::none())
                    .await
                    .ok();
                CopyOutcome::failed(other.message().to_string())
            }
        }
    }
}

#[async_trait]
impl DataMotionStrategy for GenericMotionStrategy {
    fn name(&self) -> &'static str {
        "generic"
    }

    async fn can_handle(&self, _src: &DataEntry, _dest: &DataEntry) -> StrategyPriority {
        // 兜底策略：任何组合都接，优先级最低
        StrategyPriority::Default
    }

    async fn can_handle_vm(&self, _job: &VmStorageMigrationJob) -> StrategyPriority {
        StrategyPriority::CantHandle
    }

    async fn copy(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        dest_host: Option<&HostEndpoint>,
    ) -> CopyOutcome {
        match (src.kind(), dest.kind()) {
            (DataObjectKind::Volume, DataObjectKind::Volume)
                if src.object.state() == ObjectState::Migrating =>
            {
                match dest_host {
                    Some(host) => self.migrate_volume_to_pool(src, dest, host).await,
                    None => self.copy_volume_between_pools(src, dest).await,
                }
            }
            (DataObjectKind::Snapshot, DataObjectKind::Volume) => {
                self.create_volume_from_snapshot(src, dest, dest_host).await
            }
            (DataObjectKind::Snapshot, DataObjectKind::Template) => {
                self.create_template_from_snapshot(src, dest, dest_host).await
            }
            (DataObjectKind::Snapshot, DataObjectKind::Snapshot) => {
                self.backup_snapshot(src, dest, dest_host).await
            }
            (DataObjectKind::Template, DataObjectKind::Volume) => {
                self.clone_volume_from_template(src, dest, dest_host).await
            }
            _ => {
                self.copy_object(
                    src,
                    dest,
                    dest_host,
                    self.ctx.config.copy_volume_wait_secs,
                    HashMap::new(),
                )
                .await
            }
        }
    }

    async fn migrate_vm(&self, _job: &VmStorageMigrationJob) -> CopyOutcome {
        CopyOutcome::failed("通用策略不支持整机存储迁移")
    }
}
