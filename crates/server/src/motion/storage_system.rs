/// 存储系统感知迁移策略
///
/// 利用阵列原生能力（快照、从卷克隆）以及托管池的按卷寻址语义。
/// 整机存储迁移的三处虚拟化差异点（池准入、磁盘描述符、目标路径）
/// 以钩子集注入，同一套编排例程分别搭配阵列钩子与 KVM 钩子注册

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use common::models::{DataObjectKind, DiskFormat, StoreRole};
use common::ws_rpc::{
    CopyObjectRequest, DiskDescriptor, DiskKind, MigrationOptionsDescriptor, ResignatureRequest,
    ResignatureResponse,
};
use common::{Error, Result};

use crate::db::models::volume;

use super::capability;
use super::catalog::{MotionCatalog, ObjectChanges};
use super::driver::{try_update_qos, QosState, StoreDriver};
use super::endpoint::{EndpointSelector, HostEndpoint};
use super::lifecycle::{ObjectEvent, ObjectState};
use super::locks;
use super::object::{DataEntry, DataObject, DataStore, ObjectRef};
use super::runner::{AgentAnswer, AgentCommand, CommandRunner};
use super::strategy::{
    CopyOutcome, DataMotionStrategy, StrategyPriority, VmStorageMigrationJob, VolumePlacement,
};
use super::{vm_migration, MotionContext};

/// 重签名互斥锁的获取时限（秒）
pub const RESIGNATURE_LOCK_WAIT_SECS: u64 = 300;

/// 命令选项：要求阵列侧克隆
const OPTION_CLONE_ON_ARRAY: &str = "clone_on_array";
/// 目标卷上标记"正在从阵列克隆"的临时明细键，操作收尾时清除
const DETAIL_CLONE_SOURCE: &str = "clone_source_uuid";

/// 整机迁移的虚拟化差异钩子
///
/// 以函数值形式提供覆盖点，编排例程只有一份（见 vm_migration）
#[async_trait]
pub trait MigrationHookSet: Send + Sync {
    fn name(&self) -> &'static str;

    /// 池是否符合整机迁移条件
    fn pool_qualifies(&self, store: &DataStore) -> bool;

    /// 整机迁移作业的优先级判定
    fn vm_priority(&self, job: &VmStorageMigrationJob) -> StrategyPriority {
        let any_managed = job
            .placements
            .iter()
            .any(|p| p.source.store.managed || p.dest_store.managed);
        if any_managed {
            StrategyPriority::Highest
        } else {
            StrategyPriority::CantHandle
        }
    }

    /// 构造迁移命令的磁盘描述符
    fn build_disk_descriptor(
        &self,
        placement: &VolumePlacement,
        dest_path: Option<&str>,
        options: Option<MigrationOptionsDescriptor>,
    ) -> DiskDescriptor;

    /// 目标端路径预备（可能需要远程创建根盘）
    async fn prepare_destination_path(
        &self,
        _ctx: &MotionContext,
        _placement: &VolumePlacement,
        _dup: &volume::Model,
        _dest_host: &HostEndpoint,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    /// 预拷贝基础模板到目标端（缺省不做）
    async fn pre_copy_template(
        &self,
        _ctx: &MotionContext,
        _placement: &VolumePlacement,
        _dest_host: &HostEndpoint,
    ) -> Result<()> {
        Ok(())
    }
}

/// 阵列钩子（基准实现）：只接托管池，磁盘按块设备描述
pub struct ArrayMigrationHooks;

#[async_trait]
impl MigrationHookSet for ArrayMigrationHooks {
    fn name(&self) -> &'static str {
        "array"
    }

    fn pool_qualifies(&self, store: &DataStore) -> bool {
        store.managed
    }

    fn build_disk_descriptor(
        &self,
        placement: &VolumePlacement,
        dest_path: Option<&str>,
        options: Option<MigrationOptionsDescriptor>,
    ) -> DiskDescriptor {
        DiskDescriptor {
            volume_uuid: placement.source.object.uuid().to_string(),
            disk_kind: DiskKind::Block,
            format: placement.source.object.format(),
            path: dest_path.map(|p| p.to_string()),
            source_path: placement.source.object.path().map(|p| p.to_string()),
            backing_path: None,
            migration: options,
        }
    }
}

pub struct StorageSystemStrategy {
    ctx: Arc<MotionContext>,
    hooks: Arc<dyn MigrationHookSet>,
    name: &'static str,
}

impl StorageSystemStrategy {
    /// 阵列钩子实例
    pub fn new(ctx: Arc<MotionContext>) -> Self {
        Self {
            ctx,
            hooks: Arc::new(ArrayMigrationHooks),
            name: "storage-system",
        }
    }

    /// 指定钩子集的实例（KVM 变体经此注册）
    pub fn with_hooks(
        ctx: Arc<MotionContext>,
        hooks: Arc<dyn MigrationHookSet>,
        name: &'static str,
    ) -> Self {
        Self { ctx, hooks, name }
    }

    // ------------------------------------------------------------------
    // 公共小件
    // ------------------------------------------------------------------

    async fn dest_enter_creating(&self, dest: &DataEntry) -> Result<()> {
        if dest.object.state() == ObjectState::Allocated {
            self.ctx
                .catalog
                .transition(
                    &dest.object.object_ref(),
                    ObjectEvent::CreateRequested,
                    ObjectChanges::none(),
                )
                .await?;
        }
        Ok(())
    }

    /// 目标对象状态收尾；成功时重新拉取目录行并带回最新描述符
    async fn finish_dest(&self, dest: &DataEntry, outcome: CopyOutcome) -> CopyOutcome {
        let dest_ref = dest.object.object_ref();
        let event = if outcome.success {
            ObjectEvent::OperationSucceeded
        } else {
            ObjectEvent::OperationFailed
        };

        let mut changes = ObjectChanges::none();
        if let Some(obj) = &outcome.new_object {
            changes.path = obj.path.clone();
            changes.size_gb = Some(obj.size_gb);
        }

        if let Err(e) = self.ctx.catalog.transition(&dest_ref, event, changes).await {
            warn!("目标对象状态收尾失败（忽略）: id={}, error={}", dest_ref.id, e);
        }

        if !outcome.success {
            return outcome;
        }

        // 成功路径：返回前重新拉取目录行
        match self.refreshed_descriptor(dest).await {
            Some(desc) => CopyOutcome::ok_with(outcome.message, desc),
            None => outcome,
        }
    }

    async fn refreshed_descriptor(
        &self,
        dest: &DataEntry,
    ) -> Option<common::ws_rpc::DataObjectDescriptor> {
        let object = match dest.kind() {
            DataObjectKind::Volume => self
                .ctx
                .catalog
                .volume(dest.object.id())
                .await
                .ok()?
                .map(DataObject::Volume),
            DataObjectKind::Snapshot => self
                .ctx
                .catalog
                .snapshot(dest.object.id())
                .await
                .ok()?
                .map(DataObject::Snapshot),
            DataObjectKind::Template => self
                .ctx
                .catalog
                .template(dest.object.id())
                .await
                .ok()?
                .map(DataObject::Template),
        }?;
        Some(DataEntry::new(object, dest.store.clone()).descriptor())
    }

    async fn revoke_quietly(&self, entry: &DataEntry, host: &HostEndpoint) {
        let driver = self.ctx.drivers.for_store(&entry.store);
        if let Err(e) = driver.revoke_access(entry, host).await {
            warn!(
                "回收访问失败（忽略）: volume={}, host={}, error={}",
                entry.object.uuid(),
                host.node_id,
                e
            );
        }
    }

    async fn send_copy(
        &self,
        host: &HostEndpoint,
        src: &DataEntry,
        dest: &DataEntry,
        wait_secs: u64,
        options: HashMap<String, String>,
    ) -> CopyOutcome {
        let command = AgentCommand::Copy(CopyObjectRequest {
            src: src.descriptor(),
            dest: dest.descriptor(),
            wait_secs,
            execute_in_sequence: self.ctx.config.execute_in_sequence,
            options,
        });
        match self.ctx.runner.send(&host.node_id, command).await {
            AgentAnswer::Copy(resp) if resp.success => match resp.new_object {
                Some(obj) => CopyOutcome::ok_with(resp.message, obj),
                None => CopyOutcome::ok(resp.message),
            },
            other => CopyOutcome::failed(other.message().to_string()),
        }
    }

    /// 重签名
    ///
    /// 阵列级克隆/快照暴露的新 LUN 仍带着源卷签名，使用前必须重写。
    /// 以目标存储 UUID 为键的进程级命名锁串行化，300 秒获取超时，
    /// 超时即硬失败不重试。除非调用方要求保留，否则结束时回收访问授权
    pub(crate) async fn resignature(
        &self,
        dest: &DataEntry,
        host: &HostEndpoint,
        keep_granted_access: bool,
    ) -> Result<ResignatureResponse> {
        let lock_key = format!("resignature-{}", dest.store.id);
        let _guard = locks::global()
            .acquire(&lock_key, Duration::from_secs(RESIGNATURE_LOCK_WAIT_SECS))
            .await?;

        let driver = self.ctx.drivers.for_store(&dest.store);
        driver.grant_access(dest, host).await?;

        let mut details = HashMap::new();
        details.insert("volume_uuid".to_string(), dest.object.uuid().to_string());
        if let Some(path) = dest.object.path() {
            details.insert("path".to_string(), path.to_string());
        }

        let answer = self
            .ctx
            .runner
            .send(
                &host.node_id,
                AgentCommand::Resignature(ResignatureRequest {
                    details,
                    wait_secs: self.ctx.config.storage_pool_max_wait_secs,
                }),
            )
            .await;

        let result = match answer {
            AgentAnswer::Resignature(resp) if resp.success => Ok(resp),
            other => Err(Error::Remote(format!("重签名失败: {}", other.message()))),
        };

        if !keep_granted_access || result.is_err() {
            self.revoke_quietly(dest, host).await;
        }

        result
    }

    // ------------------------------------------------------------------
    // 复制处理器
    // ------------------------------------------------------------------

    /// 快照 → 二级存储（出模板 / 快照备份）
    async fn copy_snapshot_to_secondary(&self, src: &DataEntry, dest: &DataEntry) -> CopyOutcome {
        if let Err(e) = self.dest_enter_creating(dest).await {
            return CopyOutcome::failed(format!("目标对象状态转换失败: {}", e));
        }

        let host = match self.ctx.selector.select(&src.store, &dest.store).await {
            Ok(Some(ep)) => ep,
            Ok(None) => {
                return self
                    .finish_dest(dest, CopyOutcome::failed("没有可用的远程执行端点"))
                    .await
            }
            Err(e) => return self.finish_dest(dest, CopyOutcome::failed(e.to_string())).await,
        };

        let driver = self.ctx.drivers.for_store(&src.store);
        if let Err(e) = driver.grant_access(src, &host).await {
            return self
                .finish_dest(dest, CopyOutcome::failed(format!("授予访问失败: {}", e)))
                .await;
        }

        let outcome = self
            .send_copy(
                &host,
                src,
                dest,
                self.ctx.config.backup_snapshot_wait_secs,
                HashMap::new(),
            )
            .await;

        self.revoke_quietly(src, &host).await;
        self.finish_dest(dest, outcome).await
    }

    /// 快照 → 卷：托管 → 托管
    async fn snapshot_managed_to_managed(&self, src: &DataEntry, dest: &DataEntry) -> CopyOutcome {
        self.snapshot_from_managed(src, dest).await
    }

    /// 快照 → 卷：托管 → 非托管
    async fn snapshot_managed_to_nonmanaged(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
    ) -> CopyOutcome {
        self.snapshot_from_managed(src, dest).await
    }

    /// 快照 → 卷：源在托管存储的公共路径
    async fn snapshot_from_managed(&self, src: &DataEntry, dest: &DataEntry) -> CopyOutcome {
        if let Err(e) = self.dest_enter_creating(dest).await {
            return CopyOutcome::failed(format!("目标对象状态转换失败: {}", e));
        }

        let host = match self.ctx.selector.select(&src.store, &dest.store).await {
            Ok(Some(ep)) => ep,
            Ok(None) => {
                return self
                    .finish_dest(dest, CopyOutcome::failed("没有可用的远程执行端点"))
                    .await
            }
            Err(e) => return self.finish_dest(dest, CopyOutcome::failed(e.to_string())).await,
        };

        // 同一托管池且阵列支持从快照建卷：阵列侧克隆 + 重签名
        if src.store.id == dest.store.id
            && capability::supports(&src.store, capability::CREATE_VOLUME_FROM_SNAPSHOT)
        {
            return self.clone_on_array_and_resignature(src, dest, &host).await;
        }

        let src_driver = self.ctx.drivers.for_store(&src.store);
        if let Err(e) = src_driver.grant_access(src, &host).await {
            return self
                .finish_dest(dest, CopyOutcome::failed(format!("授予访问失败: {}", e)))
                .await;
        }

        // 目标在托管池时需要先建阵列卷再授权
        let mut dest_granted = false;
        let mut outcome = if dest.store.managed {
            match self.create_dest_volume(dest, &host).await {
                Ok(_) => {
                    dest_granted = true;
                    self.send_copy(
                        &host,
                        src,
                        dest,
                        self.ctx.config.create_from_snapshot_wait_secs,
                        HashMap::new(),
                    )
                    .await
                }
                Err(e) => CopyOutcome::failed(e.to_string()),
            }
        } else {
            self.send_copy(
                &host,
                src,
                dest,
                self.ctx.config.create_from_snapshot_wait_secs,
                HashMap::new(),
            )
            .await
        };

        // 失败时回滚中途创建的阵列卷
        if !outcome.success && dest_granted {
            self.rollback_created_volume(dest, &host).await;
        }
        if dest_granted {
            self.revoke_quietly(dest, &host).await;
        }
        self.revoke_quietly(src, &host).await;

        outcome = self.finish_dest(dest, outcome).await;
        outcome
    }

    /// 快照 → 托管卷（源在非托管存储）
    async fn snapshot_to_managed(&self, src: &DataEntry, dest: &DataEntry) -> CopyOutcome {
        if let Err(e) = self.dest_enter_creating(dest).await {
            return CopyOutcome::failed(format!("目标对象状态转换失败: {}", e));
        }

        let host = match self.ctx.selector.select(&src.store, &dest.store).await {
            Ok(Some(ep)) => ep,
            Ok(None) => {
                return self
                    .finish_dest(dest, CopyOutcome::failed("没有可用的远程执行端点"))
                    .await
            }
            Err(e) => return self.finish_dest(dest, CopyOutcome::failed(e.to_string())).await,
        };

        let outcome = match self.create_dest_volume(dest, &host).await {
            Ok(_) => {
                let outcome = self
                    .send_copy(
                        &host,
                        src,
                        dest,
                        self.ctx.config.create_from_snapshot_wait_secs,
                        HashMap::new(),
                    )
                    .await;
                if !outcome.success {
                    self.rollback_created_volume(dest, &host).await;
                }
                self.revoke_quietly(dest, &host).await;
                outcome
            }
            Err(e) => CopyOutcome::failed(e.to_string()),
        };

        self.finish_dest(dest, outcome).await
    }

    /// 同池模板 → 卷：阵列侧克隆后重签名
    async fn clone_template_on_storage_system(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
    ) -> CopyOutcome {
        if let Err(e) = self.dest_enter_creating(dest).await {
            return CopyOutcome::failed(format!("目标对象状态转换失败: {}", e));
        }

        let host = match self.ctx.selector.select_for_store(&dest.store).await {
            Ok(Some(ep)) => ep,
            Ok(None) => {
                return self
                    .finish_dest(dest, CopyOutcome::failed("没有可用的远程执行端点"))
                    .await
            }
            Err(e) => return self.finish_dest(dest, CopyOutcome::failed(e.to_string())).await,
        };

        self.clone_on_array_and_resignature(src, dest, &host).await
    }

    /// 阵列侧克隆 + 重签名的共同路径
    ///
    /// 克隆期间目标卷带 clone_source_uuid 临时标记，
    /// 无论成败都在本次操作内清除
    async fn clone_on_array_and_resignature(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        host: &HostEndpoint,
    ) -> CopyOutcome {
        let dest_driver = self.ctx.drivers.for_store(&dest.store);
        try_update_qos(&dest_driver, dest, QosState::Migration).await;

        let dest_ref = dest.object.object_ref();
        if let Err(e) = self
            .ctx
            .catalog
            .set_detail(&dest_ref, DETAIL_CLONE_SOURCE, src.object.uuid())
            .await
        {
            warn!("克隆标记写入失败（忽略）: {}", e);
        }

        let outcome = self.clone_and_resignature_inner(src, dest, host).await;

        if let Err(e) = self.ctx.catalog.remove_detail(&dest_ref, DETAIL_CLONE_SOURCE).await {
            warn!("克隆标记清理失败（忽略）: {}", e);
        }
        try_update_qos(&dest_driver, dest, QosState::NoMigration).await;

        outcome
    }

    async fn clone_and_resignature_inner(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        host: &HostEndpoint,
    ) -> CopyOutcome {
        let mut options = HashMap::new();
        options.insert(OPTION_CLONE_ON_ARRAY.to_string(), "true".to_string());

        let clone_outcome = self
            .send_copy(
                host,
                src,
                dest,
                self.ctx.config.create_from_snapshot_wait_secs,
                options,
            )
            .await;
        if !clone_outcome.success {
            return self.finish_dest(dest, clone_outcome).await;
        }

        // 克隆产物的路径进入目标条目后再重签名
        let mut cloned = dest.clone();
        if let Some(obj) = &clone_outcome.new_object {
            if let (DataObject::Volume(v), Some(path)) = (&mut cloned.object, obj.path.clone()) {
                v.path = Some(path);
            }
        }

        match self.resignature(&cloned, host, false).await {
            Ok(resp) => {
                let mut outcome = CopyOutcome::ok(resp.message.clone());
                let mut desc = cloned.descriptor();
                if let Some(p) = resp.new_path {
                    desc.path = Some(p);
                }
                if let Some(s) = resp.new_size_gb {
                    desc.size_gb = s;
                }
                outcome.new_object = Some(desc);
                self.finish_dest(dest, outcome).await
            }
            Err(e) => {
                // 克隆出来的卷不可用，回滚
                self.rollback_created_volume(&cloned, host).await;
                self.finish_dest(dest, CopyOutcome::failed(e.to_string())).await
            }
        }
    }

    /// 在目标池上创建阵列卷并授权宿主机
    ///
    /// 建卷产物的路径在收尾转换时随复制应答统一落盘
    async fn create_dest_volume(&self, dest: &DataEntry, host: &HostEndpoint) -> Result<()> {
        let driver = self.ctx.drivers.for_store(&dest.store);
        let created = driver.create_object(dest).await?;
        if let Some(path) = &created.path {
            info!("阵列卷已创建: volume={}, path={}", dest.object.uuid(), path);
        }
        driver.grant_access(dest, host).await?;
        Ok(())
    }

    /// 回滚中途创建的卷数据（尽力而为）
    async fn rollback_created_volume(&self, dest: &DataEntry, _host: &HostEndpoint) {
        let driver = self.ctx.drivers.for_store(&dest.store);
        if let Err(e) = driver.delete_object(dest).await {
            warn!(
                "回滚中途创建的卷失败（忽略）: volume={}, error={}",
                dest.object.uuid(),
                e
            );
        }
    }

    // ------------------------------------------------------------------
    // 迁移中卷 → 卷 的四象限
    // ------------------------------------------------------------------

    /// 托管 → 非托管：授权源卷后经宿主机整卷复制
    async fn migrate_managed_to_nonmanaged(&self, src: &DataEntry, dest: &DataEntry) -> CopyOutcome {
        if let Err(e) = self.dest_enter_creating(dest).await {
            return CopyOutcome::failed(format!("目标对象状态转换失败: {}", e));
        }

        let host = match self.ctx.selector.select(&src.store, &dest.store).await {
            Ok(Some(ep)) => ep,
            Ok(None) => {
                return self
                    .finish_dest(dest, CopyOutcome::failed("没有可用的远程执行端点"))
                    .await
            }
            Err(e) => return self.finish_dest(dest, CopyOutcome::failed(e.to_string())).await,
        };

        let src_driver = self.ctx.drivers.for_store(&src.store);
        try_update_qos(&src_driver, src, QosState::Migration).await;

        let outcome = match src_driver.grant_access(src, &host).await {
            Ok(_) => {
                let outcome = self
                    .send_copy(
                        &host,
                        src,
                        dest,
                        self.ctx.config.copy_volume_wait_secs,
                        HashMap::new(),
                    )
                    .await;
                self.revoke_quietly(src, &host).await;
                outcome
            }
            Err(e) => CopyOutcome::failed(format!("授予访问失败: {}", e)),
        };

        try_update_qos(&src_driver, src, QosState::NoMigration).await;
        self.finish_dest(dest, outcome).await
    }

    /// 非托管 → 托管：先建阵列卷再整卷复制
    async fn migrate_nonmanaged_to_managed(&self, src: &DataEntry, dest: &DataEntry) -> CopyOutcome {
        if let Err(e) = self.dest_enter_creating(dest).await {
            return CopyOutcome::failed(format!("目标对象状态转换失败: {}", e));
        }

        let host = match self.ctx.selector.select(&src.store, &dest.store).await {
            Ok(Some(ep)) => ep,
            Ok(None) => {
                return self
                    .finish_dest(dest, CopyOutcome::failed("没有可用的远程执行端点"))
                    .await
            }
            Err(e) => return self.finish_dest(dest, CopyOutcome::failed(e.to_string())).await,
        };

        let dest_driver = self.ctx.drivers.for_store(&dest.store);
        try_update_qos(&dest_driver, dest, QosState::Migration).await;

        let outcome = match self.create_dest_volume(dest, &host).await {
            Ok(_) => {
                let outcome = self
                    .send_copy(
                        &host,
                        src,
                        dest,
                        self.ctx.config.copy_volume_wait_secs,
                        HashMap::new(),
                    )
                    .await;
                if !outcome.success {
                    self.rollback_created_volume(dest, &host).await;
                }
                self.revoke_quietly(dest, &host).await;
                outcome
            }
            Err(e) => CopyOutcome::failed(e.to_string()),
        };

        try_update_qos(&dest_driver, dest, QosState::NoMigration).await;
        self.finish_dest(dest, outcome).await
    }

    /// 托管 → 托管：经二级存储两段复制
    async fn migrate_managed_via_secondary(&self, src: &DataEntry, dest: &DataEntry) -> CopyOutcome {
        if let Err(e) = self.dest_enter_creating(dest).await {
            return CopyOutcome::failed(format!("目标对象状态转换失败: {}", e));
        }
        match self.migrate_managed_via_secondary_inner(src, dest).await {
            Ok(outcome) => self.finish_dest(dest, outcome).await,
            Err(e) => self.finish_dest(dest, CopyOutcome::failed(e.to_string())).await,
        }
    }

    async fn migrate_managed_via_secondary_inner(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
    ) -> Result<CopyOutcome> {
        let image_pool = match self.ctx.catalog.image_stores().await?.into_iter().next() {
            Some(p) => p,
            None => return Ok(CopyOutcome::failed("没有可用的二级存储进行中转")),
        };
        let image_store = DataStore::from_pool(&image_pool);

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
        let mid_entry = DataEntry::new(DataObject::Volume(mid), image_store.clone());

        // 段一：源阵列卷 → 二级存储
        let src_driver = self.ctx.drivers.for_store(&src.store);
        let host_in = self
            .ctx
            .selector
            .select(&src.store, &image_store)
            .await?
            .ok_or_else(|| Error::Remote("没有可触达二级存储的端点".to_string()))?;
        src_driver.grant_access(src, &host_in).await?;
        let inbound = self
            .send_copy(
                &host_in,
                src,
                &mid_entry,
                self.ctx.config.copy_volume_wait_secs,
                HashMap::new(),
            )
            .await;
        self.revoke_quietly(src, &host_in).await;

        if !inbound.success {
            self.ctx
                .catalog
                .transition(&mid_ref, ObjectEvent::OperationFailed, ObjectChanges::none())
                .await
                .ok();
            self.ctx.catalog.expunge(&mid_ref).await.ok();
            return Ok(CopyOutcome::failed(format!("拷入二级存储失败: {}", inbound.message)));
        }
        let mut mid_changes = ObjectChanges::none();
        mid_changes.path = inbound.new_object.as_ref().and_then(|o| o.path.clone());
        self.ctx
            .catalog
            .transition(&mid_ref, ObjectEvent::OperationSucceeded, mid_changes)
            .await?;

        // 段二：二级存储 → 目标阵列卷
        let host_out = self
            .ctx
            .selector
            .select(&image_store, &dest.store)
            .await?
            .ok_or_else(|| Error::Remote("没有可触达目标池的端点".to_string()))?;

        self.ctx
            .catalog
            .transition(&mid_ref, ObjectEvent::CopyRequested, ObjectChanges::none())
            .await?;

        let outcome = match self.create_dest_volume(dest, &host_out).await {
            Ok(_) => {
                let outcome = self
                    .send_copy(
                        &host_out,
                        &mid_entry,
                        dest,
                        self.ctx.config.copy_volume_wait_secs,
                        HashMap::new(),
                    )
                    .await;
                if !outcome.success {
                    self.rollback_created_volume(dest, &host_out).await;
                }
                self.revoke_quietly(dest, &host_out).await;
                outcome
            }
            Err(e) => CopyOutcome::failed(e.to_string()),
        };

        let mid_event = if outcome.success {
            ObjectEvent::OperationSucceeded
        } else {
            ObjectEvent::OperationFailed
        };
        self.ctx
            .catalog
            .transition(&mid_ref, mid_event, ObjectChanges::none())
            .await
            .ok();

        // 中间副本用完即清
        if let Err(e) = self
            .ctx
            .drivers
            .for_store(&image_store)
            .delete_object(&mid_entry)
            .await
        {
            warn!("中间对象数据清理失败（忽略）: {}", e);
        }
        self.ctx.catalog.expunge(&mid_ref).await.ok();

        Ok(outcome)
    }
}

#[async_trait]
impl DataMotionStrategy for StorageSystemStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn can_handle(&self, src: &DataEntry, dest: &DataEntry) -> StrategyPriority {
        let snapshot_involved =
            src.kind() == DataObjectKind::Snapshot || dest.kind() == DataObjectKind::Snapshot;
        if snapshot_involved
            && (capability::supports(&src.store, capability::STORAGE_SYSTEM_SNAPSHOT)
                || capability::supports(&dest.store, capability::STORAGE_SYSTEM_SNAPSHOT))
        {
            return StrategyPriority::Highest;
        }

        if src.kind() == DataObjectKind::Template
            && dest.kind() == DataObjectKind::Volume
            && src.store.id == dest.store.id
            && capability::supports(&src.store, capability::CREATE_VOLUME_FROM_VOLUME)
        {
            return StrategyPriority::Highest;
        }

        let volume_on_managed = |e: &DataEntry| e.kind() == DataObjectKind::Volume && e.store.managed;
        if volume_on_managed(src) || volume_on_managed(dest) {
            return StrategyPriority::Highest;
        }

        StrategyPriority::CantHandle
    }

    async fn can_handle_vm(&self, job: &VmStorageMigrationJob) -> StrategyPriority {
        self.hooks.vm_priority(job)
    }

    async fn copy(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        _dest_host: Option<&HostEndpoint>,
    ) -> CopyOutcome {
        info!(
            "存储系统策略复制: src={}({:?}), dest={}({:?})",
            src.object.uuid(),
            src.kind(),
            dest.object.uuid(),
            dest.kind()
        );

        match (src.kind(), dest.kind()) {
            (DataObjectKind::Snapshot, DataObjectKind::Template)
            | (DataObjectKind::Snapshot, DataObjectKind::Snapshot)
                if matches!(dest.store.role, StoreRole::Image | StoreRole::ImageCache) =>
            {
                self.copy_snapshot_to_secondary(src, dest).await
            }
            (DataObjectKind::Snapshot, DataObjectKind::Volume) => {
                match (src.store.managed, dest.store.managed) {
                    (true, true) => self.snapshot_managed_to_managed(src, dest).await,
                    (true, false) => self.snapshot_managed_to_nonmanaged(src, dest).await,
                    (false, true) => self.snapshot_to_managed(src, dest).await,
                    (false, false) => CopyOutcome::failed(
                        "快照与卷均不在托管存储上，应由通用策略处理",
                    ),
                }
            }
            (DataObjectKind::Template, DataObjectKind::Volume)
                if src.store.id == dest.store.id =>
            {
                self.clone_template_on_storage_system(src, dest).await
            }
            (DataObjectKind::Volume, DataObjectKind::Volume)
                if src.object.state() == ObjectState::Migrating =>
            {
                match (src.store.managed, dest.store.managed) {
                    (true, true) => self.migrate_managed_via_secondary(src, dest).await,
                    (true, false) => self.migrate_managed_to_nonmanaged(src, dest).await,
                    (false, true) => self.migrate_nonmanaged_to_managed(src, dest).await,
                    (false, false) => CopyOutcome::failed(
                        "非托管池之间的迁移由通用策略处理",
                    ),
                }
            }
            _ => CopyOutcome::failed("存储系统策略不支持的复制组合"),
        }
    }

    async fn migrate_vm(&self, job: &VmStorageMigrationJob) -> CopyOutcome {
        vm_migration::execute(&self.ctx, self.hooks.as_ref(), job).await
    }
}

/// 磁盘格式的兜底判定
pub(crate) fn disk_format_or_default(format: Option<DiskFormat>) -> DiskFormat {
    format.unwrap_or(DiskFormat::Qcow2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::testkit;

    fn entry(pool: crate::db::models::storage_pool::Model, object: DataObject) -> DataEntry {
        DataEntry::new(object, DataStore::from_pool(&pool))
    }

    #[tokio::test]
    async fn test_can_handle_snapshot_capability() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(None);
        let strategy =
            StorageSystemStrategy::new(testkit::context(catalog, runner, selector));

        let cap_pool = testkit::pool_builder("p1")
            .capability(capability::STORAGE_SYSTEM_SNAPSHOT, "true")
            .build();
        let plain_pool = testkit::pool_builder("p2").build();

        let snap = entry(
            cap_pool,
            DataObject::Snapshot(testkit::snapshot_builder("s1", "v1", "p1").build()),
        );
        let vol = entry(
            plain_pool,
            DataObject::Volume(testkit::volume_builder("v2", "p2").build()),
        );

        assert_eq!(strategy.can_handle(&snap, &vol).await, StrategyPriority::Highest);
        // 反向也成立：能力在任一端即可
        assert_eq!(strategy.can_handle(&vol, &snap).await, StrategyPriority::Highest);
    }

    #[tokio::test]
    async fn test_can_handle_managed_volume() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(None);
        let strategy =
            StorageSystemStrategy::new(testkit::context(catalog, runner, selector));

        let managed = testkit::managed_volume_entry("v1", "p1");
        let plain = testkit::volume_entry_on_nfs("v2", "p2");

        assert_eq!(strategy.can_handle(&managed, &plain).await, StrategyPriority::Highest);
        assert_eq!(strategy.can_handle(&plain, &plain).await, StrategyPriority::CantHandle);
    }

    /// 托管 → 非托管、源卷处于迁移中：
    /// 走 managed→non-managed 处理器，成功后返回重新拉取的目录描述
    #[tokio::test]
    async fn test_migrating_managed_to_nonmanaged_refreshes_dest() {
        let catalog = testkit::memory_catalog();
        let src_pool = testkit::pool_builder("p1").pool_type("iscsi").managed(true).build();
        let dest_pool = testkit::pool_builder("p2").pool_type("nfs").build();
        catalog.add_pool(src_pool.clone()).await;
        catalog.add_pool(dest_pool.clone()).await;

        let src_vol = testkit::volume_builder("v1", "p1").state("migrating").build();
        let dest_vol = testkit::volume_builder("v2", "p2").state("allocated").no_path().build();
        catalog.add_volume(src_vol.clone()).await;
        catalog.add_volume(dest_vol.clone()).await;

        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n1")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);
        let strategy = StorageSystemStrategy::new(ctx);

        let src = entry(src_pool, DataObject::Volume(src_vol));
        let dest = entry(dest_pool, DataObject::Volume(dest_vol));

        let outcome = strategy.copy(&src, &dest, None).await;
        assert!(outcome.success, "失败: {}", outcome.message);

        // 授权（add）与回收（remove）都发生了
        let sent = runner.sent();
        let adds = sent
            .iter()
            .filter(|(_, c)| matches!(c, AgentCommand::ModifyTargets(r) if r.add))
            .count();
        let removes = sent
            .iter()
            .filter(|(_, c)| matches!(c, AgentCommand::ModifyTargets(r) if !r.add))
            .count();
        assert_eq!(adds, 1);
        assert_eq!(removes, 1);

        // 返回的是重新拉取的目录描述
        let desc = outcome.new_object.expect("应带回目标描述");
        assert_eq!(desc.id, "v2");
        assert_eq!(desc.state, "ready");

        let persisted = catalog.volume("v2").await.unwrap().unwrap();
        assert_eq!(persisted.state, "ready");
    }

    #[tokio::test]
    async fn test_nonmanaged_pair_rejected() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(None);
        let strategy =
            StorageSystemStrategy::new(testkit::context(catalog, runner, selector));

        let src_pool = testkit::pool_builder("p1").pool_type("nfs").build();
        let dest_pool = testkit::pool_builder("p2").pool_type("nfs").build();
        let src = entry(
            src_pool,
            DataObject::Snapshot(testkit::snapshot_builder("s1", "v1", "p1").build()),
        );
        let dest = entry(
            dest_pool,
            DataObject::Volume(testkit::volume_builder("v2", "p2").state("allocated").build()),
        );

        let outcome = strategy.copy(&src, &dest, None).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("通用策略"));
    }

    /// 同池模板 → 卷：阵列侧克隆 + 重签名，
    /// 临时克隆标记在操作结束时清除
    #[tokio::test]
    async fn test_template_clone_on_array_resignatures_and_clears_marker() {
        let catalog = testkit::memory_catalog();
        let pool = testkit::pool_builder("p1")
            .pool_type("iscsi")
            .managed(true)
            .capability(capability::CREATE_VOLUME_FROM_VOLUME, "true")
            .build();
        catalog.add_pool(pool.clone()).await;

        let tmpl = testkit::template_builder("t1", "p1").build();
        let dest_vol = testkit::volume_builder("v1", "p1").state("allocated").no_path().build();
        catalog.add_template(tmpl.clone()).await;
        catalog.add_volume(dest_vol.clone()).await;

        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n1")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);
        let strategy = StorageSystemStrategy::new(ctx);

        let src = entry(pool.clone(), DataObject::Template(tmpl));
        let dest = entry(pool, DataObject::Volume(dest_vol));
        assert_eq!(strategy.can_handle(&src, &dest).await, StrategyPriority::Highest);

        let outcome = strategy.copy(&src, &dest, None).await;
        assert!(outcome.success, "失败: {}", outcome.message);

        // 克隆命令携带 clone_on_array 选项，随后重签名
        let sent = runner.sent();
        match &sent[0].1 {
            AgentCommand::Copy(req) => {
                assert_eq!(req.options.get(OPTION_CLONE_ON_ARRAY).map(|s| s.as_str()), Some("true"));
            }
            other => panic!("期望 Copy，收到 {}", other.method()),
        }
        assert!(sent.iter().any(|(_, c)| matches!(c, AgentCommand::Resignature(_))));

        // 临时克隆标记已清除，目标就绪
        let marker = catalog
            .get_detail(&ObjectRef::volume("v1"), DETAIL_CLONE_SOURCE)
            .await
            .unwrap();
        assert!(marker.is_none());
        let persisted = catalog.volume("v1").await.unwrap().unwrap();
        assert_eq!(persisted.state, "ready");
    }

    #[tokio::test]
    async fn test_resignature_revokes_unless_kept() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n1")));
        let strategy = StorageSystemStrategy::new(testkit::context(
            catalog.clone(),
            runner.clone(),
            selector,
        ));

        let dest = testkit::managed_volume_entry("v1", "resig-p1");
        let host = testkit::host_endpoint("n1");

        let resp = strategy.resignature(&dest, &host, false).await.unwrap();
        assert!(resp.success);

        let sent = runner.sent();
        // grant → resignature → revoke 的顺序
        assert!(matches!(sent[0].1, AgentCommand::ModifyTargets(ref r) if r.add));
        assert!(matches!(sent[1].1, AgentCommand::Resignature(_)));
        assert!(matches!(sent[2].1, AgentCommand::ModifyTargets(ref r) if !r.add));

        // keep_granted_access: 成功后不回收
        let runner2 = testkit::scripted_runner();
        let selector2 = testkit::fixed_selector(Some(testkit::host_endpoint("n1")));
        let strategy2 = StorageSystemStrategy::new(testkit::context(
            testkit::memory_catalog(),
            runner2.clone(),
            selector2,
        ));
        let dest2 = testkit::managed_volume_entry("v2", "resig-p2");
        strategy2.resignature(&dest2, &host, true).await.unwrap();
        let sent2 = runner2.sent();
        assert_eq!(sent2.len(), 2, "保留授权时不应出现 remove");
    }
}
