/// 数据迁移服务门面
///
/// 复制/迁移的统一入口：驱动原生复制优先于一切策略；
/// 其次按优先级选择策略；选不出策略时先做补偿清理再报失败。
/// 每个入口恰好返回一个结果，从不抛出

use std::sync::Arc;
use tracing::{info, warn};

use common::models::DataObjectKind;
use common::{Error, Result};

use crate::app_state::AppState;

use super::catalog::{DbCatalog, MotionCatalog, ObjectChanges};
use super::cache::CacheManager;
use super::driver::{DriverRegistry, StoreDriver};
use super::endpoint::{DbEndpointSelector, HostEndpoint};
use super::generic::GenericMotionStrategy;
use super::kvm::KvmMigrationHooks;
use super::lifecycle::{ObjectEvent, ObjectState};
use super::object::{DataEntry, DataObject, DataStore};
use super::runner::AgentCommandRunner;
use super::storage_system::StorageSystemStrategy;
use super::strategy::{
    CopyOutcome, DataMotionStrategy, StrategyRegistry, VmStorageMigrationJob,
};
use super::{MotionConfig, MotionContext};

pub struct DataMotionService {
    ctx: Arc<MotionContext>,
    registry: StrategyRegistry,
}

impl DataMotionService {
    /// 生产装配：目录、命令通道、端点选择器均接真实实现
    pub fn from_state(state: &AppState) -> Self {
        let catalog: Arc<dyn MotionCatalog> = Arc::new(DbCatalog::new(state.sea_db()));
        let runner = Arc::new(AgentCommandRunner::new(state.agent_manager()));
        let selector = Arc::new(DbEndpointSelector::new(
            state.sea_db(),
            state.agent_manager(),
        ));
        let config = MotionConfig::from(state.config().as_ref());

        let cache = Arc::new(CacheManager::new(
            catalog.clone(),
            runner.clone(),
            selector.clone(),
            config.clone(),
        ));
        let drivers = Arc::new(DriverRegistry::new(
            runner.clone(),
            selector.clone(),
            catalog.clone(),
            config.clone(),
        ));

        let ctx = Arc::new(MotionContext {
            catalog,
            runner,
            selector,
            cache,
            drivers,
            config,
        });
        Self::with_context(ctx)
    }

    /// 既定上下文装配（测试经此注入替身）
    ///
    /// 注册顺序即并列优先级的决胜顺序：
    /// 存储系统策略（阵列钩子）→ 同策略（KVM 钩子）→ 通用兜底
    pub fn with_context(ctx: Arc<MotionContext>) -> Self {
        let strategies: Vec<Arc<dyn DataMotionStrategy>> = vec![
            Arc::new(StorageSystemStrategy::new(ctx.clone())),
            Arc::new(StorageSystemStrategy::with_hooks(
                ctx.clone(),
                Arc::new(KvmMigrationHooks),
                "kvm-storage",
            )),
            Arc::new(GenericMotionStrategy::new(ctx.clone())),
        ];
        Self::with_strategies(ctx, strategies)
    }

    pub fn with_strategies(
        ctx: Arc<MotionContext>,
        strategies: Vec<Arc<dyn DataMotionStrategy>>,
    ) -> Self {
        Self {
            ctx,
            registry: StrategyRegistry::new(strategies),
        }
    }

    pub fn context(&self) -> &Arc<MotionContext> {
        &self.ctx
    }

    /// 按 ID 装载复制端点（对象 + 其所在存储）
    pub async fn load_entry(&self, kind: DataObjectKind, id: &str) -> Result<DataEntry> {
        let object = match kind {
            DataObjectKind::Volume => self
                .ctx
                .catalog
                .volume(id)
                .await?
                .map(DataObject::Volume)
                .ok_or_else(|| Error::NotFound(format!("存储卷不存在: {}", id)))?,
            DataObjectKind::Snapshot => self
                .ctx
                .catalog
                .snapshot(id)
                .await?
                .map(DataObject::Snapshot)
                .ok_or_else(|| Error::NotFound(format!("快照不存在: {}", id)))?,
            DataObjectKind::Template => self
                .ctx
                .catalog
                .template(id)
                .await?
                .map(DataObject::Template)
                .ok_or_else(|| Error::NotFound(format!("模板不存在: {}", id)))?,
        };

        let pool = self
            .ctx
            .catalog
            .pool(object.pool_id())
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("找不到数据存储: pool={}", object.pool_id()))
            })?;

        Ok(DataEntry::new(object, DataStore::from_pool(&pool)))
    }

    /// 按节点 ID 装载执行端点
    pub async fn load_host(&self, node_id: &str) -> Result<HostEndpoint> {
        let node = self
            .ctx
            .catalog
            .node(node_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("节点不存在: {}", node_id)))?;
        Ok(HostEndpoint::from_node(&node))
    }

    /// 复制入口
    ///
    /// 1. 驱动声明可直接复制 → 原生短路，策略全部旁路
    /// 2. 策略注册表按优先级选择
    /// 3. 无策略匹配 → 补偿清理后报失败
    pub async fn copy(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        dest_host: Option<&HostEndpoint>,
    ) -> CopyOutcome {
        let src_driver = self.ctx.drivers.for_store(&src.store);
        let dest_driver = self.ctx.drivers.for_store(&dest.store);
        if src_driver.can_copy(src, dest) || dest_driver.can_copy(src, dest) {
            info!(
                "驱动原生复制: src={}, dest={}",
                src.object.uuid(),
                dest.object.uuid()
            );
            return self.copy_native(src, dest).await;
        }

        match self.registry.select(src, dest).await {
            Some(strategy) => {
                info!(
                    "策略已选定: strategy={}, src={}, dest={}",
                    strategy.name(),
                    src.object.uuid(),
                    dest.object.uuid()
                );
                strategy.copy(src, dest, dest_host).await
            }
            None => {
                warn!(
                    "无策略可处理: src={}, dest={}",
                    src.object.uuid(),
                    dest.object.uuid()
                );
                self.cleanup_failed_migration(src, dest).await;
                CopyOutcome::failed("未找到可用的数据迁移策略")
            }
        }
    }

    /// 驱动原生复制（事件环绕与策略路径一致）
    async fn copy_native(&self, src: &DataEntry, dest: &DataEntry) -> CopyOutcome {
        if dest.object.state() == ObjectState::Allocated {
            if let Err(e) = self
                .ctx
                .catalog
                .transition(
                    &dest.object.object_ref(),
                    ObjectEvent::CreateRequested,
                    ObjectChanges::none(),
                )
                .await
            {
                return CopyOutcome::failed(format!("目标对象状态转换失败: {}", e));
            }
        }

        let driver = if self.ctx.drivers.for_store(&src.store).can_copy(src, dest) {
            self.ctx.drivers.for_store(&src.store)
        } else {
            self.ctx.drivers.for_store(&dest.store)
        };
        let outcome = driver.copy(src, dest).await;

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
        if let Err(e) = self
            .ctx
            .catalog
            .transition(&dest.object.object_ref(), event, changes)
            .await
        {
            warn!("目标对象状态收尾失败（忽略）: {}", e);
        }

        outcome
    }

    /// 整机存储迁移入口（主机对重载）
    pub async fn migrate_vm_storage(&self, job: &VmStorageMigrationJob) -> CopyOutcome {
        match self.registry.select_for_vm(job).await {
            Some(strategy) => {
                info!(
                    "整机迁移策略已选定: strategy={}, vm={}",
                    strategy.name(),
                    job.vm.name
                );
                strategy.migrate_vm(job).await
            }
            None => {
                let uuids: Vec<String> = job
                    .placements
                    .iter()
                    .map(|p| p.source.object.uuid().to_string())
                    .collect();
                CopyOutcome::failed(format!(
                    "未找到能处理整机存储迁移的策略: volumes=[{}]",
                    uuids.join(", ")
                ))
            }
        }
    }

    /// 无策略匹配时的离线迁移补偿
    ///
    /// 源卷未发生任何数据移动：复位就绪；
    /// 目标卷还是空记录：销毁并打删除标记，目录不残留在途状态
    async fn cleanup_failed_migration(&self, src: &DataEntry, dest: &DataEntry) {
        if src.kind() == DataObjectKind::Volume && src.object.state() == ObjectState::Migrating {
            if let Err(e) = self
                .ctx
                .catalog
                .transition(
                    &src.object.object_ref(),
                    ObjectEvent::OperationSucceeded,
                    ObjectChanges::none(),
                )
                .await
            {
                warn!("源卷复位失败（忽略）: {}", e);
            }
        }

        if dest.kind() == DataObjectKind::Volume && dest.object.id() != src.object.id() {
            let dest_ref = dest.object.object_ref();
            self.ctx
                .catalog
                .transition(&dest_ref, ObjectEvent::DestroyRequested, ObjectChanges::none())
                .await
                .ok();
            self.ctx
                .catalog
                .transition(&dest_ref, ObjectEvent::OperationSucceeded, ObjectChanges::none())
                .await
                .ok();
            if let Err(e) = self.ctx.catalog.expunge(&dest_ref).await {
                warn!("目标卷删除标记写入失败（忽略）: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::capability;
    use crate::motion::testkit;

    fn entry(pool: crate::db::models::storage_pool::Model, object: DataObject) -> DataEntry {
        DataEntry::new(object, DataStore::from_pool(&pool))
    }

    #[tokio::test]
    async fn test_native_copy_bypasses_strategies() {
        let catalog = testkit::memory_catalog();
        let pool_a = testkit::pool_builder("p1")
            .pool_type("ceph")
            .capability(capability::NATIVE_COPY, "true")
            .build();
        let pool_b = testkit::pool_builder("p2")
            .pool_type("ceph")
            .capability(capability::NATIVE_COPY, "true")
            .build();
        catalog.add_pool(pool_a.clone()).await;
        catalog.add_pool(pool_b.clone()).await;

        let src_vol = testkit::volume_builder("v1", "p1").build();
        let dest_vol = testkit::volume_builder("v2", "p2").state("allocated").build();
        catalog.add_volume(src_vol.clone()).await;
        catalog.add_volume(dest_vol.clone()).await;

        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n1")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);
        // 注册表为空：只有原生短路能成功
        let service = DataMotionService::with_strategies(ctx, Vec::new());

        let src = entry(pool_a, DataObject::Volume(src_vol));
        let dest = entry(pool_b, DataObject::Volume(dest_vol));

        let outcome = service.copy(&src, &dest, None).await;
        assert!(outcome.success, "原生短路应绕过策略注册表: {}", outcome.message);

        let dest_row = catalog.volume("v2").await.unwrap().unwrap();
        assert_eq!(dest_row.state, "ready");
    }

    #[tokio::test]
    async fn test_no_strategy_runs_cleanup_and_fails_once() {
        let catalog = testkit::memory_catalog();
        let src_pool = testkit::pool_builder("p1").pool_type("lvm").build();
        let dest_pool = testkit::pool_builder("p2").pool_type("lvm").build();
        catalog.add_pool(src_pool.clone()).await;
        catalog.add_pool(dest_pool.clone()).await;

        let src_vol = testkit::volume_builder("v1", "p1").state("migrating").build();
        let dest_vol = testkit::volume_builder("v2", "p2").state("allocated").build();
        catalog.add_volume(src_vol.clone()).await;
        catalog.add_volume(dest_vol.clone()).await;

        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(None);
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);
        let service = DataMotionService::with_strategies(ctx, Vec::new());

        let src = entry(src_pool, DataObject::Volume(src_vol));
        let dest = entry(dest_pool, DataObject::Volume(dest_vol));

        let outcome = service.copy(&src, &dest, None).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("未找到可用的数据迁移策略"));

        // 补偿：源卷复位就绪，目标卷打删除标记
        let src_row = catalog.volume("v1").await.unwrap().unwrap();
        assert_eq!(src_row.state, "ready");
        assert!(src_row.removed_at.is_none());

        let dest_row = catalog.volume("v2").await.unwrap().unwrap();
        assert!(dest_row.removed_at.is_some());
    }

    #[tokio::test]
    async fn test_strategy_dispatch_prefers_storage_system() {
        let catalog = testkit::memory_catalog();
        let managed_pool = testkit::pool_builder("p1").pool_type("iscsi").managed(true).build();
        let plain_pool = testkit::pool_builder("p2").pool_type("nfs").build();
        catalog.add_pool(managed_pool.clone()).await;
        catalog.add_pool(plain_pool.clone()).await;

        let src_vol = testkit::volume_builder("v1", "p1").state("migrating").build();
        let dest_vol = testkit::volume_builder("v2", "p2").state("allocated").no_path().build();
        catalog.add_volume(src_vol.clone()).await;
        catalog.add_volume(dest_vol.clone()).await;

        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n1")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);
        let service = DataMotionService::with_context(ctx);

        let src = entry(managed_pool, DataObject::Volume(src_vol));
        let dest = entry(plain_pool, DataObject::Volume(dest_vol));

        // 托管源 → 存储系统策略接手（managed→non-managed 处理器）
        let outcome = service.copy(&src, &dest, None).await;
        assert!(outcome.success, "失败: {}", outcome.message);

        // 出现了授权/回收命令即证明走的是存储系统策略
        let grants = runner
            .sent()
            .iter()
            .filter(|(_, c)| c.method() == "modify_targets")
            .count();
        assert_eq!(grants, 2);
    }

    #[tokio::test]
    async fn test_missing_store_fails_fast() {
        let catalog = testkit::memory_catalog();
        // 卷存在但池不在目录里
        let vol = testkit::volume_builder("v1", "ghost-pool").build();
        catalog.add_volume(vol).await;

        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(None);
        let ctx = testkit::context(catalog, runner, selector);
        let service = DataMotionService::with_context(ctx);

        let err = service
            .load_entry(DataObjectKind::Volume, "v1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("找不到数据存储"));
    }

    #[tokio::test]
    async fn test_vm_migration_without_strategy_lists_volumes() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(None);
        let ctx = testkit::context(catalog, runner, selector);
        let service = DataMotionService::with_strategies(ctx, Vec::new());

        let pool = testkit::pool_builder("p1").pool_type("nfs").build();
        let job = VmStorageMigrationJob {
            vm: testkit::vm_model("vm1", "vm-01", "n1", "linux"),
            src_host: testkit::host_endpoint("n1"),
            dest_host: testkit::host_endpoint("n2"),
            placements: vec![crate::motion::strategy::VolumePlacement {
                source: DataEntry::new(
                    DataObject::Volume(testkit::volume_builder("v1", "p1").uuid("uuid-v1").build()),
                    DataStore::from_pool(&pool),
                ),
                dest_store: DataStore::from_pool(&pool),
            }],
        };

        let outcome = service.migrate_vm_storage(&job).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("uuid-v1"), "失败消息应列出受影响卷");
    }
}
