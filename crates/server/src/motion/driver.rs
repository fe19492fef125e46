/// 存储驱动
///
/// 按池的 managed 标志选择驱动：
/// 通用驱动面向共享文件系统/逻辑卷池，访问授权是空操作；
/// 托管阵列驱动面向按卷寻址的阵列池，授权即为宿主机增删 iSCSI 目标

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use common::ws_rpc::{
    CopyObjectRequest, CreateObjectRequest, CreateObjectResponse, DeleteObjectRequest,
    ModifyTargetsRequest, TargetDescriptor,
};
use common::{Error, Result};

use super::capability;
use super::catalog::MotionCatalog;
use super::endpoint::{EndpointSelector, HostEndpoint};
use super::object::{DataEntry, DataObject, DataStore};
use super::runner::{AgentAnswer, AgentCommand, CommandRunner};
use super::strategy::CopyOutcome;
use super::MotionConfig;

/// 托管卷的限速档位
///
/// 迁移期间临时抬高 IO 配额，结束后必须复位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosState {
    Migration,
    NoMigration,
}

impl QosState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QosState::Migration => "migration",
            QosState::NoMigration => "no_migration",
        }
    }
}

/// 卷上记录限速档位的明细键
pub const QOS_DETAIL_KEY: &str = "qos_state";

/// 存储驱动抽象
#[async_trait]
pub trait StoreDriver: Send + Sync {
    /// 驱动是否声明可直接复制该端点对（门面短路判定）
    fn can_copy(&self, src: &DataEntry, dest: &DataEntry) -> bool;

    /// 驱动原生复制，仅在 can_copy 为真时调用
    async fn copy(&self, src: &DataEntry, dest: &DataEntry) -> CopyOutcome;

    /// 在后端上创建数据对象
    async fn create_object(&self, entry: &DataEntry) -> Result<CreateObjectResponse>;

    /// 删除后端上的数据对象
    async fn delete_object(&self, entry: &DataEntry) -> Result<()>;

    /// 授予宿主机对卷的访问
    async fn grant_access(&self, entry: &DataEntry, host: &HostEndpoint) -> Result<()>;

    /// 回收宿主机对卷的访问
    async fn revoke_access(&self, entry: &DataEntry, host: &HostEndpoint) -> Result<()>;

    /// 切换限速档位（尽力而为，失败由调用方记日志，不致命）
    async fn update_qos(&self, entry: &DataEntry, qos: QosState) -> Result<()>;
}

/// 通用驱动（非托管池）
pub struct GenericStoreDriver {
    runner: Arc<dyn CommandRunner>,
    selector: Arc<dyn EndpointSelector>,
    config: MotionConfig,
}

impl GenericStoreDriver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        selector: Arc<dyn EndpointSelector>,
        config: MotionConfig,
    ) -> Self {
        Self {
            runner,
            selector,
            config,
        }
    }
}

#[async_trait]
impl StoreDriver for GenericStoreDriver {
    fn can_copy(&self, src: &DataEntry, dest: &DataEntry) -> bool {
        // 两端同类型且都声明原生复制通道时走驱动直连
        src.store.pool_type == dest.store.pool_type
            && capability::supports(&src.store, capability::NATIVE_COPY)
            && capability::supports(&dest.store, capability::NATIVE_COPY)
    }

    async fn copy(&self, src: &DataEntry, dest: &DataEntry) -> CopyOutcome {
        let endpoint = match self.selector.select(&src.store, &dest.store).await {
            Ok(Some(ep)) => ep,
            Ok(None) => return CopyOutcome::failed("没有可用的远程执行端点"),
            Err(e) => return CopyOutcome::failed(format!("端点选择失败: {}", e)),
        };

        let command = AgentCommand::Copy(CopyObjectRequest {
            src: src.descriptor(),
            dest: dest.descriptor(),
            wait_secs: self.config.copy_volume_wait_secs,
            execute_in_sequence: self.config.execute_in_sequence,
            options: Default::default(),
        });

        let answer = self.runner.send(&endpoint.node_id, command).await;
        match answer {
            AgentAnswer::Copy(resp) if resp.success => match resp.new_object {
                Some(obj) => CopyOutcome::ok_with(resp.message, obj),
                None => CopyOutcome::ok(resp.message),
            },
            other => CopyOutcome::failed(other.message().to_string()),
        }
    }

    async fn create_object(&self, entry: &DataEntry) -> Result<CreateObjectResponse> {
        let endpoint = self
            .selector
            .select_for_store(&entry.store)
            .await?
            .ok_or_else(|| Error::Remote("没有可触达存储池的端点".to_string()))?;

        let command = AgentCommand::Create(CreateObjectRequest {
            object: entry.descriptor(),
            template_uuid: None,
            wait_secs: self.config.storage_pool_max_wait_secs,
        });

        match self.runner.send(&endpoint.node_id, command).await {
            AgentAnswer::Create(resp) if resp.success => Ok(resp),
            other => Err(Error::Storage(format!("创建数据对象失败: {}", other.message()))),
        }
    }

    async fn delete_object(&self, entry: &DataEntry) -> Result<()> {
        let endpoint = self
            .selector
            .select_for_store(&entry.store)
            .await?
            .ok_or_else(|| Error::Remote("没有可触达存储池的端点".to_string()))?;

        let command = AgentCommand::Delete(DeleteObjectRequest {
            object: entry.descriptor(),
        });

        match self.runner.send(&endpoint.node_id, command).await {
            AgentAnswer::Delete(resp) if resp.success => Ok(()),
            other => Err(Error::Storage(format!("删除数据对象失败: {}", other.message()))),
        }
    }

    async fn grant_access(&self, _entry: &DataEntry, _host: &HostEndpoint) -> Result<()> {
        // 共享池对集群内宿主机天然可见
        Ok(())
    }

    async fn revoke_access(&self, _entry: &DataEntry, _host: &HostEndpoint) -> Result<()> {
        Ok(())
    }

    async fn update_qos(&self, _entry: &DataEntry, _qos: QosState) -> Result<()> {
        Ok(())
    }
}

/// 托管阵列驱动
pub struct ManagedStoreDriver {
    runner: Arc<dyn CommandRunner>,
    selector: Arc<dyn EndpointSelector>,
    catalog: Arc<dyn super::catalog::MotionCatalog>,
    config: MotionConfig,
}

impl ManagedStoreDriver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        selector: Arc<dyn EndpointSelector>,
        catalog: Arc<dyn super::catalog::MotionCatalog>,
        config: MotionConfig,
    ) -> Self {
        Self {
            runner,
            selector,
            catalog,
            config,
        }
    }

    /// 由卷与池信息推导 iSCSI 目标
    fn target_for(entry: &DataEntry) -> TargetDescriptor {
        let iqn = match &entry.object {
            DataObject::Volume(v) => v
                .array_id
                .clone()
                .unwrap_or_else(|| format!("iqn.2010-01.cloud.storage:{}", v.uuid)),
            other => format!("iqn.2010-01.cloud.storage:{}", other.uuid()),
        };

        let storage_host = entry
            .store
            .capabilities
            .get("storage_host")
            .cloned()
            .unwrap_or_else(|| entry.store.name.clone());
        let storage_port = entry
            .store
            .capabilities
            .get("storage_port")
            .and_then(|p| p.parse().ok())
            .unwrap_or(3260);

        TargetDescriptor {
            iqn,
            storage_host,
            storage_port,
            details: entry.store.capabilities.clone(),
        }
    }
}

#[async_trait]
impl StoreDriver for ManagedStoreDriver {
    fn can_copy(&self, _src: &DataEntry, _dest: &DataEntry) -> bool {
        // 托管池的复制路径全部走策略编排
        false
    }

    async fn copy(&self, _src: &DataEntry, _dest: &DataEntry) -> CopyOutcome {
        CopyOutcome::failed("托管存储驱动不提供直接复制")
    }

    async fn create_object(&self, entry: &DataEntry) -> Result<CreateObjectResponse> {
        let endpoint = self
            .selector
            .select_for_store(&entry.store)
            .await?
            .ok_or_else(|| Error::Remote("没有可触达存储池的端点".to_string()))?;

        let command = AgentCommand::Create(CreateObjectRequest {
            object: entry.descriptor(),
            template_uuid: None,
            wait_secs: self.config.storage_pool_max_wait_secs,
        });

        match self.runner.send(&endpoint.node_id, command).await {
            AgentAnswer::Create(resp) if resp.success => Ok(resp),
            other => Err(Error::Storage(format!("创建阵列卷失败: {}", other.message()))),
        }
    }

    async fn delete_object(&self, entry: &DataEntry) -> Result<()> {
        let endpoint = self
            .selector
            .select_for_store(&entry.store)
            .await?
            .ok_or_else(|| Error::Remote("没有可触达存储池的端点".to_string()))?;

        let command = AgentCommand::Delete(DeleteObjectRequest {
            object: entry.descriptor(),
        });

        match self.runner.send(&endpoint.node_id, command).await {
            AgentAnswer::Delete(resp) if resp.success => Ok(()),
            other => Err(Error::Storage(format!("删除阵列卷失败: {}", other.message()))),
        }
    }

    async fn grant_access(&self, entry: &DataEntry, host: &HostEndpoint) -> Result<()> {
        debug!(
            "授予访问: volume={}, host={}",
            entry.object.uuid(),
            host.node_id
        );

        let command = AgentCommand::ModifyTargets(ModifyTargetsRequest {
            add: true,
            targets: vec![Self::target_for(entry)],
        });

        match self.runner.send(&host.node_id, command).await {
            AgentAnswer::ModifyTargets(resp) if resp.success => Ok(()),
            other => Err(Error::Storage(format!("授予访问失败: {}", other.message()))),
        }
    }

    async fn revoke_access(&self, entry: &DataEntry, host: &HostEndpoint) -> Result<()> {
        debug!(
            "回收访问: volume={}, host={}",
            entry.object.uuid(),
            host.node_id
        );

        let command = AgentCommand::ModifyTargets(ModifyTargetsRequest {
            add: false,
            targets: vec![Self::target_for(entry)],
        });

        match self.runner.send(&host.node_id, command).await {
            AgentAnswer::ModifyTargets(resp) if resp.success => Ok(()),
            other => Err(Error::Storage(format!("回收访问失败: {}", other.message()))),
        }
    }

    async fn update_qos(&self, entry: &DataEntry, qos: QosState) -> Result<()> {
        // 阵列连接器不在本层范围：落明细行供驱动侧带外同步
        self.catalog
            .set_detail(&entry.object.object_ref(), QOS_DETAIL_KEY, qos.as_str())
            .await?;
        info!(
            "限速档位已更新: volume={}, qos={}",
            entry.object.uuid(),
            qos.as_str()
        );
        Ok(())
    }
}

/// 驱动注册表
pub struct DriverRegistry {
    generic: Arc<GenericStoreDriver>,
    managed: Arc<ManagedStoreDriver>,
}

impl DriverRegistry {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        selector: Arc<dyn EndpointSelector>,
        catalog: Arc<dyn super::catalog::MotionCatalog>,
        config: MotionConfig,
    ) -> Self {
        Self {
            generic: Arc::new(GenericStoreDriver::new(
                runner.clone(),
                selector.clone(),
                config.clone(),
            )),
            managed: Arc::new(ManagedStoreDriver::new(runner, selector, catalog, config)),
        }
    }

    pub fn for_store(&self, store: &DataStore) -> Arc<dyn StoreDriver> {
        if store.managed {
            self.managed.clone()
        } else {
            self.generic.clone()
        }
    }
}

/// 尽力而为地切换限速档位，失败仅记日志
pub async fn try_update_qos(driver: &Arc<dyn StoreDriver>, entry: &DataEntry, qos: QosState) {
    if let Err(e) = driver.update_qos(entry, qos).await {
        warn!(
            "限速档位切换失败（忽略）: volume={}, qos={}, error={}",
            entry.object.uuid(),
            qos.as_str(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::testkit;

    #[test]
    fn test_generic_can_copy_requires_both_sides() {
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n1")));
        let driver = GenericStoreDriver::new(runner.clone(), selector, MotionConfig::default());

        let with_cap = testkit::entry_with_capability("v1", "p1", capability::NATIVE_COPY, "true");
        let without = testkit::volume_entry_on_nfs("v2", "p2");

        assert!(driver.can_copy(&with_cap, &with_cap));
        assert!(!driver.can_copy(&with_cap, &without));
        assert!(!driver.can_copy(&without, &without));
    }

    #[tokio::test]
    async fn test_managed_grant_sends_add_targets() {
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n1")));
        let catalog = testkit::memory_catalog();
        let driver = ManagedStoreDriver::new(
            runner.clone(),
            selector,
            catalog,
            MotionConfig::default(),
        );

        let entry = testkit::managed_volume_entry("v1", "p1");
        let host = testkit::host_endpoint("n9");
        driver.grant_access(&entry, &host).await.unwrap();

        let sent = runner.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "n9");
        match &sent[0].1 {
            AgentCommand::ModifyTargets(req) => {
                assert!(req.add);
                assert_eq!(req.targets.len(), 1);
            }
            other => panic!("期望 ModifyTargets，收到 {:?}", other.method()),
        }
    }

    #[tokio::test]
    async fn test_managed_qos_records_detail() {
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(None);
        let catalog = testkit::memory_catalog();
        let driver = ManagedStoreDriver::new(
            runner,
            selector,
            catalog.clone(),
            MotionConfig::default(),
        );

        let entry = testkit::managed_volume_entry("v1", "p1");
        driver.update_qos(&entry, QosState::Migration).await.unwrap();

        let detail = catalog
            .get_detail(&entry.object.object_ref(), QOS_DETAIL_KEY)
            .await
            .unwrap();
        assert_eq!(detail.as_deref(), Some("migration"));
    }
}
