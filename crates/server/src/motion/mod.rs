/// 存储数据迁移引擎
///
/// 在异构存储后端与宿主机之间复制、克隆、迁移虚拟磁盘数据。
/// 引擎按策略选择 + 多步编排的方式工作：
/// 门面先尝试驱动原生复制，其次按优先级选择迁移策略，
/// 策略内部通过远程命令驱动宿主机 Agent 搬运数据，
/// 并以生命周期状态机维护目录一致性

pub mod cache;
pub mod capability;
pub mod catalog;
pub mod driver;
pub mod endpoint;
pub mod generic;
pub mod kvm;
pub mod lifecycle;
pub mod locks;
pub mod object;
pub mod runner;
pub mod service;
pub mod storage_system;
pub mod strategy;
pub mod vm_migration;

#[cfg(test)]
pub mod testkit;

use std::sync::Arc;

pub use service::DataMotionService;
pub use strategy::CopyOutcome;

/// 引擎级配置（从全局配置收敛而来）
#[derive(Debug, Clone)]
pub struct MotionConfig {
    pub download_wait_secs: u64,
    pub copy_volume_wait_secs: u64,
    pub create_from_snapshot_wait_secs: u64,
    pub backup_snapshot_wait_secs: u64,
    pub migrate_wait_secs: u64,
    pub storage_pool_max_wait_secs: u64,
    pub online_migration_wait_secs: u64,
    pub execute_in_sequence: bool,
    pub kvm_auto_converge: bool,
}

impl From<&crate::config::Config> for MotionConfig {
    fn from(cfg: &crate::config::Config) -> Self {
        Self {
            download_wait_secs: cfg.download_wait_secs,
            copy_volume_wait_secs: cfg.copy_volume_wait_secs,
            create_from_snapshot_wait_secs: cfg.create_from_snapshot_wait_secs,
            backup_snapshot_wait_secs: cfg.backup_snapshot_wait_secs,
            migrate_wait_secs: cfg.migrate_wait_secs,
            storage_pool_max_wait_secs: cfg.storage_pool_max_wait_secs,
            online_migration_wait_secs: cfg.online_migration_wait_secs,
            execute_in_sequence: cfg.execute_in_sequence,
            kvm_auto_converge: cfg.kvm_auto_converge,
        }
    }
}

#[cfg(test)]
impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            download_wait_secs: 3600,
            copy_volume_wait_secs: 10800,
            create_from_snapshot_wait_secs: 10800,
            backup_snapshot_wait_secs: 21600,
            migrate_wait_secs: 3600,
            storage_pool_max_wait_secs: 3600,
            online_migration_wait_secs: 86400,
            execute_in_sequence: false,
            kvm_auto_converge: false,
        }
    }
}

/// 引擎共享上下文
///
/// 策略之间共享的外部协作者句柄：目录、远程命令通道、
/// 端点选择器、中转缓存
pub struct MotionContext {
    pub catalog: Arc<dyn catalog::MotionCatalog>,
    pub runner: Arc<dyn runner::CommandRunner>,
    pub selector: Arc<dyn endpoint::EndpointSelector>,
    pub cache: Arc<cache::CacheManager>,
    pub drivers: Arc<driver::DriverRegistry>,
    pub config: MotionConfig,
}
