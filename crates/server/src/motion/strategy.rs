/// 数据迁移策略契约与注册表

use async_trait::async_trait;
use std::sync::Arc;

use common::ws_rpc::DataObjectDescriptor;

use crate::db::models::vm;

use super::endpoint::HostEndpoint;
use super::object::{DataEntry, DataStore};

/// 策略优先级
///
/// 注册表取最大值；并列时先注册者胜出。
/// 优先级高的策略能利用阵列级硬件辅助操作，
/// 而不是退回经缓存的逐字节复制
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrategyPriority {
    CantHandle,
    Default,
    Highest,
    HypervisorSpecific,
}

/// 复制/迁移操作的统一结果
///
/// 引擎的公开入口只通过这一条通道报告结果，恰好一次：
/// 内部错误折算为 success=false，不会额外抛出
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub success: bool,
    pub message: String,
    pub new_object: Option<DataObjectDescriptor>,
}

impl CopyOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            new_object: None,
        }
    }

    pub fn ok_with(message: impl Into<String>, new_object: DataObjectDescriptor) -> Self {
        Self {
            success: true,
            message: message.into(),
            new_object: Some(new_object),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            new_object: None,
        }
    }
}

/// 整机迁移中单个卷的安置
#[derive(Debug, Clone)]
pub struct VolumePlacement {
    /// 源卷及其所在池
    pub source: DataEntry,
    /// 目标存储池
    pub dest_store: DataStore,
}

/// 整机存储迁移作业
#[derive(Debug, Clone)]
pub struct VmStorageMigrationJob {
    pub vm: vm::Model,
    pub src_host: HostEndpoint,
    pub dest_host: HostEndpoint,
    pub placements: Vec<VolumePlacement>,
}

/// 数据迁移策略契约
///
/// can_handle 回答"本策略能否处理这对端点"，copy 执行实际搬运
#[async_trait]
pub trait DataMotionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn can_handle(&self, src: &DataEntry, dest: &DataEntry) -> StrategyPriority;

    async fn can_handle_vm(&self, job: &VmStorageMigrationJob) -> StrategyPriority;

    async fn copy(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
        dest_host: Option<&HostEndpoint>,
    ) -> CopyOutcome;

    async fn migrate_vm(&self, job: &VmStorageMigrationJob) -> CopyOutcome;
}

/// 策略注册表
///
/// 顺序即注册顺序，选择结果对同一输入必须可复现：
/// 注册表显式持有列表，不依赖映射迭代顺序
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn DataMotionStrategy>>,
}

impl StrategyRegistry {
    pub fn new(strategies: Vec<Arc<dyn DataMotionStrategy>>) -> Self {
        Self { strategies }
    }

    /// 按最大优先级选择策略，并列时先注册者胜出
    pub async fn select(
        &self,
        src: &DataEntry,
        dest: &DataEntry,
    ) -> Option<Arc<dyn DataMotionStrategy>> {
        let mut best: Option<(StrategyPriority, Arc<dyn DataMotionStrategy>)> = None;
        for strategy in &self.strategies {
            let priority = strategy.can_handle(src, dest).await;
            if priority == StrategyPriority::CantHandle {
                continue;
            }
            // 严格大于才替换，保证并列时先注册者胜出
            let replace = match &best {
                Some((p, _)) => priority > *p,
                None => true,
            };
            if replace {
                best = Some((priority, strategy.clone()));
            }
        }
        best.map(|(_, s)| s)
    }

    /// 整机迁移的策略选择（主机对重载）
    pub async fn select_for_vm(
        &self,
        job: &VmStorageMigrationJob,
    ) -> Option<Arc<dyn DataMotionStrategy>> {
        let mut best: Option<(StrategyPriority, Arc<dyn DataMotionStrategy>)> = None;
        for strategy in &self.strategies {
            let priority = strategy.can_handle_vm(job).await;
            if priority == StrategyPriority::CantHandle {
                continue;
            }
            let replace = match &best {
                Some((p, _)) => priority > *p,
                None => true,
            };
            if replace {
                best = Some((priority, strategy.clone()));
            }
        }
        best.map(|(_, s)| s)
    }
}
