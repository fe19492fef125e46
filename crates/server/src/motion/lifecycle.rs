/// 数据对象生命周期状态机
///
/// 卷/快照/模板在复制、迁移过程中的状态流转。
/// 状态机是目录状态的唯一事实来源：所有伴随转换发生的字段变更
/// 必须与事件在同一目录调用中落盘（见 catalog::MotionCatalog::transition）

use common::{Error, Result};
use serde::{Deserialize, Serialize};

/// 对象生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    /// 已分配目录记录，尚无数据
    Allocated,
    /// 数据正在写入后端
    Creating,
    /// 可用
    Ready,
    /// 作为复制源/目标参与复制
    Copying,
    /// 迁移进行中
    Migrating,
    /// 终态失败，需要外部清理（destroy + expunge）
    Failed,
    Destroying,
    Destroyed,
}

impl ObjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectState::Allocated => "allocated",
            ObjectState::Creating => "creating",
            ObjectState::Ready => "ready",
            ObjectState::Copying => "copying",
            ObjectState::Migrating => "migrating",
            ObjectState::Failed => "failed",
            ObjectState::Destroying => "destroying",
            ObjectState::Destroyed => "destroyed",
        }
    }
}

impl From<&str> for ObjectState {
    fn from(s: &str) -> Self {
        match s {
            "creating" => ObjectState::Creating,
            "ready" => ObjectState::Ready,
            "copying" => ObjectState::Copying,
            "migrating" => ObjectState::Migrating,
            "failed" => ObjectState::Failed,
            "destroying" => ObjectState::Destroying,
            "destroyed" => ObjectState::Destroyed,
            _ => ObjectState::Allocated,
        }
    }
}

/// 状态机事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectEvent {
    CreateRequested,
    CopyRequested,
    MigrateRequested,
    /// 整机迁移：在目标池上复制目录记录后开始建数据
    MigrationCopyRequested,
    MigrationCopySucceeded,
    OperationSucceeded,
    OperationFailed,
    DestroyRequested,
}

/// 施加事件，返回新状态
///
/// 非法的 (状态, 事件) 组合返回 InvalidTransition
pub fn transition(state: ObjectState, event: ObjectEvent) -> Result<ObjectState> {
    use ObjectEvent::*;
    use ObjectState::*;

    let next = match (state, event) {
        (Allocated, CreateRequested) => Creating,
        (Allocated, MigrationCopyRequested) => Creating,
        (Creating, OperationSucceeded) => Ready,
        (Creating, MigrationCopySucceeded) => Ready,
        (Creating, OperationFailed) => Failed,

        (Ready, CopyRequested) => Copying,
        (Copying, OperationSucceeded) => Ready,
        (Copying, OperationFailed) => Failed,

        (Ready, MigrateRequested) => Migrating,
        (Migrating, OperationSucceeded) => Ready,
        (Migrating, OperationFailed) => Failed,

        (Allocated, DestroyRequested) => Destroying,
        (Ready, DestroyRequested) => Destroying,
        (Failed, DestroyRequested) => Destroying,
        (Destroying, OperationSucceeded) => Destroyed,
        (Destroying, OperationFailed) => Failed,

        (state, event) => {
            return Err(Error::InvalidTransition(format!(
                "状态 {} 不接受事件 {:?}",
                state.as_str(),
                event
            )));
        }
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_path() {
        let s = transition(ObjectState::Allocated, ObjectEvent::CreateRequested).unwrap();
        assert_eq!(s, ObjectState::Creating);
        let s = transition(s, ObjectEvent::OperationSucceeded).unwrap();
        assert_eq!(s, ObjectState::Ready);
    }

    #[test]
    fn test_migration_copy_path() {
        // 整机迁移时目标记录的完整旅程
        let mut s = ObjectState::Allocated;
        s = transition(s, ObjectEvent::MigrationCopyRequested).unwrap();
        assert_eq!(s, ObjectState::Creating);
        s = transition(s, ObjectEvent::MigrationCopySucceeded).unwrap();
        assert_eq!(s, ObjectState::Ready);
        s = transition(s, ObjectEvent::MigrateRequested).unwrap();
        assert_eq!(s, ObjectState::Migrating);
        s = transition(s, ObjectEvent::OperationSucceeded).unwrap();
        assert_eq!(s, ObjectState::Ready);
    }

    #[test]
    fn test_failure_needs_destroy() {
        let s = transition(ObjectState::Migrating, ObjectEvent::OperationFailed).unwrap();
        assert_eq!(s, ObjectState::Failed);
        let s = transition(s, ObjectEvent::DestroyRequested).unwrap();
        assert_eq!(s, ObjectState::Destroying);
        let s = transition(s, ObjectEvent::OperationSucceeded).unwrap();
        assert_eq!(s, ObjectState::Destroyed);
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(transition(ObjectState::Ready, ObjectEvent::OperationSucceeded).is_err());
        assert!(transition(ObjectState::Allocated, ObjectEvent::MigrateRequested).is_err());
        assert!(transition(ObjectState::Destroyed, ObjectEvent::CreateRequested).is_err());
        assert!(transition(ObjectState::Creating, ObjectEvent::CopyRequested).is_err());
    }

    #[test]
    fn test_state_roundtrip() {
        for s in [
            ObjectState::Allocated,
            ObjectState::Creating,
            ObjectState::Ready,
            ObjectState::Copying,
            ObjectState::Migrating,
            ObjectState::Failed,
            ObjectState::Destroying,
            ObjectState::Destroyed,
        ] {
            assert_eq!(ObjectState::from(s.as_str()), s);
        }
    }
}
