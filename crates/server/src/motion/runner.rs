/// 远程命令通道
///
/// 将类型化命令发往宿主机 Agent 并返回类型化应答。
/// 传输异常（节点离线、超时、序列化失败）一律折算为
/// success=false 的失败应答，上层对两者不做区分

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use common::ws_rpc::{
    CheckStorageAvailabilityRequest, CheckStorageAvailabilityResponse, ConnectVolumeRequest,
    ConnectVolumeResponse, CopyObjectRequest, CopyObjectResponse, CreateObjectRequest,
    CreateObjectResponse, DeleteObjectRequest, DeleteObjectResponse, DisconnectVolumeRequest,
    DisconnectVolumeResponse, MigrateVmWithStorageRequest, MigrateVmWithStorageResponse,
    MigrateVolumeRequest, MigrateVolumeResponse, ModifyTargetsRequest, ModifyTargetsResponse,
    PrepareForMigrationRequest, PrepareForMigrationResponse, ResignatureRequest,
    ResignatureResponse,
};

use crate::ws::AgentConnectionManager;

/// 无内嵌等待时限的命令的缺省等待（秒）
const DEFAULT_COMMAND_WAIT_SECS: u64 = 300;

/// 发往 Agent 的类型化命令
#[derive(Debug, Clone)]
pub enum AgentCommand {
    Copy(CopyObjectRequest),
    Create(CreateObjectRequest),
    Delete(DeleteObjectRequest),
    MigrateVolume(MigrateVolumeRequest),
    PrepareForMigration(PrepareForMigrationRequest),
    MigrateVmWithStorage(MigrateVmWithStorageRequest),
    Resignature(ResignatureRequest),
    ModifyTargets(ModifyTargetsRequest),
    CheckStorageAvailability(CheckStorageAvailabilityRequest),
    ConnectVolume(ConnectVolumeRequest),
    DisconnectVolume(DisconnectVolumeRequest),
}

impl AgentCommand {
    /// RPC 方法名
    pub fn method(&self) -> &'static str {
        match self {
            AgentCommand::Copy(_) => "copy_object",
            AgentCommand::Create(_) => "create_object",
            AgentCommand::Delete(_) => "delete_object",
            AgentCommand::MigrateVolume(_) => "migrate_volume",
            AgentCommand::PrepareForMigration(_) => "prepare_for_migration",
            AgentCommand::MigrateVmWithStorage(_) => "migrate_vm_with_storage",
            AgentCommand::Resignature(_) => "resignature",
            AgentCommand::ModifyTargets(_) => "modify_targets",
            AgentCommand::CheckStorageAvailability(_) => "check_storage_availability",
            AgentCommand::ConnectVolume(_) => "connect_volume",
            AgentCommand::DisconnectVolume(_) => "disconnect_volume",
        }
    }

    /// 本命令的等待时限（秒）
    pub fn wait_secs(&self) -> u64 {
        match self {
            AgentCommand::Copy(req) => req.wait_secs,
            AgentCommand::Create(req) => req.wait_secs,
            AgentCommand::MigrateVolume(req) => req.wait_secs,
            AgentCommand::MigrateVmWithStorage(req) => req.wait_secs,
            AgentCommand::Resignature(req) => req.wait_secs,
            AgentCommand::Delete(_)
            | AgentCommand::PrepareForMigration(_)
            | AgentCommand::ModifyTargets(_)
            | AgentCommand::CheckStorageAvailability(_)
            | AgentCommand::ConnectVolume(_)
            | AgentCommand::DisconnectVolume(_) => DEFAULT_COMMAND_WAIT_SECS,
        }
    }

    fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            AgentCommand::Copy(req) => serde_json::to_value(req),
            AgentCommand::Create(req) => serde_json::to_value(req),
            AgentCommand::Delete(req) => serde_json::to_value(req),
            AgentCommand::MigrateVolume(req) => serde_json::to_value(req),
            AgentCommand::PrepareForMigration(req) => serde_json::to_value(req),
            AgentCommand::MigrateVmWithStorage(req) => serde_json::to_value(req),
            AgentCommand::Resignature(req) => serde_json::to_value(req),
            AgentCommand::ModifyTargets(req) => serde_json::to_value(req),
            AgentCommand::CheckStorageAvailability(req) => serde_json::to_value(req),
            AgentCommand::ConnectVolume(req) => serde_json::to_value(req),
            AgentCommand::DisconnectVolume(req) => serde_json::to_value(req),
        }
    }
}

/// Agent 的类型化应答
#[derive(Debug, Clone)]
pub enum AgentAnswer {
    Copy(CopyObjectResponse),
    Create(CreateObjectResponse),
    Delete(DeleteObjectResponse),
    MigrateVolume(MigrateVolumeResponse),
    PrepareForMigration(PrepareForMigrationResponse),
    MigrateVmWithStorage(MigrateVmWithStorageResponse),
    Resignature(ResignatureResponse),
    ModifyTargets(ModifyTargetsResponse),
    CheckStorageAvailability(CheckStorageAvailabilityResponse),
    ConnectVolume(ConnectVolumeResponse),
    DisconnectVolume(DisconnectVolumeResponse),
}

impl AgentAnswer {
    pub fn success(&self) -> bool {
        match self {
            AgentAnswer::Copy(r) => r.success,
            AgentAnswer::Create(r) => r.success,
            AgentAnswer::Delete(r) => r.success,
            AgentAnswer::MigrateVolume(r) => r.success,
            AgentAnswer::PrepareForMigration(r) => r.success,
            AgentAnswer::MigrateVmWithStorage(r) => r.success,
            AgentAnswer::Resignature(r) => r.success,
            AgentAnswer::ModifyTargets(r) => r.success,
            AgentAnswer::CheckStorageAvailability(r) => r.success,
            AgentAnswer::ConnectVolume(r) => r.success,
            AgentAnswer::DisconnectVolume(r) => r.success,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AgentAnswer::Copy(r) => &r.message,
            AgentAnswer::Create(r) => &r.message,
            AgentAnswer::Delete(r) => &r.message,
            AgentAnswer::MigrateVolume(r) => &r.message,
            AgentAnswer::PrepareForMigration(r) => &r.message,
            AgentAnswer::MigrateVmWithStorage(r) => &r.message,
            AgentAnswer::Resignature(r) => &r.message,
            AgentAnswer::ModifyTargets(r) => &r.message,
            AgentAnswer::CheckStorageAvailability(r) => &r.message,
            AgentAnswer::ConnectVolume(r) => &r.message,
            AgentAnswer::DisconnectVolume(r) => &r.message,
        }
    }

    /// 为指定命令合成失败应答
    pub fn failure(command: &AgentCommand, message: impl Into<String>) -> Self {
        let message = message.into();
        match command {
            AgentCommand::Copy(_) => AgentAnswer::Copy(CopyObjectResponse {
                success: false,
                message,
                new_object: None,
            }),
            AgentCommand::Create(_) => AgentAnswer::Create(CreateObjectResponse {
                success: false,
                message,
                path: None,
                size_gb: None,
            }),
            AgentCommand::Delete(_) => AgentAnswer::Delete(DeleteObjectResponse {
                success: false,
                message,
            }),
            AgentCommand::MigrateVolume(_) => AgentAnswer::MigrateVolume(MigrateVolumeResponse {
                success: false,
                message,
                new_path: None,
                new_chain_info: None,
            }),
            AgentCommand::PrepareForMigration(_) => {
                AgentAnswer::PrepareForMigration(PrepareForMigrationResponse {
                    success: false,
                    message,
                })
            }
            AgentCommand::MigrateVmWithStorage(_) => {
                AgentAnswer::MigrateVmWithStorage(MigrateVmWithStorageResponse {
                    success: false,
                    message,
                })
            }
            AgentCommand::Resignature(_) => AgentAnswer::Resignature(ResignatureResponse {
                success: false,
                message,
                new_path: None,
                new_size_gb: None,
            }),
            AgentCommand::ModifyTargets(_) => AgentAnswer::ModifyTargets(ModifyTargetsResponse {
                success: false,
                message,
            }),
            AgentCommand::CheckStorageAvailability(_) => {
                AgentAnswer::CheckStorageAvailability(CheckStorageAvailabilityResponse {
                    success: false,
                    message,
                    available: Default::default(),
                })
            }
            AgentCommand::ConnectVolume(_) => AgentAnswer::ConnectVolume(ConnectVolumeResponse {
                success: false,
                message,
                path: None,
            }),
            AgentCommand::DisconnectVolume(_) => {
                AgentAnswer::DisconnectVolume(DisconnectVolumeResponse {
                    success: false,
                    message,
                })
            }
        }
    }

    fn parse(command: &AgentCommand, payload: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match command {
            AgentCommand::Copy(_) => AgentAnswer::Copy(serde_json::from_value(payload)?),
            AgentCommand::Create(_) => AgentAnswer::Create(serde_json::from_value(payload)?),
            AgentCommand::Delete(_) => AgentAnswer::Delete(serde_json::from_value(payload)?),
            AgentCommand::MigrateVolume(_) => {
                AgentAnswer::MigrateVolume(serde_json::from_value(payload)?)
            }
            AgentCommand::PrepareForMigration(_) => {
                AgentAnswer::PrepareForMigration(serde_json::from_value(payload)?)
            }
            AgentCommand::MigrateVmWithStorage(_) => {
                AgentAnswer::MigrateVmWithStorage(serde_json::from_value(payload)?)
            }
            AgentCommand::Resignature(_) => {
                AgentAnswer::Resignature(serde_json::from_value(payload)?)
            }
            AgentCommand::ModifyTargets(_) => {
                AgentAnswer::ModifyTargets(serde_json::from_value(payload)?)
            }
            AgentCommand::CheckStorageAvailability(_) => {
                AgentAnswer::CheckStorageAvailability(serde_json::from_value(payload)?)
            }
            AgentCommand::ConnectVolume(_) => {
                AgentAnswer::ConnectVolume(serde_json::from_value(payload)?)
            }
            AgentCommand::DisconnectVolume(_) => {
                AgentAnswer::DisconnectVolume(serde_json::from_value(payload)?)
            }
        })
    }
}

/// 命令执行通道抽象
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 向指定节点发送命令并等待应答
    ///
    /// 永不返回 Err：任何异常都折算为失败应答
    async fn send(&self, node_id: &str, command: AgentCommand) -> AgentAnswer;
}

/// 基于 Agent WebSocket 连接的命令通道
pub struct AgentCommandRunner {
    manager: AgentConnectionManager,
}

impl AgentCommandRunner {
    pub fn new(manager: AgentConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl CommandRunner for AgentCommandRunner {
    async fn send(&self, node_id: &str, command: AgentCommand) -> AgentAnswer {
        let payload = match command.payload() {
            Ok(p) => p,
            Err(e) => {
                warn!("命令序列化失败: method={}, error={}", command.method(), e);
                return AgentAnswer::failure(&command, format!("命令序列化失败: {}", e));
            }
        };

        debug!(
            "发送远程命令: node={}, method={}, wait={}s",
            node_id,
            command.method(),
            command.wait_secs()
        );

        let timeout = Duration::from_secs(command.wait_secs().max(1));
        match self
            .manager
            .call(node_id, command.method(), payload, timeout)
            .await
        {
            Ok(msg) => {
                let Some(payload) = msg.payload else {
                    return AgentAnswer::failure(&command, "应答缺少负载");
                };
                match AgentAnswer::parse(&command, payload) {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!("应答解析失败: method={}, error={}", command.method(), e);
                        AgentAnswer::failure(&command, format!("应答解析失败: {}", e))
                    }
                }
            }
            Err(e) => {
                warn!(
                    "远程命令失败: node={}, method={}, error={}",
                    node_id,
                    command.method(),
                    e
                );
                AgentAnswer::failure(&command, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ws_rpc::DeleteObjectRequest;

    fn delete_command() -> AgentCommand {
        let desc = crate::motion::testkit::volume_entry_on_nfs("v1", "p1").descriptor();
        AgentCommand::Delete(DeleteObjectRequest { object: desc })
    }

    #[test]
    fn test_method_names() {
        assert_eq!(delete_command().method(), "delete_object");
    }

    #[test]
    fn test_failure_matches_command_variant() {
        let cmd = delete_command();
        let answer = AgentAnswer::failure(&cmd, "节点离线");
        assert!(!answer.success());
        assert_eq!(answer.message(), "节点离线");
        assert!(matches!(answer, AgentAnswer::Delete(_)));
    }

    #[test]
    fn test_default_wait_for_short_commands() {
        assert_eq!(delete_command().wait_secs(), DEFAULT_COMMAND_WAIT_SECS);
    }
}
