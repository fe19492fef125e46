/// 虚拟机数据模型

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 虚拟机模型
///
/// 数据迁移引擎只关心名称、所在节点与客户机操作系统，
/// 卷的归属通过 volumes.vm_id 反查
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vms")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub node_id: Option<String>,
    pub status: String,  // running, stopped, migrating, error
    pub os_type: String, // linux, windows

    // 元数据
    pub metadata: Option<JsonValue>,

    // 时间戳
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::node::Entity",
        from = "Column::NodeId",
        to = "super::node::Column::Id"
    )]
    Node,

    #[sea_orm(has_many = "super::volume::Entity")]
    Volumes,
}

impl Related<super::node::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Node.def()
    }
}

impl Related<super::volume::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Volumes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// 虚拟机状态枚举
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Running,
    Stopped,
    Migrating,
    Error,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Running => "running",
            VmStatus::Stopped => "stopped",
            VmStatus::Migrating => "migrating",
            VmStatus::Error => "error",
        }
    }
}

/// 整机存储迁移 DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct MigrateVmStorageDto {
    pub dest_node_id: String,
    /// 卷 ID -> 目标存储池 ID
    pub volume_pool_map: std::collections::HashMap<String, String>,
}

/// 虚拟机响应 DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct VmResponse {
    pub id: String,
    pub name: String,
    pub node_id: Option<String>,
    pub node_name: Option<String>,
    pub status: String,
    pub os_type: String,
    pub metadata: Option<JsonValue>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Model> for VmResponse {
    fn from(vm: Model) -> Self {
        Self {
            id: vm.id,
            name: vm.name,
            node_id: vm.node_id,
            node_name: None, // 将在服务层填充
            status: vm.status,
            os_type: vm.os_type,
            metadata: vm.metadata,
            created_at: vm.created_at.to_rfc3339(),
            updated_at: vm.updated_at.to_rfc3339(),
        }
    }
}

/// 虚拟机列表响应
#[derive(Debug, Serialize, Deserialize)]
pub struct VmListResponse {
    pub vms: Vec<VmResponse>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}
