/// 存储卷数据模型

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 存储卷模型
///
/// state 列保存生命周期状态机的当前状态（见 motion::lifecycle）。
/// uuid 是对外身份，整机迁移成功后目标卷会收养源卷的 uuid。
/// last_pool_id 保留迁移前的存储池，用于失败回滚。
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "volumes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub uuid: String,
    pub name: String,
    #[sea_orm(column_name = "kind")]
    pub volume_kind: String,  // root, data
    pub format: String,       // qcow2, raw, vhd
    pub size_gb: i64,
    pub pool_id: String,
    pub last_pool_id: Option<String>,
    pub path: Option<String>,
    pub folder: Option<String>,
    /// 快照链信息（宿主机返回的链描述，原样保存）
    pub chain_info: Option<String>,
    /// 阵列侧可寻址标识（托管存储的 IQN 等）
    pub array_id: Option<String>,
    pub state: String,

    // 关联信息
    pub node_id: Option<String>,
    pub vm_id: Option<String>,
    /// 基础镜像模板（链接克隆的 backing file 来源）
    pub template_id: Option<String>,

    /// 删除标记（expunge 时间）
    pub removed_at: Option<DateTimeWithTimeZone>,

    // 元数据
    pub metadata: Option<JsonValue>,

    // 时间戳
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::storage_pool::Entity",
        from = "Column::PoolId",
        to = "super::storage_pool::Column::Id"
    )]
    StoragePool,

    #[sea_orm(
        belongs_to = "super::node::Entity",
        from = "Column::NodeId",
        to = "super::node::Column::Id"
    )]
    Node,

    #[sea_orm(
        belongs_to = "super::vm::Entity",
        from = "Column::VmId",
        to = "super::vm::Column::Id"
    )]
    Vm,

    #[sea_orm(has_many = "super::snapshot::Entity")]
    Snapshots,
}

impl Related<super::storage_pool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StoragePool.def()
    }
}

impl Related<super::node::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Node.def()
    }
}

impl Related<super::vm::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Vm.def()
    }
}

impl Related<super::snapshot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Snapshots.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// 创建存储卷 DTO
///
/// template_id / snapshot_id 二选一指定数据来源，
/// 都缺省时只建空记录
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateVolumeDto {
    pub name: String,
    pub pool_id: String,
    pub size_gb: i64,
    #[serde(default = "default_volume_kind")]
    pub volume_kind: String,
    #[serde(default = "default_format")]
    pub format: String,
    pub node_id: Option<String>,
    pub vm_id: Option<String>,
    pub template_id: Option<String>,
    pub snapshot_id: Option<String>,
    pub metadata: Option<JsonValue>,
}

fn default_volume_kind() -> String {
    "data".to_string()
}

fn default_format() -> String {
    "qcow2".to_string()
}

/// 复制存储卷 DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct CopyVolumeDto {
    pub dest_pool_id: String,
    /// 指定目标宿主机（可选，缺省时由端点选择器决定）
    pub dest_node_id: Option<String>,
}

/// 卷迁移 DTO（同主机跨池）
#[derive(Debug, Serialize, Deserialize)]
pub struct MigrateVolumeDto {
    pub dest_pool_id: String,
}

/// 存储卷响应 DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeResponse {
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub volume_kind: String,
    pub format: String,
    pub size_gb: i64,
    pub pool_id: String,
    pub pool_name: Option<String>,
    pub last_pool_id: Option<String>,
    pub path: Option<String>,
    pub folder: Option<String>,
    pub array_id: Option<String>,
    pub state: String,
    pub node_id: Option<String>,
    pub vm_id: Option<String>,
    pub template_id: Option<String>,
    pub metadata: Option<JsonValue>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Model> for VolumeResponse {
    fn from(volume: Model) -> Self {
        Self {
            id: volume.id,
            uuid: volume.uuid,
            name: volume.name,
            volume_kind: volume.volume_kind,
            format: volume.format,
            size_gb: volume.size_gb,
            pool_id: volume.pool_id,
            pool_name: None, // 将在服务层填充
            last_pool_id: volume.last_pool_id,
            path: volume.path,
            folder: volume.folder,
            array_id: volume.array_id,
            state: volume.state,
            node_id: volume.node_id,
            vm_id: volume.vm_id,
            template_id: volume.template_id,
            metadata: volume.metadata,
            created_at: volume.created_at.to_rfc3339(),
            updated_at: volume.updated_at.to_rfc3339(),
        }
    }
}

/// 存储卷列表响应
#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeListResponse {
    pub volumes: Vec<VolumeResponse>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}
