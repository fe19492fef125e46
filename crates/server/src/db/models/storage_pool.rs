/// 存储池数据模型

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 存储池模型
///
/// role 区分主存储/二级存储/中转缓存，scope 决定可达范围，
/// managed 标记阵列托管池（卷为阵列级可寻址实体，按卷授权访问）
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "storage_pools")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    #[sea_orm(column_name = "type")]
    pub pool_type: String,  // nfs, filesystem, lvm, iscsi, ceph
    pub role: String,       // primary, image, image_cache
    pub scope: String,      // host, cluster, zone
    pub scope_id: Option<String>,
    pub managed: bool,
    pub status: String,     // active, inactive, error

    /// 挂载/访问路径
    pub path: Option<String>,

    /// 驱动能力表 (string -> string，"true"/"false")
    pub capabilities: JsonValue,

    // 容量信息
    pub capacity_gb: Option<i64>,
    pub allocated_gb: Option<i64>,
    pub available_gb: Option<i64>,

    // 关联信息
    pub node_id: Option<String>,

    // 元数据
    pub metadata: Option<JsonValue>,

    // 时间戳
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::volume::Entity")]
    Volumes,

    #[sea_orm(
        belongs_to = "super::node::Entity",
        from = "Column::NodeId",
        to = "super::node::Column::Id"
    )]
    Node,
}

impl Related<super::volume::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Volumes.def()
    }
}

impl Related<super::node::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Node.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// 存储池状态枚举
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoragePoolStatus {
    Active,
    Inactive,
    Error,
}

impl StoragePoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoragePoolStatus::Active => "active",
            StoragePoolStatus::Inactive => "inactive",
            StoragePoolStatus::Error => "error",
        }
    }
}

/// 创建存储池 DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateStoragePoolDto {
    pub name: String,
    pub pool_type: String,
    pub role: String,
    pub scope: String,
    pub scope_id: Option<String>,
    #[serde(default)]
    pub managed: bool,
    pub path: Option<String>,
    pub capabilities: Option<JsonValue>,
    pub capacity_gb: Option<i64>,
    pub node_id: Option<String>,
    pub metadata: Option<JsonValue>,
}

/// 存储池响应 DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct StoragePoolResponse {
    pub id: String,
    pub name: String,
    pub pool_type: String,
    pub role: String,
    pub scope: String,
    pub scope_id: Option<String>,
    pub managed: bool,
    pub status: String,
    pub path: Option<String>,
    pub capabilities: JsonValue,
    pub capacity_gb: Option<i64>,
    pub allocated_gb: Option<i64>,
    pub available_gb: Option<i64>,
    pub node_id: Option<String>,
    pub metadata: Option<JsonValue>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Model> for StoragePoolResponse {
    fn from(pool: Model) -> Self {
        Self {
            id: pool.id,
            name: pool.name,
            pool_type: pool.pool_type,
            role: pool.role,
            scope: pool.scope,
            scope_id: pool.scope_id,
            managed: pool.managed,
            status: pool.status,
            path: pool.path,
            capabilities: pool.capabilities,
            capacity_gb: pool.capacity_gb,
            allocated_gb: pool.allocated_gb,
            available_gb: pool.available_gb,
            node_id: pool.node_id,
            metadata: pool.metadata,
            created_at: pool.created_at.to_rfc3339(),
            updated_at: pool.updated_at.to_rfc3339(),
        }
    }
}

/// 存储池列表响应
#[derive(Debug, Serialize, Deserialize)]
pub struct StoragePoolListResponse {
    pub pools: Vec<StoragePoolResponse>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}
