/// 存储卷快照数据模型
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 快照模型
///
/// 快照经由 parent_snapshot_id 构成单链，增量备份沿链回溯
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub volume_id: String,
    pub parent_snapshot_id: Option<String>,
    /// 快照当前所在的存储后端
    pub pool_id: String,
    pub path: Option<String>,
    pub state: String,
    pub size_gb: Option<i64>,

    /// 删除标记
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
        belongs_to = "super::volume::Entity",
        from = "Column::VolumeId",
        to = "super::volume::Column::Id"
    )]
    Volume,

    #[sea_orm(
        belongs_to = "super::storage_pool::Entity",
        from = "Column::PoolId",
        to = "super::storage_pool::Column::Id"
    )]
    StoragePool,
}

impl Related<super::volume::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Volume.def()
    }
}

impl Related<super::storage_pool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StoragePool.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// 创建快照 DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSnapshotDto {
    pub name: String,
    pub volume_id: String,
    pub metadata: Option<JsonValue>,
}

/// 快照响应 DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub volume_id: String,
    pub volume_name: Option<String>,
    pub parent_snapshot_id: Option<String>,
    pub pool_id: String,
    pub path: Option<String>,
    pub state: String,
    pub size_gb: Option<i64>,
    pub metadata: Option<JsonValue>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Model> for SnapshotResponse {
    fn from(snapshot: Model) -> Self {
        Self {
            id: snapshot.id,
            uuid: snapshot.uuid,
            name: snapshot.name,
            volume_id: snapshot.volume_id,
            volume_name: None, // 将在服务层填充
            parent_snapshot_id: snapshot.parent_snapshot_id,
            pool_id: snapshot.pool_id,
            path: snapshot.path,
            state: snapshot.state,
            size_gb: snapshot.size_gb,
            metadata: snapshot.metadata,
            created_at: snapshot.created_at.to_rfc3339(),
            updated_at: snapshot.updated_at.to_rfc3339(),
        }
    }
}

/// 快照列表响应
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotListResponse {
    pub snapshots: Vec<SnapshotResponse>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}
