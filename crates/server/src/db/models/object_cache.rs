/// 中转缓存对象数据模型

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 中转缓存条目
///
/// 源对象在 image_cache 角色存储上的临时副本。
/// ref_count 协调并发共享：最后一个使用者释放时删除，
/// 创建失败时立即删除
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "object_caches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub kind: String,  // volume, snapshot, template
    /// 被缓存对象的 uuid（缓存键）
    pub source_uuid: String,
    /// 缓存所在的 image_cache 存储
    pub store_id: String,
    pub path: Option<String>,
    pub size_gb: i64,
    pub state: String,
    pub ref_count: i32,

    // 时间戳
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::storage_pool::Entity",
        from = "Column::StoreId",
        to = "super::storage_pool::Column::Id"
    )]
    StoragePool,
}

impl Related<super::storage_pool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StoragePool.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
