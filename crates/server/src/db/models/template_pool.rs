/// 模板-主存储池映射数据模型

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 模板在某个主存储池上的落位记录
///
/// 链接克隆迁移时目标池若已有此映射则直接复用基础镜像，
/// 否则标记由 Agent 负责复制
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "template_pool_refs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub template_id: String,
    pub pool_id: String,
    pub path: Option<String>,
    pub state: String,

    // 时间戳
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::template::Entity",
        from = "Column::TemplateId",
        to = "super::template::Column::Id"
    )]
    Template,

    #[sea_orm(
        belongs_to = "super::storage_pool::Entity",
        from = "Column::PoolId",
        to = "super::storage_pool::Column::Id"
    )]
    StoragePool,
}

impl Related<super::template::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Template.def()
    }
}

impl Related<super::storage_pool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StoragePool.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
