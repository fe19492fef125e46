/// 数据对象临时明细数据模型

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 多步操作期间的临时键值行
///
/// 例如 clone_of_snapshot / take_snapshot 标记，
/// 必须由创建它的操作在同一流程内清理
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "object_details")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner_kind: String,  // volume, snapshot, template
    pub owner_id: String,
    pub name: String,
    pub value: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
