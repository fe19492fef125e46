/// 模板数据模型

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 模板模型
///
/// 模板常驻二级存储，按需下发到主存储池（见 template_pool）
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "templates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub format: String,   // qcow2, raw, vhd
    pub size_gb: i64,
    pub hypervisor_type: Option<String>,
    /// 所在二级存储
    pub pool_id: String,
    pub path: Option<String>,
    pub state: String,

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
        belongs_to = "super::storage_pool::Entity",
        from = "Column::PoolId",
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

/// 模板列表响应
#[derive(Debug, Serialize, Deserialize)]
pub struct TemplateListResponse {
    pub templates: Vec<TemplateResponse>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// 创建模板 DTO
///
/// path 指向二级存储上已就位的镜像文件（登记已有镜像）；
/// snapshot_id 指定来源时由数据迁移引擎异步出模板
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTemplateDto {
    pub name: String,
    pub pool_id: String,
    pub size_gb: i64,
    #[serde(default = "default_format")]
    pub format: String,
    pub hypervisor_type: Option<String>,
    pub path: Option<String>,
    pub snapshot_id: Option<String>,
    pub metadata: Option<JsonValue>,
}

fn default_format() -> String {
    "qcow2".to_string()
}

/// 模板响应 DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct TemplateResponse {
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub format: String,
    pub size_gb: i64,
    pub hypervisor_type: Option<String>,
    pub pool_id: String,
    pub path: Option<String>,
    pub state: String,
    pub metadata: Option<JsonValue>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Model> for TemplateResponse {
    fn from(template: Model) -> Self {
        Self {
            id: template.id,
            uuid: template.uuid,
            name: template.name,
            format: template.format,
            size_gb: template.size_gb,
            hypervisor_type: template.hypervisor_type,
            pool_id: template.pool_id,
            path: template.path,
            state: template.state,
            metadata: template.metadata,
            created_at: template.created_at.to_rfc3339(),
            updated_at: template.updated_at.to_rfc3339(),
        }
    }
}
