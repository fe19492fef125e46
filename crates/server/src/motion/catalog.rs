/// 目录访问层
///
/// 引擎只通过 MotionCatalog 触达数据库：状态机事件与伴随字段
/// 变更在同一调用内落盘，编排逻辑因此可以对内存实现进行测试

use async_trait::async_trait;
use chrono::Utc;
use common::models::DataObjectKind;
use common::{Error, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};

use crate::db::models::{
    node, object_cache, object_detail, snapshot, storage_pool, template, template_pool, vm, volume,
};

use super::lifecycle::{self, ObjectEvent, ObjectState};
use super::object::ObjectRef;

/// 伴随状态转换落盘的字段变更
///
/// 仅设置 Some 的字段会被写入
#[derive(Debug, Clone, Default)]
pub struct ObjectChanges {
    pub path: Option<String>,
    pub folder: Option<String>,
    pub chain_info: Option<String>,
    pub pool_id: Option<String>,
    pub last_pool_id: Option<String>,
    pub size_gb: Option<i64>,
    pub array_id: Option<String>,
    pub node_id: Option<String>,
}

impl ObjectChanges {
    pub fn none() -> Self {
        Self::default()
    }
}

/// 目录抽象
///
/// 持久化模式细节是外部协作者：引擎按 ID 存取行，
/// 不感知底层是关系库还是键值库
#[async_trait]
pub trait MotionCatalog: Send + Sync {
    async fn volume(&self, id: &str) -> Result<Option<volume::Model>>;
    async fn snapshot(&self, id: &str) -> Result<Option<snapshot::Model>>;
    async fn template(&self, id: &str) -> Result<Option<template::Model>>;
    async fn pool(&self, id: &str) -> Result<Option<storage_pool::Model>>;
    async fn vm(&self, id: &str) -> Result<Option<vm::Model>>;
    async fn node(&self, id: &str) -> Result<Option<node::Model>>;
    async fn volumes_of_vm(&self, vm_id: &str) -> Result<Vec<volume::Model>>;
    async fn snapshots_of_volume(&self, volume_id: &str) -> Result<Vec<snapshot::Model>>;

    /// 模板在指定主存储池上的落位记录
    async fn template_ref_on_pool(
        &self,
        template_id: &str,
        pool_id: &str,
    ) -> Result<Option<template_pool::Model>>;

    /// 施加状态机事件，并在同一步骤内写入伴随字段变更
    async fn transition(
        &self,
        object: &ObjectRef,
        event: ObjectEvent,
        changes: ObjectChanges,
    ) -> Result<ObjectState>;

    /// 为迁移在目标池上复制卷目录记录
    ///
    /// 新记录清空路径/目录/链信息与 VM 归属，原池记入 last_pool_id
    async fn duplicate_volume(&self, volume_id: &str, dest_pool_id: &str) -> Result<volume::Model>;

    /// 迁移成功后目标记录收养源卷身份（uuid / 名称 / VM 归属互换）
    async fn adopt_volume_identity(&self, source_id: &str, dest_id: &str) -> Result<()>;

    /// 将快照从一个卷挂接到另一个卷
    async fn reparent_snapshots(&self, from_volume_id: &str, to_volume_id: &str) -> Result<u64>;

    /// 打删除标记（expunge）
    async fn expunge(&self, object: &ObjectRef) -> Result<()>;

    // ------------------------------------------------------------------
    // 多步操作的临时明细行
    // ------------------------------------------------------------------

    async fn set_detail(&self, object: &ObjectRef, name: &str, value: &str) -> Result<()>;
    async fn get_detail(&self, object: &ObjectRef, name: &str) -> Result<Option<String>>;
    async fn remove_detail(&self, object: &ObjectRef, name: &str) -> Result<()>;

    // ------------------------------------------------------------------
    // 中转缓存行
    // ------------------------------------------------------------------

    async fn cache_entry(
        &self,
        source_uuid: &str,
        store_id: &str,
    ) -> Result<Option<object_cache::Model>>;
    async fn insert_cache_entry(&self, entry: object_cache::Model) -> Result<object_cache::Model>;
    /// 更新缓存行（路径/状态/引用计数增量），返回更新后的行
    async fn update_cache_entry(
        &self,
        id: &str,
        path: Option<String>,
        state: Option<String>,
        ref_delta: i32,
    ) -> Result<Option<object_cache::Model>>;
    async fn delete_cache_entry(&self, id: &str) -> Result<()>;

    /// 全部 image_cache 角色存储
    async fn image_cache_stores(&self) -> Result<Vec<storage_pool::Model>>;
    /// 全部二级存储
    async fn image_stores(&self) -> Result<Vec<storage_pool::Model>>;
}

/// SeaORM 目录实现
pub struct DbCatalog {
    db: DatabaseConnection,
}

impl DbCatalog {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn db_err(e: impl std::fmt::Display) -> Error {
        Error::Database(e.to_string())
    }
}

#[async_trait]
impl MotionCatalog for DbCatalog {
    async fn volume(&self, id: &str) -> Result<Option<volume::Model>> {
        volume::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(Self::db_err)
    }

    async fn snapshot(&self, id: &str) -> Result<Option<snapshot::Model>> {
        snapshot::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(Self::db_err)
    }

    async fn template(&self, id: &str) -> Result<Option<template::Model>> {
        template::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(Self::db_err)
    }

    async fn pool(&self, id: &str) -> Result<Option<storage_pool::Model>> {
        storage_pool::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(Self::db_err)
    }

    async fn vm(&self, id: &str) -> Result<Option<vm::Model>> {
        vm::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(Self::db_err)
    }

    async fn node(&self, id: &str) -> Result<Option<node::Model>> {
        node::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(Self::db_err)
    }

    async fn volumes_of_vm(&self, vm_id: &str) -> Result<Vec<volume::Model>> {
        volume::Entity::find()
            .filter(volume::Column::VmId.eq(vm_id))
            .filter(volume::Column::RemovedAt.is_null())
            .all(&self.db)
            .await
            .map_err(Self::db_err)
    }

    async fn snapshots_of_volume(&self, volume_id: &str) -> Result<Vec<snapshot::Model>> {
        snapshot::Entity::find()
            .filter(snapshot::Column::VolumeId.eq(volume_id))
            .filter(snapshot::Column::RemovedAt.is_null())
            .all(&self.db)
            .await
            .map_err(Self::db_err)
    }

    async fn template_ref_on_pool(
        &self,
        template_id: &str,
        pool_id: &str,
    ) -> Result<Option<template_pool::Model>> {
        template_pool::Entity::find()
            .filter(template_pool::Column::TemplateId.eq(template_id))
            .filter(template_pool::Column::PoolId.eq(pool_id))
            .one(&self.db)
            .await
            .map_err(Self::db_err)
    }

    async fn transition(
        &self,
        object: &ObjectRef,
        event: ObjectEvent,
        changes: ObjectChanges,
    ) -> Result<ObjectState> {
        let now = Utc::now();

        match object.kind {
            DataObjectKind::Volume => {
                let row = self
                    .volume(&object.id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("存储卷不存在: {}", object.id)))?;
                let next = lifecycle::transition(ObjectState::from(row.state.as_str()), event)?;

                let mut active: volume::ActiveModel = row.into();
                active.state = Set(next.as_str().to_string());
                if let Some(path) = changes.path {
                    active.path = Set(Some(path));
                }
                if let Some(folder) = changes.folder {
                    active.folder = Set(Some(folder));
                }
                if let Some(chain_info) = changes.chain_info {
                    active.chain_info = Set(Some(chain_info));
                }
                if let Some(pool_id) = changes.pool_id {
                    active.pool_id = Set(pool_id);
                }
                if let Some(last_pool_id) = changes.last_pool_id {
                    active.last_pool_id = Set(Some(last_pool_id));
                }
                if let Some(size_gb) = changes.size_gb {
                    active.size_gb = Set(size_gb);
                }
                if let Some(array_id) = changes.array_id {
                    active.array_id = Set(Some(array_id));
                }
                if let Some(node_id) = changes.node_id {
                    active.node_id = Set(Some(node_id));
                }
                active.updated_at = Set(now.into());
                active.update(&self.db).await.map_err(Self::db_err)?;
                Ok(next)
            }
            DataObjectKind::Snapshot => {
                let row = self
                    .snapshot(&object.id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("快照不存在: {}", object.id)))?;
                let next = lifecycle::transition(ObjectState::from(row.state.as_str()), event)?;

                let mut active: snapshot::ActiveModel = row.into();
                active.state = Set(next.as_str().to_string());
                if let Some(path) = changes.path {
                    active.path = Set(Some(path));
                }
                if let Some(pool_id) = changes.pool_id {
                    active.pool_id = Set(pool_id);
                }
                if let Some(size_gb) = changes.size_gb {
                    active.size_gb = Set(Some(size_gb));
                }
                active.updated_at = Set(now.into());
                active.update(&self.db).await.map_err(Self::db_err)?;
                Ok(next)
            }
            DataObjectKind::Template => {
                let row = self
                    .template(&object.id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("模板不存在: {}", object.id)))?;
                let next = lifecycle::transition(ObjectState::from(row.state.as_str()), event)?;

                let mut active: template::ActiveModel = row.into();
                active.state = Set(next.as_str().to_string());
                if let Some(path) = changes.path {
                    active.path = Set(Some(path));
                }
                if let Some(pool_id) = changes.pool_id {
                    active.pool_id = Set(pool_id);
                }
                if let Some(size_gb) = changes.size_gb {
                    active.size_gb = Set(size_gb);
                }
                active.updated_at = Set(now.into());
                active.update(&self.db).await.map_err(Self::db_err)?;
                Ok(next)
            }
        }
    }

    async fn duplicate_volume(&self, volume_id: &str, dest_pool_id: &str) -> Result<volume::Model> {
        let src = self
            .volume(volume_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("存储卷不存在: {}", volume_id)))?;
        let now = Utc::now();

        let dup = volume::ActiveModel {
            id: Set(common::utils::generate_id()),
            uuid: Set(common::utils::generate_id()),
            name: Set(src.name.clone()),
            volume_kind: Set(src.volume_kind.clone()),
            format: Set(src.format.clone()),
            size_gb: Set(src.size_gb),
            pool_id: Set(dest_pool_id.to_string()),
            last_pool_id: Set(Some(src.pool_id.clone())),
            path: Set(None),
            folder: Set(None),
            chain_info: Set(None),
            array_id: Set(None),
            state: Set(ObjectState::Allocated.as_str().to_string()),
            node_id: Set(None),
            vm_id: Set(None),
            template_id: Set(src.template_id.clone()),
            removed_at: Set(None),
            metadata: Set(src.metadata.clone()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        dup.insert(&self.db).await.map_err(Self::db_err)
    }

    async fn adopt_volume_identity(&self, source_id: &str, dest_id: &str) -> Result<()> {
        let src = self
            .volume(source_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("存储卷不存在: {}", source_id)))?;
        let dest = self
            .volume(dest_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("存储卷不存在: {}", dest_id)))?;
        let now = Utc::now();

        let src_uuid = src.uuid.clone();
        let src_name = src.name.clone();
        let src_vm = src.vm_id.clone();
        let dest_uuid = dest.uuid.clone();

        // 先腾出源卷的 uuid，避免唯一约束冲突
        let mut src_active: volume::ActiveModel = src.into();
        src_active.uuid = Set(dest_uuid);
        src_active.vm_id = Set(None);
        src_active.updated_at = Set(now.into());
        src_active.update(&self.db).await.map_err(Self::db_err)?;

        let mut dest_active: volume::ActiveModel = dest.into();
        dest_active.uuid = Set(src_uuid);
        dest_active.name = Set(src_name);
        dest_active.vm_id = Set(src_vm);
        dest_active.updated_at = Set(now.into());
        dest_active.update(&self.db).await.map_err(Self::db_err)?;

        Ok(())
    }

    async fn reparent_snapshots(&self, from_volume_id: &str, to_volume_id: &str) -> Result<u64> {
        let snapshots = self.snapshots_of_volume(from_volume_id).await?;
        let count = snapshots.len() as u64;
        let now = Utc::now();

        for snap in snapshots {
            let mut active: snapshot::ActiveModel = snap.into();
            active.volume_id = Set(to_volume_id.to_string());
            active.updated_at = Set(now.into());
            active.update(&self.db).await.map_err(Self::db_err)?;
        }

        Ok(count)
    }

    async fn expunge(&self, object: &ObjectRef) -> Result<()> {
        let now = Utc::now();

        match object.kind {
            DataObjectKind::Volume => {
                let row = self
                    .volume(&object.id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("存储卷不存在: {}", object.id)))?;
                let mut active: volume::ActiveModel = row.into();
                active.removed_at = Set(Some(now.into()));
                active.updated_at = Set(now.into());
                active.update(&self.db).await.map_err(Self::db_err)?;
            }
            DataObjectKind::Snapshot => {
                let row = self
                    .snapshot(&object.id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("快照不存在: {}", object.id)))?;
                let mut active: snapshot::ActiveModel = row.into();
                active.removed_at = Set(Some(now.into()));
                active.updated_at = Set(now.into());
                active.update(&self.db).await.map_err(Self::db_err)?;
            }
            DataObjectKind::Template => {
                let row = self
                    .template(&object.id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("模板不存在: {}", object.id)))?;
                let mut active: template::ActiveModel = row.into();
                active.removed_at = Set(Some(now.into()));
                active.updated_at = Set(now.into());
                active.update(&self.db).await.map_err(Self::db_err)?;
            }
        }

        Ok(())
    }

    async fn set_detail(&self, object: &ObjectRef, name: &str, value: &str) -> Result<()> {
        // 覆盖语义：先清理同名旧行
        self.remove_detail(object, name).await?;

        let row = object_detail::ActiveModel {
            id: Set(common::utils::generate_id()),
            owner_kind: Set(object.kind.as_str().to_string()),
            owner_id: Set(object.id.clone()),
            name: Set(name.to_string()),
            value: Set(value.to_string()),
            created_at: Set(Utc::now().into()),
        };
        row.insert(&self.db).await.map_err(Self::db_err)?;
        Ok(())
    }

    async fn get_detail(&self, object: &ObjectRef, name: &str) -> Result<Option<String>> {
        let row = object_detail::Entity::find()
            .filter(object_detail::Column::OwnerKind.eq(object.kind.as_str()))
            .filter(object_detail::Column::OwnerId.eq(object.id.clone()))
            .filter(object_detail::Column::Name.eq(name))
            .one(&self.db)
            .await
            .map_err(Self::db_err)?;
        Ok(row.map(|r| r.value))
    }

    async fn remove_detail(&self, object: &ObjectRef, name: &str) -> Result<()> {
        object_detail::Entity::delete_many()
            .filter(object_detail::Column::OwnerKind.eq(object.kind.as_str()))
            .filter(object_detail::Column::OwnerId.eq(object.id.clone()))
            .filter(object_detail::Column::Name.eq(name))
            .exec(&self.db)
            .await
            .map_err(Self::db_err)?;
        Ok(())
    }

    async fn cache_entry(
        &self,
        source_uuid: &str,
        store_id: &str,
    ) -> Result<Option<object_cache::Model>> {
        object_cache::Entity::find()
            .filter(object_cache::Column::SourceUuid.eq(source_uuid))
            .filter(object_cache::Column::StoreId.eq(store_id))
            .one(&self.db)
            .await
            .map_err(Self::db_err)
    }

    async fn insert_cache_entry(&self, entry: object_cache::Model) -> Result<object_cache::Model> {
        let active = object_cache::ActiveModel {
            id: Set(entry.id),
            kind: Set(entry.kind),
            source_uuid: Set(entry.source_uuid),
            store_id: Set(entry.store_id),
            path: Set(entry.path),
            size_gb: Set(entry.size_gb),
            state: Set(entry.state),
            ref_count: Set(entry.ref_count),
            created_at: Set(entry.created_at),
            updated_at: Set(entry.updated_at),
        };
        active.insert(&self.db).await.map_err(Self::db_err)
    }

    async fn update_cache_entry(
        &self,
        id: &str,
        path: Option<String>,
        state: Option<String>,
        ref_delta: i32,
    ) -> Result<Option<object_cache::Model>> {
        let row = object_cache::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(Self::db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let new_count = row.ref_count + ref_delta;
        let mut active: object_cache::ActiveModel = row.into();
        if let Some(path) = path {
            active.path = Set(Some(path));
        }
        if let Some(state) = state {
            active.state = Set(state);
        }
        active.ref_count = Set(new_count);
        active.updated_at = Set(Utc::now().into());

        let updated = active.update(&self.db).await.map_err(Self::db_err)?;
        Ok(Some(updated))
    }

    async fn delete_cache_entry(&self, id: &str) -> Result<()> {
        object_cache::Entity::delete_by_id(id.to_string())
            .exec(&self.db)
            .await
            .map_err(Self::db_err)?;
        Ok(())
    }

    async fn image_cache_stores(&self) -> Result<Vec<storage_pool::Model>> {
        storage_pool::Entity::find()
            .filter(storage_pool::Column::Role.eq("image_cache"))
            .filter(storage_pool::Column::Status.eq("active"))
            .all(&self.db)
            .await
            .map_err(Self::db_err)
    }

    async fn image_stores(&self) -> Result<Vec<storage_pool::Model>> {
        storage_pool::Entity::find()
            .filter(storage_pool::Column::Role.eq("image"))
            .filter(storage_pool::Column::Status.eq("active"))
            .all(&self.db)
            .await
            .map_err(Self::db_err)
    }
}
