/// 数据对象与存储后端的内存视图

use std::collections::HashMap;

use common::models::{DataObjectKind, DiskFormat, PoolType, StoreRole, StoreScope};
use common::ws_rpc::{DataObjectDescriptor, StoreDescriptor};

use crate::db::models::{snapshot, storage_pool, template, volume};

use super::lifecycle::ObjectState;

/// 存储后端视图
///
/// 从 storage_pool 目录行解析而来，贯穿策略判定与命令构造
#[derive(Debug, Clone)]
pub struct DataStore {
    pub id: String,
    pub name: String,
    pub role: StoreRole,
    pub scope: StoreScope,
    pub scope_id: Option<String>,
    pub pool_type: PoolType,
    pub managed: bool,
    pub path: Option<String>,
    pub node_id: Option<String>,
    pub capabilities: HashMap<String, String>,
}

impl DataStore {
    pub fn from_pool(pool: &storage_pool::Model) -> Self {
        let capabilities = pool
            .capabilities
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: pool.id.clone(),
            name: pool.name.clone(),
            role: StoreRole::from(pool.role.as_str()),
            scope: StoreScope::from(pool.scope.as_str()),
            scope_id: pool.scope_id.clone(),
            pool_type: PoolType::from(pool.pool_type.as_str()),
            managed: pool.managed,
            path: pool.path.clone(),
            node_id: pool.node_id.clone(),
            capabilities,
        }
    }

    /// 是否为宿主机可直接按路径访问的文件协议存储
    pub fn is_file_protocol(&self) -> bool {
        self.pool_type.is_file_protocol()
    }

    pub fn descriptor(&self) -> StoreDescriptor {
        StoreDescriptor {
            id: self.id.clone(),
            uuid: self.id.clone(),
            name: self.name.clone(),
            role: self.role,
            scope: self.scope,
            scope_id: self.scope_id.clone(),
            pool_type: self.pool_type,
            path: self.path.clone(),
            managed: self.managed,
            details: self.capabilities.clone(),
        }
    }
}

/// 数据对象（标签联合）
///
/// 新增对象种类时，所有分发点都会强制通过编译期穷尽检查
#[derive(Debug, Clone)]
pub enum DataObject {
    Volume(volume::Model),
    Snapshot(snapshot::Model),
    Template(template::Model),
}

impl DataObject {
    pub fn kind(&self) -> DataObjectKind {
        match self {
            DataObject::Volume(_) => DataObjectKind::Volume,
            DataObject::Snapshot(_) => DataObjectKind::Snapshot,
            DataObject::Template(_) => DataObjectKind::Template,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            DataObject::Volume(v) => &v.id,
            DataObject::Snapshot(s) => &s.id,
            DataObject::Template(t) => &t.id,
        }
    }

    pub fn uuid(&self) -> &str {
        match self {
            DataObject::Volume(v) => &v.uuid,
            DataObject::Snapshot(s) => &s.uuid,
            DataObject::Template(t) => &t.uuid,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DataObject::Volume(v) => &v.name,
            DataObject::Snapshot(s) => &s.name,
            DataObject::Template(t) => &t.name,
        }
    }

    pub fn pool_id(&self) -> &str {
        match self {
            DataObject::Volume(v) => &v.pool_id,
            DataObject::Snapshot(s) => &s.pool_id,
            DataObject::Template(t) => &t.pool_id,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            DataObject::Volume(v) => v.path.as_deref(),
            DataObject::Snapshot(s) => s.path.as_deref(),
            DataObject::Template(t) => t.path.as_deref(),
        }
    }

    pub fn size_gb(&self) -> i64 {
        match self {
            DataObject::Volume(v) => v.size_gb,
            DataObject::Snapshot(s) => s.size_gb.unwrap_or(0),
            DataObject::Template(t) => t.size_gb,
        }
    }

    pub fn format(&self) -> Option<DiskFormat> {
        match self {
            DataObject::Volume(v) => Some(DiskFormat::from(v.format.as_str())),
            DataObject::Snapshot(_) => None,
            DataObject::Template(t) => Some(DiskFormat::from(t.format.as_str())),
        }
    }

    pub fn state(&self) -> ObjectState {
        let raw = match self {
            DataObject::Volume(v) => v.state.as_str(),
            DataObject::Snapshot(s) => s.state.as_str(),
            DataObject::Template(t) => t.state.as_str(),
        };
        ObjectState::from(raw)
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            kind: self.kind(),
            id: self.id().to_string(),
        }
    }
}

/// 目录访问用的对象引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: DataObjectKind,
    pub id: String,
}

impl ObjectRef {
    pub fn volume(id: impl Into<String>) -> Self {
        Self { kind: DataObjectKind::Volume, id: id.into() }
    }
}

/// 对象 + 其所在存储后端
///
/// 复制/迁移操作两端的基本单位。不变式：对象始终恰好属于一个后端，
/// 复制完成前数据归属权不转移
#[derive(Debug, Clone)]
pub struct DataEntry {
    pub object: DataObject,
    pub store: DataStore,
}

impl DataEntry {
    pub fn new(object: DataObject, store: DataStore) -> Self {
        Self { object, store }
    }

    pub fn kind(&self) -> DataObjectKind {
        self.object.kind()
    }

    pub fn descriptor(&self) -> DataObjectDescriptor {
        DataObjectDescriptor {
            kind: self.object.kind(),
            id: self.object.id().to_string(),
            uuid: self.object.uuid().to_string(),
            name: self.object.name().to_string(),
            path: self.object.path().map(|p| p.to_string()),
            format: self.object.format(),
            size_gb: self.object.size_gb(),
            state: self.object.state().as_str().to_string(),
            store: self.store.descriptor(),
            parent_path: None,
        }
    }
}
