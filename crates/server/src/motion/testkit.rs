/// 引擎测试替身
///
/// 内存目录、脚本化命令通道、固定端点选择器，
/// 以及目录行构造器。仅测试编译

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use common::models::DataObjectKind;
use common::ws_rpc::{
    CheckStorageAvailabilityResponse, ConnectVolumeResponse, CopyObjectResponse,
    CreateObjectResponse, DeleteObjectResponse, DisconnectVolumeResponse,
    MigrateVmWithStorageResponse, MigrateVolumeResponse, ModifyTargetsResponse,
    PrepareForMigrationResponse, ResignatureResponse,
};
use common::{Error, Result};

use crate::db::models::{
    node, object_cache, snapshot, storage_pool, template, template_pool, vm, volume,
};

use super::catalog::{MotionCatalog, ObjectChanges};
use super::endpoint::{EndpointSelector, HostEndpoint};
use super::lifecycle::{self, ObjectEvent, ObjectState};
use super::object::{DataEntry, DataObject, DataStore, ObjectRef};
use super::runner::{AgentAnswer, AgentCommand, CommandRunner};

// ============================================================================
// 目录行构造器
// ============================================================================

pub struct PoolBuilder {
    model: storage_pool::Model,
}

pub fn pool_builder(id: &str) -> PoolBuilder {
    let now = Utc::now();
    PoolBuilder {
        model: storage_pool::Model {
            id: id.to_string(),
            name: format!("pool-{}", id),
            pool_type: "nfs".to_string(),
            role: "primary".to_string(),
            scope: "zone".to_string(),
            scope_id: None,
            managed: false,
            status: "active".to_string(),
            path: Some(format!("/mnt/{}", id)),
            capabilities: serde_json::json!({}),
            capacity_gb: Some(1024),
            allocated_gb: Some(0),
            available_gb: Some(1024),
            node_id: None,
            metadata: None,
            created_at: now.into(),
            updated_at: now.into(),
        },
    }
}

impl PoolBuilder {
    pub fn pool_type(mut self, t: &str) -> Self {
        self.model.pool_type = t.to_string();
        self
    }

    pub fn role(mut self, r: &str) -> Self {
        self.model.role = r.to_string();
        self
    }

    pub fn scope(mut self, s: &str) -> Self {
        self.model.scope = s.to_string();
        self
    }

    pub fn scope_id(mut self, s: &str) -> Self {
        self.model.scope_id = Some(s.to_string());
        self
    }

    pub fn node_id(mut self, n: &str) -> Self {
        self.model.node_id = Some(n.to_string());
        self
    }

    pub fn managed(mut self, m: bool) -> Self {
        self.model.managed = m;
        self
    }

    pub fn path(mut self, p: &str) -> Self {
        self.model.path = Some(p.to_string());
        self
    }

    pub fn capability(mut self, key: &str, value: &str) -> Self {
        if let Some(obj) = self.model.capabilities.as_object_mut() {
            obj.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        }
        self
    }

    pub fn build(self) -> storage_pool::Model {
        self.model
    }
}

pub struct VolumeBuilder {
    model: volume::Model,
}

pub fn volume_builder(id: &str, pool_id: &str) -> VolumeBuilder {
    let now = Utc::now();
    VolumeBuilder {
        model: volume::Model {
            id: id.to_string(),
            uuid: format!("uuid-{}", id),
            name: format!("vol-{}", id),
            volume_kind: "data".to_string(),
            format: "qcow2".to_string(),
            size_gb: 10,
            pool_id: pool_id.to_string(),
            last_pool_id: None,
            path: Some(format!("/mnt/{}/{}.qcow2", pool_id, id)),
            folder: None,
            chain_info: None,
            array_id: None,
            state: "ready".to_string(),
            node_id: None,
            vm_id: None,
            template_id: None,
            removed_at: None,
            metadata: None,
            created_at: now.into(),
            updated_at: now.into(),
        },
    }
}

impl VolumeBuilder {
    pub fn state(mut self, s: &str) -> Self {
        self.model.state = s.to_string();
        self
    }

    pub fn uuid(mut self, u: &str) -> Self {
        self.model.uuid = u.to_string();
        self
    }

    pub fn vm_id(mut self, v: &str) -> Self {
        self.model.vm_id = Some(v.to_string());
        self
    }

    pub fn volume_kind(mut self, k: &str) -> Self {
        self.model.volume_kind = k.to_string();
        self
    }

    pub fn template_id(mut self, t: &str) -> Self {
        self.model.template_id = Some(t.to_string());
        self
    }

    pub fn path(mut self, p: &str) -> Self {
        self.model.path = Some(p.to_string());
        self
    }

    pub fn no_path(mut self) -> Self {
        self.model.path = None;
        self
    }

    pub fn build(self) -> volume::Model {
        self.model
    }
}

pub struct SnapshotBuilder {
    model: snapshot::Model,
}

pub fn snapshot_builder(id: &str, volume_id: &str, pool_id: &str) -> SnapshotBuilder {
    let now = Utc::now();
    SnapshotBuilder {
        model: snapshot::Model {
            id: id.to_string(),
            uuid: format!("uuid-{}", id),
            name: format!("snap-{}", id),
            volume_id: volume_id.to_string(),
            parent_snapshot_id: None,
            pool_id: pool_id.to_string(),
            path: Some(format!("/mnt/{}/snap-{}", pool_id, id)),
            state: "ready".to_string(),
            size_gb: Some(10),
            removed_at: None,
            metadata: None,
            created_at: now.into(),
            updated_at: now.into(),
        },
    }
}

impl SnapshotBuilder {
    pub fn state(mut self, s: &str) -> Self {
        self.model.state = s.to_string();
        self
    }

    pub fn parent(mut self, p: &str) -> Self {
        self.model.parent_snapshot_id = Some(p.to_string());
        self
    }

    pub fn build(self) -> snapshot::Model {
        self.model
    }
}

pub struct TemplateBuilder {
    model: template::Model,
}

pub fn template_builder(id: &str, pool_id: &str) -> TemplateBuilder {
    let now = Utc::now();
    TemplateBuilder {
        model: template::Model {
            id: id.to_string(),
            uuid: format!("uuid-{}", id),
            name: format!("tmpl-{}", id),
            format: "qcow2".to_string(),
            size_gb: 8,
            hypervisor_type: Some("kvm".to_string()),
            pool_id: pool_id.to_string(),
            path: Some(format!("/mnt/{}/tmpl-{}", pool_id, id)),
            state: "ready".to_string(),
            removed_at: None,
            metadata: None,
            created_at: now.into(),
            updated_at: now.into(),
        },
    }
}

impl TemplateBuilder {
    pub fn state(mut self, s: &str) -> Self {
        self.model.state = s.to_string();
        self
    }

    pub fn build(self) -> template::Model {
        self.model
    }
}

pub fn vm_model(id: &str, name: &str, node_id: &str, os_type: &str) -> vm::Model {
    let now = Utc::now();
    vm::Model {
        id: id.to_string(),
        name: name.to_string(),
        node_id: Some(node_id.to_string()),
        status: "running".to_string(),
        os_type: os_type.to_string(),
        metadata: None,
        created_at: now.into(),
        updated_at: now.into(),
    }
}

pub fn host_endpoint(node_id: &str) -> HostEndpoint {
    HostEndpoint {
        node_id: node_id.to_string(),
        hostname: format!("host-{}", node_id),
        ip_address: "10.0.0.1".to_string(),
        cluster_id: Some("c1".to_string()),
        hypervisor_type: Some("kvm".to_string()),
    }
}

// ============================================================================
// 常用端点组合
// ============================================================================

/// NFS 主存储上的就绪卷
pub fn volume_entry_on_nfs(volume_id: &str, pool_id: &str) -> DataEntry {
    let pool = pool_builder(pool_id).pool_type("nfs").build();
    let vol = volume_builder(volume_id, pool_id).build();
    DataEntry::new(DataObject::Volume(vol), DataStore::from_pool(&pool))
}

/// 托管 iSCSI 池上的就绪卷
pub fn managed_volume_entry(volume_id: &str, pool_id: &str) -> DataEntry {
    let pool = pool_builder(pool_id)
        .pool_type("iscsi")
        .managed(true)
        .build();
    let vol = volume_builder(volume_id, pool_id).build();
    DataEntry::new(DataObject::Volume(vol), DataStore::from_pool(&pool))
}

/// 带指定能力的池上的就绪卷
pub fn entry_with_capability(volume_id: &str, pool_id: &str, cap: &str, value: &str) -> DataEntry {
    let pool = pool_builder(pool_id).capability(cap, value).build();
    let vol = volume_builder(volume_id, pool_id).build();
    DataEntry::new(DataObject::Volume(vol), DataStore::from_pool(&pool))
}

// ============================================================================
// 脚本化命令通道
// ============================================================================

pub struct ScriptedRunner {
    answers: Mutex<VecDeque<AgentAnswer>>,
    fail_methods: std::sync::Mutex<Vec<String>>,
    sent: std::sync::Mutex<Vec<(String, AgentCommand)>>,
}

pub fn scripted_runner() -> Arc<ScriptedRunner> {
    Arc::new(ScriptedRunner {
        answers: Mutex::new(VecDeque::new()),
        fail_methods: std::sync::Mutex::new(Vec::new()),
        sent: std::sync::Mutex::new(Vec::new()),
    })
}

impl ScriptedRunner {
    /// 预置一条应答（按发送顺序消费）
    pub async fn push(&self, answer: AgentAnswer) {
        self.answers.lock().await.push_back(answer);
    }

    /// 指定方法一律返回失败应答
    pub fn fail_on(&self, method: &str) {
        self.fail_methods.lock().unwrap().push(method.to_string());
    }

    /// 已发送的命令记录
    pub fn sent(&self) -> Vec<(String, AgentCommand)> {
        self.sent.lock().unwrap().clone()
    }

    /// 队列耗尽后按命令类型合成的成功应答
    fn default_success(command: &AgentCommand) -> AgentAnswer {
        let ok = "ok".to_string();
        match command {
            AgentCommand::Copy(req) => AgentAnswer::Copy(CopyObjectResponse {
                success: true,
                message: ok,
                new_object: Some(req.dest.clone()),
            }),
            AgentCommand::Create(req) => AgentAnswer::Create(CreateObjectResponse {
                success: true,
                message: ok,
                path: Some(format!("/mnt/{}/{}", req.object.store.id, req.object.uuid)),
                size_gb: Some(req.object.size_gb),
            }),
            AgentCommand::Delete(_) => AgentAnswer::Delete(DeleteObjectResponse {
                success: true,
                message: ok,
            }),
            AgentCommand::MigrateVolume(_) => AgentAnswer::MigrateVolume(MigrateVolumeResponse {
                success: true,
                message: ok,
                new_path: None,
                new_chain_info: None,
            }),
            AgentCommand::PrepareForMigration(_) => {
                AgentAnswer::PrepareForMigration(PrepareForMigrationResponse {
                    success: true,
                    message: ok,
                })
            }
            AgentCommand::MigrateVmWithStorage(_) => {
                AgentAnswer::MigrateVmWithStorage(MigrateVmWithStorageResponse {
                    success: true,
                    message: ok,
                })
            }
            AgentCommand::Resignature(req) => AgentAnswer::Resignature(ResignatureResponse {
                success: true,
                message: ok,
                new_path: req.details.get("path").cloned(),
                new_size_gb: None,
            }),
            AgentCommand::ModifyTargets(_) => AgentAnswer::ModifyTargets(ModifyTargetsResponse {
                success: true,
                message: ok,
            }),
            AgentCommand::CheckStorageAvailability(req) => {
                AgentAnswer::CheckStorageAvailability(CheckStorageAvailabilityResponse {
                    success: true,
                    message: ok,
                    available: req
                        .pools_by_volume
                        .keys()
                        .map(|k| (k.clone(), true))
                        .collect(),
                })
            }
            AgentCommand::ConnectVolume(req) => AgentAnswer::ConnectVolume(ConnectVolumeResponse {
                success: true,
                message: ok,
                path: Some(format!("/mnt/connected/{}", req.object.uuid)),
            }),
            AgentCommand::DisconnectVolume(_) => {
                AgentAnswer::DisconnectVolume(DisconnectVolumeResponse {
                    success: true,
                    message: ok,
                })
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn send(&self, node_id: &str, command: AgentCommand) -> AgentAnswer {
        self.sent
            .lock()
            .unwrap()
            .push((node_id.to_string(), command.clone()));

        if self
            .fail_methods
            .lock()
            .unwrap()
            .iter()
            .any(|m| m == command.method())
        {
            return AgentAnswer::failure(&command, format!("{} 被脚本置为失败", command.method()));
        }

        let queued = self.answers.lock().await.pop_front();
        queued.unwrap_or_else(|| Self::default_success(&command))
    }
}

// ============================================================================
// 固定端点选择器
// ============================================================================

pub struct FixedSelector {
    endpoint: Option<HostEndpoint>,
}

pub fn fixed_selector(endpoint: Option<HostEndpoint>) -> Arc<FixedSelector> {
    Arc::new(FixedSelector { endpoint })
}

#[async_trait]
impl EndpointSelector for FixedSelector {
    async fn select(&self, _src: &DataStore, _dest: &DataStore) -> Result<Option<HostEndpoint>> {
        Ok(self.endpoint.clone())
    }

    async fn select_for_store(&self, _store: &DataStore) -> Result<Option<HostEndpoint>> {
        Ok(self.endpoint.clone())
    }
}

// ============================================================================
// 引擎上下文组装
// ============================================================================

/// 用测试替身组装引擎上下文
pub fn context(
    catalog: Arc<MemoryCatalog>,
    runner: Arc<ScriptedRunner>,
    selector: Arc<FixedSelector>,
) -> Arc<super::MotionContext> {
    let config = super::MotionConfig::default();
    let cache = Arc::new(super::cache::CacheManager::new(
        catalog.clone(),
        runner.clone(),
        selector.clone(),
        config.clone(),
    ));
    let drivers = Arc::new(super::driver::DriverRegistry::new(
        runner.clone(),
        selector.clone(),
        catalog.clone(),
        config.clone(),
    ));
    Arc::new(super::MotionContext {
        catalog,
        runner,
        selector,
        cache,
        drivers,
        config,
    })
}

// ============================================================================
// 内存目录
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    volumes: HashMap<String, volume::Model>,
    snapshots: HashMap<String, snapshot::Model>,
    templates: HashMap<String, template::Model>,
    pools: HashMap<String, storage_pool::Model>,
    vms: HashMap<String, vm::Model>,
    nodes: HashMap<String, node::Model>,
    template_refs: Vec<template_pool::Model>,
    details: HashMap<(String, String, String), String>,
    caches: HashMap<String, object_cache::Model>,
}

pub struct MemoryCatalog {
    inner: Mutex<MemoryInner>,
}

pub fn memory_catalog() -> Arc<MemoryCatalog> {
    Arc::new(MemoryCatalog {
        inner: Mutex::new(MemoryInner::default()),
    })
}

impl MemoryCatalog {
    pub async fn add_pool(&self, pool: storage_pool::Model) {
        self.inner.lock().await.pools.insert(pool.id.clone(), pool);
    }

    pub async fn add_volume(&self, vol: volume::Model) {
        self.inner.lock().await.volumes.insert(vol.id.clone(), vol);
    }

    pub async fn add_snapshot(&self, snap: snapshot::Model) {
        self.inner.lock().await.snapshots.insert(snap.id.clone(), snap);
    }

    pub async fn add_template(&self, tmpl: template::Model) {
        self.inner.lock().await.templates.insert(tmpl.id.clone(), tmpl);
    }

    pub async fn add_vm(&self, m: vm::Model) {
        self.inner.lock().await.vms.insert(m.id.clone(), m);
    }

    pub async fn add_template_ref(&self, template_id: &str, pool_id: &str, path: &str) {
        let now = Utc::now();
        self.inner.lock().await.template_refs.push(template_pool::Model {
            id: common::utils::generate_id(),
            template_id: template_id.to_string(),
            pool_id: pool_id.to_string(),
            path: Some(path.to_string()),
            state: "ready".to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        });
    }

    pub async fn cache_rows(&self) -> Vec<object_cache::Model> {
        self.inner.lock().await.caches.values().cloned().collect()
    }

    pub async fn all_volumes(&self) -> Vec<volume::Model> {
        self.inner.lock().await.volumes.values().cloned().collect()
    }

    fn detail_key(object: &ObjectRef, name: &str) -> (String, String, String) {
        (
            object.kind.as_str().to_string(),
            object.id.clone(),
            name.to_string(),
        )
    }
}

#[async_trait]
impl MotionCatalog for MemoryCatalog {
    async fn volume(&self, id: &str) -> Result<Option<volume::Model>> {
        Ok(self.inner.lock().await.volumes.get(id).cloned())
    }

    async fn snapshot(&self, id: &str) -> Result<Option<snapshot::Model>> {
        Ok(self.inner.lock().await.snapshots.get(id).cloned())
    }

    async fn template(&self, id: &str) -> Result<Option<template::Model>> {
        Ok(self.inner.lock().await.templates.get(id).cloned())
    }

    async fn pool(&self, id: &str) -> Result<Option<storage_pool::Model>> {
        Ok(self.inner.lock().await.pools.get(id).cloned())
    }

    async fn vm(&self, id: &str) -> Result<Option<vm::Model>> {
        Ok(self.inner.lock().await.vms.get(id).cloned())
    }

    async fn node(&self, id: &str) -> Result<Option<node::Model>> {
        Ok(self.inner.lock().await.nodes.get(id).cloned())
    }

    async fn volumes_of_vm(&self, vm_id: &str) -> Result<Vec<volume::Model>> {
        Ok(self
            .inner
            .lock()
            .await
            .volumes
            .values()
            .filter(|v| v.vm_id.as_deref() == Some(vm_id) && v.removed_at.is_none())
            .cloned()
            .collect())
    }

    async fn snapshots_of_volume(&self, volume_id: &str) -> Result<Vec<snapshot::Model>> {
        Ok(self
            .inner
            .lock()
            .await
            .snapshots
            .values()
            .filter(|s| s.volume_id == volume_id && s.removed_at.is_none())
            .cloned()
            .collect())
    }

    async fn template_ref_on_pool(
        &self,
        template_id: &str,
        pool_id: &str,
    ) -> Result<Option<template_pool::Model>> {
        Ok(self
            .inner
            .lock()
            .await
            .template_refs
            .iter()
            .find(|r| r.template_id == template_id && r.pool_id == pool_id)
            .cloned())
    }

    async fn transition(
        &self,
        object: &ObjectRef,
        event: ObjectEvent,
        changes: ObjectChanges,
    ) -> Result<ObjectState> {
        let mut inner = self.inner.lock().await;
        match object.kind {
            DataObjectKind::Volume => {
                let row = inner
                    .volumes
                    .get_mut(&object.id)
                    .ok_or_else(|| Error::NotFound(format!("存储卷不存在: {}", object.id)))?;
                let next = lifecycle::transition(ObjectState::from(row.state.as_str()), event)?;
                row.state = next.as_str().to_string();
                if let Some(path) = changes.path {
                    row.path = Some(path);
                }
                if let Some(folder) = changes.folder {
                    row.folder = Some(folder);
                }
                if let Some(chain_info) = changes.chain_info {
                    row.chain_info = Some(chain_info);
                }
                if let Some(pool_id) = changes.pool_id {
                    row.pool_id = pool_id;
                }
                if let Some(last_pool_id) = changes.last_pool_id {
                    row.last_pool_id = Some(last_pool_id);
                }
                if let Some(size_gb) = changes.size_gb {
                    row.size_gb = size_gb;
                }
                if let Some(array_id) = changes.array_id {
                    row.array_id = Some(array_id);
                }
                if let Some(node_id) = changes.node_id {
                    row.node_id = Some(node_id);
                }
                Ok(next)
            }
            DataObjectKind::Snapshot => {
                let row = inner
                    .snapshots
                    .get_mut(&object.id)
                    .ok_or_else(|| Error::NotFound(format!("快照不存在: {}", object.id)))?;
                let next = lifecycle::transition(ObjectState::from(row.state.as_str()), event)?;
                row.state = next.as_str().to_string();
                if let Some(path) = changes.path {
                    row.path = Some(path);
                }
                if let Some(pool_id) = changes.pool_id {
                    row.pool_id = pool_id;
                }
                if let Some(size_gb) = changes.size_gb {
                    row.size_gb = Some(size_gb);
                }
                Ok(next)
            }
            DataObjectKind::Template => {
                let row = inner
                    .templates
                    .get_mut(&object.id)
                    .ok_or_else(|| Error::NotFound(format!("模板不存在: {}", object.id)))?;
                let next = lifecycle::transition(ObjectState::from(row.state.as_str()), event)?;
                row.state = next.as_str().to_string();
                if let Some(path) = changes.path {
                    row.path = Some(path);
                }
                if let Some(pool_id) = changes.pool_id {
                    row.pool_id = pool_id;
                }
                if let Some(size_gb) = changes.size_gb {
                    row.size_gb = size_gb;
                }
                Ok(next)
            }
        }
    }

    async fn duplicate_volume(&self, volume_id: &str, dest_pool_id: &str) -> Result<volume::Model> {
        let mut inner = self.inner.lock().await;
        let src = inner
            .volumes
            .get(volume_id)
            .ok_or_else(|| Error::NotFound(format!("存储卷不存在: {}", volume_id)))?
            .clone();
        let now = Utc::now();

        let dup = volume::Model {
            id: common::utils::generate_id(),
            uuid: common::utils::generate_id(),
            name: src.name.clone(),
            volume_kind: src.volume_kind.clone(),
            format: src.format.clone(),
            size_gb: src.size_gb,
            pool_id: dest_pool_id.to_string(),
            last_pool_id: Some(src.pool_id.clone()),
            path: None,
            folder: None,
            chain_info: None,
            array_id: None,
            state: ObjectState::Allocated.as_str().to_string(),
            node_id: None,
            vm_id: None,
            template_id: src.template_id.clone(),
            removed_at: None,
            metadata: src.metadata.clone(),
            created_at: now.into(),
            updated_at: now.into(),
        };
        inner.volumes.insert(dup.id.clone(), dup.clone());
        Ok(dup)
    }

    async fn adopt_volume_identity(&self, source_id: &str, dest_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let src = inner
            .volumes
            .get(source_id)
            .ok_or_else(|| Error::NotFound(format!("存储卷不存在: {}", source_id)))?
            .clone();
        let dest = inner
            .volumes
            .get(dest_id)
            .ok_or_else(|| Error::NotFound(format!("存储卷不存在: {}", dest_id)))?
            .clone();

        if let Some(row) = inner.volumes.get_mut(source_id) {
            row.uuid = dest.uuid.clone();
            row.vm_id = None;
        }
        if let Some(row) = inner.volumes.get_mut(dest_id) {
            row.uuid = src.uuid.clone();
            row.name = src.name.clone();
            row.vm_id = src.vm_id.clone();
        }
        Ok(())
    }

    async fn reparent_snapshots(&self, from_volume_id: &str, to_volume_id: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut count = 0;
        for snap in inner.snapshots.values_mut() {
            if snap.volume_id == from_volume_id && snap.removed_at.is_none() {
                snap.volume_id = to_volume_id.to_string();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn expunge(&self, object: &ObjectRef) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        match object.kind {
            DataObjectKind::Volume => {
                if let Some(row) = inner.volumes.get_mut(&object.id) {
                    row.removed_at = Some(now.into());
                }
            }
            DataObjectKind::Snapshot => {
                if let Some(row) = inner.snapshots.get_mut(&object.id) {
                    row.removed_at = Some(now.into());
                }
            }
            DataObjectKind::Template => {
                if let Some(row) = inner.templates.get_mut(&object.id) {
                    row.removed_at = Some(now.into());
                }
            }
        }
        Ok(())
    }

    async fn set_detail(&self, object: &ObjectRef, name: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .await
            .details
            .insert(Self::detail_key(object, name), value.to_string());
        Ok(())
    }

    async fn get_detail(&self, object: &ObjectRef, name: &str) -> Result<Option<String>> {
        Ok(self
            .inner
            .lock()
            .await
            .details
            .get(&Self::detail_key(object, name))
            .cloned())
    }

    async fn remove_detail(&self, object: &ObjectRef, name: &str) -> Result<()> {
        self.inner
            .lock()
            .await
            .details
            .remove(&Self::detail_key(object, name));
        Ok(())
    }

    async fn cache_entry(
        &self,
        source_uuid: &str,
        store_id: &str,
    ) -> Result<Option<object_cache::Model>> {
        Ok(self
            .inner
            .lock()
            .await
            .caches
            .values()
            .find(|c| c.source_uuid == source_uuid && c.store_id == store_id)
            .cloned())
    }

    async fn insert_cache_entry(&self, entry: object_cache::Model) -> Result<object_cache::Model> {
        self.inner
            .lock()
            .await
            .caches
            .insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn update_cache_entry(
        &self,
        id: &str,
        path: Option<String>,
        state: Option<String>,
        ref_delta: i32,
    ) -> Result<Option<object_cache::Model>> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.caches.get_mut(id) else {
            return Ok(None);
        };
        if let Some(path) = path {
            row.path = Some(path);
        }
        if let Some(state) = state {
            row.state = state;
        }
        row.ref_count += ref_delta;
        Ok(Some(row.clone()))
    }

    async fn delete_cache_entry(&self, id: &str) -> Result<()> {
        self.inner.lock().await.caches.remove(id);
        Ok(())
    }

    async fn image_cache_stores(&self) -> Result<Vec<storage_pool::Model>> {
        Ok(self
            .inner
            .lock()
            .await
            .pools
            .values()
            .filter(|p| p.role == "image_cache" && p.status == "active")
            .cloned()
            .collect())
    }

    async fn image_stores(&self) -> Result<Vec<storage_pool::Model>> {
        Ok(self
            .inner
            .lock()
            .await
            .pools
            .values()
            .filter(|p| p.role == "image" && p.status == "active")
            .cloned()
            .collect())
    }
}
