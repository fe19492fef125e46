/// 中转缓存管理
///
/// 当复制两端无法由单台宿主机直达时，在 image_cache 角色存储上
/// 放置源对象的临时副本。引用计数协调并发共享；
/// 计数增减与到零删除都在同一把按键互斥锁内完成，
/// 不存在递减与删除之间的竞态窗口

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use common::models::{DataObjectKind, StoreScope};
use common::ws_rpc::{CopyObjectRequest, DataObjectDescriptor, DeleteObjectRequest};
use common::{Error, Result};

use crate::db::models::object_cache;

use super::catalog::MotionCatalog;
use super::endpoint::EndpointSelector;
use super::locks::NamedLocks;
use super::object::{DataEntry, DataStore};
use super::runner::{AgentAnswer, AgentCommand, CommandRunner};
use super::MotionConfig;

/// 引用计数操作的锁获取时限（秒）
const CACHE_LOCK_WAIT_SECS: u64 = 60;

/// 已就位的缓存副本
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub row: object_cache::Model,
    pub store: DataStore,
    /// 本次调用是否是该缓存条目的创建者
    pub created_here: bool,
}

impl CacheEntry {
    /// 以缓存副本替换源端，生成复制命令用的描述符
    pub fn descriptor(&self, src: &DataEntry) -> DataObjectDescriptor {
        let mut desc = src.descriptor();
        desc.path = self.row.path.clone();
        desc.store = self.store.descriptor();
        desc
    }

    fn lock_key(source_uuid: &str, store_id: &str) -> String {
        format!("cache-{}@{}", source_uuid, store_id)
    }
}

pub struct CacheManager {
    catalog: Arc<dyn MotionCatalog>,
    runner: Arc<dyn CommandRunner>,
    selector: Arc<dyn EndpointSelector>,
    locks: NamedLocks,
    config: MotionConfig,
}

impl CacheManager {
    pub fn new(
        catalog: Arc<dyn MotionCatalog>,
        runner: Arc<dyn CommandRunner>,
        selector: Arc<dyn EndpointSelector>,
        config: MotionConfig,
    ) -> Self {
        Self {
            catalog,
            runner,
            selector,
            locks: NamedLocks::new(),
            config,
        }
    }

    /// 选择缓存存储
    ///
    /// 取两端都可达的最窄作用域：优先源端作用域，其次目标端，
    /// 否则回退任一 Zone 级缓存存储
    async fn pick_cache_store(
        &self,
        src: &DataStore,
        dest: &DataStore,
    ) -> Result<Option<DataStore>> {
        let stores: Vec<DataStore> = self
            .catalog
            .image_cache_stores()
            .await?
            .iter()
            .map(DataStore::from_pool)
            .collect();

        let scope_match = |cand: &DataStore, target: &DataStore| {
            cand.scope == target.scope && cand.scope_id == target.scope_id
        };

        if let Some(s) = stores.iter().find(|c| scope_match(c, src)) {
            return Ok(Some(s.clone()));
        }
        if let Some(s) = stores.iter().find(|c| scope_match(c, dest)) {
            return Ok(Some(s.clone()));
        }
        Ok(stores.into_iter().find(|c| c.scope == StoreScope::Zone))
    }

    /// 两端之间是否存在可共享的缓存存储
    pub async fn has_cache_store(&self, src: &DataStore, dest: &DataStore) -> Result<bool> {
        Ok(self.pick_cache_store(src, dest).await?.is_some())
    }

    /// 获取或建立源对象的缓存副本
    ///
    /// 已有就绪副本时仅递增引用；否则建行并复制数据，
    /// 复制失败立即删行并返回错误
    pub async fn create_or_get(&self, src: &DataEntry, dest_store: &DataStore) -> Result<CacheEntry> {
        let store = self
            .pick_cache_store(&src.store, dest_store)
            .await?
            .ok_or_else(|| Error::Storage("没有可用的中转缓存存储".to_string()))?;

        let key = CacheEntry::lock_key(src.object.uuid(), &store.id);
        let _guard = self
            .locks
            .acquire(&key, Duration::from_secs(CACHE_LOCK_WAIT_SECS))
            .await?;

        if let Some(row) = self.catalog.cache_entry(src.object.uuid(), &store.id).await? {
            if row.state == "ready" {
                let row = self
                    .catalog
                    .update_cache_entry(&row.id, None, None, 1)
                    .await?
                    .ok_or_else(|| Error::Internal("缓存行在引用期间消失".to_string()))?;
                debug!(
                    "复用缓存副本: source={}, store={}, refs={}",
                    row.source_uuid, row.store_id, row.ref_count
                );
                return Ok(CacheEntry {
                    row,
                    store,
                    created_here: false,
                });
            }
            // 上次创建半途而废的残留，清掉重建
            warn!("清理未就绪的缓存残留: id={}, state={}", row.id, row.state);
            self.catalog.delete_cache_entry(&row.id).await?;
        }

        let now = Utc::now();
        let row = self
            .catalog
            .insert_cache_entry(object_cache::Model {
                id: common::utils::generate_id(),
                kind: src.kind().as_str().to_string(),
                source_uuid: src.object.uuid().to_string(),
                store_id: store.id.clone(),
                path: None,
                size_gb: src.object.size_gb(),
                state: "creating".to_string(),
                ref_count: 1,
                created_at: now.into(),
                updated_at: now.into(),
            })
            .await?;

        match self.populate(src, &store).await {
            Ok(path) => {
                let row = self
                    .catalog
                    .update_cache_entry(&row.id, path, Some("ready".to_string()), 0)
                    .await?
                    .ok_or_else(|| Error::Internal("缓存行在创建期间消失".to_string()))?;
                info!(
                    "缓存副本就绪: source={}, store={}",
                    row.source_uuid, row.store_id
                );
                Ok(CacheEntry {
                    row,
                    store,
                    created_here: true,
                })
            }
            Err(e) => {
                // 创建失败立即删除，不留半成品
                if let Err(del) = self.catalog.delete_cache_entry(&row.id).await {
                    warn!("清理失败的缓存行出错（忽略）: {}", del);
                }
                Err(e)
            }
        }
    }

    /// 向缓存存储复制源数据
    async fn populate(&self, src: &DataEntry, store: &DataStore) -> Result<Option<String>> {
        let endpoint = self
            .selector
            .select(&src.store, store)
            .await?
            .ok_or_else(|| Error::Remote("没有可触达缓存存储的端点".to_string()))?;

        let mut dest_desc = src.descriptor();
        dest_desc.path = None;
        dest_desc.store = store.descriptor();

        let command = AgentCommand::Copy(CopyObjectRequest {
            src: src.descriptor(),
            dest: dest_desc,
            wait_secs: self.config.copy_volume_wait_secs,
            execute_in_sequence: self.config.execute_in_sequence,
            options: Default::default(),
        });

        match self.runner.send(&endpoint.node_id, command).await {
            AgentAnswer::Copy(resp) if resp.success => {
                Ok(resp.new_object.and_then(|o| o.path))
            }
            other => Err(Error::Remote(format!("缓存复制失败: {}", other.message()))),
        }
    }

    /// 释放一次引用；最后一个使用者释放时删除副本
    pub async fn release(&self, entry: &CacheEntry) -> Result<()> {
        let key = CacheEntry::lock_key(&entry.row.source_uuid, &entry.row.store_id);
        let _guard = self
            .locks
            .acquire(&key, Duration::from_secs(CACHE_LOCK_WAIT_SECS))
            .await?;

        let Some(row) = self
            .catalog
            .update_cache_entry(&entry.row.id, None, None, -1)
            .await?
        else {
            return Ok(());
        };

        if row.ref_count <= 0 {
            debug!("最后引用已释放，删除缓存副本: id={}", row.id);
            self.catalog.delete_cache_entry(&row.id).await?;
            self.remote_delete(&row, &entry.store).await;
        }
        Ok(())
    }

    /// 无条件删除缓存副本（卷数据下次必须重读最新源）
    pub async fn delete(&self, entry: &CacheEntry) -> Result<()> {
        let key = CacheEntry::lock_key(&entry.row.source_uuid, &entry.row.store_id);
        let _guard = self
            .locks
            .acquire(&key, Duration::from_secs(CACHE_LOCK_WAIT_SECS))
            .await?;

        self.catalog.delete_cache_entry(&entry.row.id).await?;
        self.remote_delete(&entry.row, &entry.store).await;
        Ok(())
    }

    /// 删除后端上的缓存数据（尽力而为）
    async fn remote_delete(&self, row: &object_cache::Model, store: &DataStore) {
        let endpoint = match self.selector.select_for_store(store).await {
            Ok(Some(ep)) => ep,
            _ => {
                warn!("缓存数据清理暂不可达: id={}", row.id);
                return;
            }
        };

        let object = DataObjectDescriptor {
            kind: match row.kind.as_str() {
                "volume" => DataObjectKind::Volume,
                "snapshot" => DataObjectKind::Snapshot,
                _ => DataObjectKind::Template,
            },
            id: row.id.clone(),
            uuid: row.source_uuid.clone(),
            name: format!("cache-{}", row.source_uuid),
            path: row.path.clone(),
            format: None,
            size_gb: row.size_gb,
            state: row.state.clone(),
            store: store.descriptor(),
            parent_path: None,
        };

        let answer = self
            .runner
            .send(
                &endpoint.node_id,
                AgentCommand::Delete(DeleteObjectRequest { object }),
            )
            .await;
        if !answer.success() {
            warn!("缓存数据清理失败（忽略）: id={}, error={}", row.id, answer.message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::testkit;

    async fn manager_with_zone_cache() -> (
        Arc<testkit::MemoryCatalog>,
        Arc<testkit::ScriptedRunner>,
        CacheManager,
    ) {
        let catalog = testkit::memory_catalog();
        catalog
            .add_pool(testkit::pool_builder("cache1").role("image_cache").scope("zone").build())
            .await;
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n1")));
        let manager = CacheManager::new(
            catalog.clone(),
            runner.clone(),
            selector,
            MotionConfig::default(),
        );
        (catalog, runner, manager)
    }

    #[tokio::test]
    async fn test_refcount_net_zero_deletes() {
        let (catalog, _runner, manager) = manager_with_zone_cache().await;
        let src = testkit::volume_entry_on_nfs("v1", "p1");
        let dest = testkit::managed_volume_entry("v2", "p2");

        let mut entries = Vec::new();
        for _ in 0..3 {
            entries.push(manager.create_or_get(&src, &dest.store).await.unwrap());
        }
        assert_eq!(entries[0].created_here, true);
        assert_eq!(entries[2].created_here, false);
        assert_eq!(entries[2].row.ref_count, 3);

        for entry in &entries {
            manager.release(entry).await.unwrap();
        }
        assert!(catalog.cache_rows().await.is_empty());
    }

    #[tokio::test]
    async fn test_not_deleted_while_referenced() {
        let (catalog, _runner, manager) = manager_with_zone_cache().await;
        let src = testkit::volume_entry_on_nfs("v1", "p1");
        let dest = testkit::managed_volume_entry("v2", "p2");

        let a = manager.create_or_get(&src, &dest.store).await.unwrap();
        let b = manager.create_or_get(&src, &dest.store).await.unwrap();

        manager.release(&a).await.unwrap();
        let rows = catalog.cache_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ref_count, 1);

        manager.release(&b).await.unwrap();
        assert!(catalog.cache_rows().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_deletes_immediately() {
        let (catalog, runner, manager) = manager_with_zone_cache().await;
        let src = testkit::volume_entry_on_nfs("v1", "p1");
        let dest = testkit::managed_volume_entry("v2", "p2");

        let copy_shape = AgentCommand::Copy(CopyObjectRequest {
            src: src.descriptor(),
            dest: src.descriptor(),
            wait_secs: 1,
            execute_in_sequence: false,
            options: Default::default(),
        });
        runner.push(AgentAnswer::failure(&copy_shape, "copy blew up")).await;

        let result = manager.create_or_get(&src, &dest.store).await;
        assert!(result.is_err());
        assert!(catalog.cache_rows().await.is_empty());
    }

    #[tokio::test]
    async fn test_cache_store_prefers_source_scope() {
        let catalog = testkit::memory_catalog();
        catalog
            .add_pool(
                testkit::pool_builder("cache-zone").role("image_cache").scope("zone").build(),
            )
            .await;
        catalog
            .add_pool(
                testkit::pool_builder("cache-c1")
                    .role("image_cache")
                    .scope("cluster")
                    .scope_id("c1")
                    .build(),
            )
            .await;
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n1")));
        let manager =
            CacheManager::new(catalog.clone(), runner, selector, MotionConfig::default());

        let src_pool = testkit::pool_builder("p1").scope("cluster").scope_id("c1").build();
        let src = DataEntry::new(
            super::super::object::DataObject::Volume(testkit::volume_builder("v1", "p1").build()),
            DataStore::from_pool(&src_pool),
        );
        let dest = testkit::managed_volume_entry("v2", "p2");

        let entry = manager.create_or_get(&src, &dest.store).await.unwrap();
        assert_eq!(entry.store.id, "cache-c1");
    }
}
