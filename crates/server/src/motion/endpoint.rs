/// 远程执行端点选择
///
/// 给定复制两端的存储后端，挑选一台能同时触达两端的在线宿主机。
/// 选不出端点不是异常：调用方据此合成"无可用端点"的失败应答

use async_trait::async_trait;
use common::models::StoreScope;
use common::Result;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use crate::db::models::node;
use crate::ws::AgentConnectionManager;

use super::object::DataStore;

/// 可执行远程命令的宿主机端点
#[derive(Debug, Clone)]
pub struct HostEndpoint {
    pub node_id: String,
    pub hostname: String,
    pub ip_address: String,
    pub cluster_id: Option<String>,
    pub hypervisor_type: Option<String>,
}

impl HostEndpoint {
    pub fn from_node(n: &node::Model) -> Self {
        Self {
            node_id: n.id.clone(),
            hostname: n.hostname.clone(),
            ip_address: n.ip_address.clone(),
            cluster_id: n.cluster_id.clone(),
            hypervisor_type: n.hypervisor_type.clone(),
        }
    }
}

/// 判断节点能否触达存储后端
///
/// Host 作用域只认挂载它的节点；Cluster 作用域认同集群节点；
/// Zone 作用域全区可达
pub fn node_reaches_store(store: &DataStore, node_id: &str, cluster_id: Option<&str>) -> bool {
    match store.scope {
        StoreScope::Host => store.node_id.as_deref() == Some(node_id),
        StoreScope::Cluster => {
            store.scope_id.is_some() && store.scope_id.as_deref() == cluster_id
        }
        StoreScope::Zone => true,
    }
}

/// 端点选择器抽象
#[async_trait]
pub trait EndpointSelector: Send + Sync {
    /// 选择能同时触达两端的端点
    async fn select(&self, src: &DataStore, dest: &DataStore) -> Result<Option<HostEndpoint>>;

    /// 选择能触达单个后端的端点
    async fn select_for_store(&self, store: &DataStore) -> Result<Option<HostEndpoint>>;
}

/// 基于节点目录 + 在线连接的端点选择器
pub struct DbEndpointSelector {
    db: DatabaseConnection,
    manager: AgentConnectionManager,
}

impl DbEndpointSelector {
    pub fn new(db: DatabaseConnection, manager: AgentConnectionManager) -> Self {
        Self { db, manager }
    }

    async fn online_nodes(&self) -> Result<Vec<node::Model>> {
        let nodes = node::Entity::find()
            .filter(node::Column::Status.eq("online"))
            .order_by_desc(node::Column::LastHeartbeat)
            .all(&self.db)
            .await
            .map_err(|e| common::Error::Database(e.to_string()))?;

        let mut result = Vec::new();
        for n in nodes {
            // 目录在线状态与实时连接状态可能短暂不一致，以连接为准
            if self.manager.is_online(&n.id).await {
                result.push(n);
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl EndpointSelector for DbEndpointSelector {
    async fn select(&self, src: &DataStore, dest: &DataStore) -> Result<Option<HostEndpoint>> {
        let nodes = self.online_nodes().await?;
        let found = nodes.iter().find(|n| {
            node_reaches_store(src, &n.id, n.cluster_id.as_deref())
                && node_reaches_store(dest, &n.id, n.cluster_id.as_deref())
        });
        Ok(found.map(HostEndpoint::from_node))
    }

    async fn select_for_store(&self, store: &DataStore) -> Result<Option<HostEndpoint>> {
        let nodes = self.online_nodes().await?;
        let found = nodes
            .iter()
            .find(|n| node_reaches_store(store, &n.id, n.cluster_id.as_deref()));
        Ok(found.map(HostEndpoint::from_node))
    }
}
