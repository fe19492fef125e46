/// 节点管理服务

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set};
use tracing::info;

use crate::db::models::node::{
    CreateNodeDto, NodeResponse, NodeListResponse, NodeStatus,
    Entity as NodeEntity, Column as NodeColumn, ActiveModel as NodeActiveModel,
};
use crate::app_state::AppState;

pub struct NodeService {
    state: AppState,
}

impl NodeService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 检查节点是否存在
    pub async fn node_exists(&self, node_id: &str) -> anyhow::Result<bool> {
        let db = &self.state.sea_db();
        let node = NodeEntity::find_by_id(node_id.to_string()).one(db).await?;
        Ok(node.is_some())
    }

    /// 以指定 ID 创建节点（Agent 注册流程）
    pub async fn create_node_with_id(
        &self,
        node_id: String,
        dto: CreateNodeDto,
    ) -> anyhow::Result<NodeResponse> {
        let db = &self.state.sea_db();
        let now = Utc::now();

        let node_active = NodeActiveModel {
            id: Set(node_id),
            hostname: Set(dto.hostname),
            ip_address: Set(dto.ip_address),
            status: Set(NodeStatus::Online.as_str().to_string()),
            cluster_id: Set(dto.cluster_id),
            hypervisor_type: Set(dto.hypervisor_type),
            hypervisor_version: Set(dto.hypervisor_version),
            cpu_cores: Set(None),
            memory_total: Set(None),
            disk_total: Set(None),
            metadata: Set(dto.metadata),
            last_heartbeat: Set(Some(now.into())),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let node = node_active.insert(db).await?;
        Ok(NodeResponse::from(node))
    }

    /// 获取节点列表
    pub async fn list_nodes(
        &self,
        page: usize,
        page_size: usize,
        status: Option<String>,
    ) -> anyhow::Result<NodeListResponse> {
        let db = &self.state.sea_db();

        let mut query = NodeEntity::find();

        if let Some(status) = status {
            query = query.filter(NodeColumn::Status.eq(status));
        }

        query = query.order_by_desc(NodeColumn::UpdatedAt);

        let total = query.clone().count(db).await?;

        let nodes = query
            .offset(((page - 1) * page_size) as u64)
            .limit(page_size as u64)
            .all(db)
            .await?;

        let node_responses: Vec<NodeResponse> = nodes.into_iter().map(NodeResponse::from).collect();

        Ok(NodeListResponse {
            nodes: node_responses,
            total,
            page,
            page_size,
        })
    }

    /// 获取单个节点详情
    pub async fn get_node(&self, id: &str) -> anyhow::Result<NodeResponse> {
        let db = &self.state.sea_db();

        let node = NodeEntity::find_by_id(id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("节点不存在"))?;

        Ok(NodeResponse::from(node))
    }

    /// 更新节点心跳时间
    pub async fn update_heartbeat(&self, node_id: &str) -> anyhow::Result<()> {
        let db = &self.state.sea_db();

        let node = NodeEntity::find_by_id(node_id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("节点不存在: {}", node_id))?;

        let now = Utc::now();
        let mut node_active: NodeActiveModel = node.into();
        node_active.status = Set(NodeStatus::Online.as_str().to_string());
        node_active.last_heartbeat = Set(Some(now.into()));
        node_active.updated_at = Set(now.into());
        node_active.update(db).await?;

        Ok(())
    }

    /// 更新节点资源信息
    pub async fn update_node_resource_info(
        &self,
        node_id: &str,
        cpu_cores: u32,
        memory_total: u64,
        disk_total: u64,
        hypervisor_type: Option<String>,
        hypervisor_version: Option<String>,
    ) -> anyhow::Result<()> {
        let db = &self.state.sea_db();

        let node = NodeEntity::find_by_id(node_id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("节点不存在: {}", node_id))?;

        let mut node_active: NodeActiveModel = node.into();
        node_active.cpu_cores = Set(Some(cpu_cores as i32));
        node_active.memory_total = Set(Some(memory_total as i64));
        node_active.disk_total = Set(Some(disk_total as i64));
        if hypervisor_type.is_some() {
            node_active.hypervisor_type = Set(hypervisor_type);
        }
        if hypervisor_version.is_some() {
            node_active.hypervisor_version = Set(hypervisor_version);
        }
        node_active.updated_at = Set(Utc::now().into());
        node_active.update(db).await?;

        Ok(())
    }

    /// 检查并更新心跳超时的节点为离线
    /// 返回被更新的节点 ID 列表
    pub async fn check_and_update_timeout_nodes(
        &self,
        timeout_secs: u64,
    ) -> anyhow::Result<Vec<String>> {
        let db = &self.state.sea_db();
        let deadline = Utc::now() - chrono::Duration::seconds(timeout_secs as i64);

        let nodes = NodeEntity::find()
            .filter(NodeColumn::Status.eq(NodeStatus::Online.as_str()))
            .all(db)
            .await?;

        let mut updated = Vec::new();
        for node in nodes {
            let expired = match node.last_heartbeat {
                Some(hb) => hb < deadline,
                None => true,
            };
            if !expired {
                continue;
            }

            let node_id = node.id.clone();
            let mut node_active: NodeActiveModel = node.into();
            node_active.status = Set(NodeStatus::Offline.as_str().to_string());
            node_active.updated_at = Set(Utc::now().into());
            node_active.update(db).await?;

            info!("节点心跳超时，标记离线: {}", node_id);
            updated.push(node_id);
        }

        Ok(updated)
    }
}
