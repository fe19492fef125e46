/// 应用全局状态

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::Config;
use crate::ws::AgentConnectionManager;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    /// SeaORM 数据库连接 - 用于所有数据库管理
    pub sea_db: DatabaseConnection,
    /// Agent WebSocket 连接管理器
    pub agent_manager: AgentConnectionManager,
    /// 全局配置
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        sea_db: DatabaseConnection,
        agent_manager: AgentConnectionManager,
        config: Config,
    ) -> Self {
        Self {
            sea_db,
            agent_manager,
            config: Arc::new(config),
        }
    }

    /// 获取 SeaORM 数据库连接（克隆）
    pub fn sea_db(&self) -> DatabaseConnection {
        self.sea_db.clone()
    }

    /// 获取 Agent 连接管理器
    pub fn agent_manager(&self) -> AgentConnectionManager {
        self.agent_manager.clone()
    }

    /// 获取配置
    pub fn config(&self) -> Arc<Config> {
        self.config.clone()
    }
}
