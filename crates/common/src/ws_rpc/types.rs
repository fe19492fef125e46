/// WebSocket RPC 数据类型定义
///
/// Server 与宿主机 Agent 之间的存储数据迁移命令与应答。
/// 所有应答统一携带 success 标志与可读的 message，
/// Server 侧将传输异常与 success=false 视为同一种失败。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{DataObjectKind, DiskFormat, PoolType, StoreRole, StoreScope};

// ============================================================================
// 注册与节点上报
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub node_id: String,
    pub hostname: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
}

/// 节点资源信息上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResourceInfo {
    pub node_id: String,
    pub cpu_cores: u32,
    pub memory_total: u64, // bytes
    pub disk_total: u64,   // bytes
    pub hypervisor_type: Option<String>,
    pub hypervisor_version: Option<String>,
    pub timestamp: i64,
}

// ============================================================================
// 描述符
// ============================================================================

/// 存储后端描述符
///
/// 命令中携带的存储池序列化视图，Agent 据此定位/挂载存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDescriptor {
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub role: StoreRole,
    pub scope: StoreScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    pub pool_type: PoolType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub managed: bool,
    #[serde(default)]
    pub details: HashMap<String, String>,
}

/// 数据对象描述符
///
/// 复制/迁移命令两端的序列化视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataObjectDescriptor {
    pub kind: DataObjectKind,
    pub id: String,
    pub uuid: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<DiskFormat>,
    pub size_gb: i64,
    pub state: String,
    pub store: StoreDescriptor,
    /// 快照链上的父路径（仅快照对象）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_path: Option<String>,
}

/// 虚拟机描述符
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmDescriptor {
    pub name: String,
    #[serde(default)]
    pub details: HashMap<String, String>,
}

/// 磁盘介质类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiskKind {
    File,
    Block,
}

/// 迁移语义选项
///
/// 链接克隆复用目标端的基础镜像，完整克隆携带迁移前快照标记
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptionsDescriptor {
    pub linked_clone: bool,
    /// 链接克隆时目标端的基础镜像路径
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_path: Option<String>,
    /// 目标端没有基础镜像时由 Agent 负责复制
    pub copy_backing_file: bool,
    /// 完整克隆时的迁移前快照名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_name: Option<String>,
    pub timeout_secs: u64,
}

/// 磁盘描述符
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskDescriptor {
    pub volume_uuid: String,
    pub disk_kind: DiskKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<DiskFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// 源端连接路径（NFS 间迁移时为目标主机上的挂载路径）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration: Option<MigrationOptionsDescriptor>,
}

/// iSCSI 目标描述符
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub iqn: String,
    pub storage_host: String,
    pub storage_port: u16,
    #[serde(default)]
    pub details: HashMap<String, String>,
}

// ============================================================================
// 数据对象复制
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyObjectRequest {
    pub src: DataObjectDescriptor,
    pub dest: DataObjectDescriptor,
    pub wait_secs: u64,
    /// 多个复制命令是否需要串行执行
    pub execute_in_sequence: bool,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyObjectResponse {
    pub success: bool,
    pub message: String,
    /// 复制产物的最新描述（路径/大小等）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_object: Option<DataObjectDescriptor>,
}

/// 在存储后端上创建数据对象
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateObjectRequest {
    pub object: DataObjectDescriptor,
    /// 以该模板为基底预置磁盘（KVM 根盘下发）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_uuid: Option<String>,
    pub wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateObjectResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_gb: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteObjectRequest {
    pub object: DataObjectDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteObjectResponse {
    pub success: bool,
    pub message: String,
}

// ============================================================================
// 卷迁移（同主机跨池）
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateVolumeRequest {
    pub volume_id: String,
    pub volume_uuid: String,
    pub path: String,
    pub dest_pool: StoreDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_vm_name: Option<String>,
    /// root 或 data
    pub volume_kind: String,
    pub wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateVolumeResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_chain_info: Option<String>,
}

// ============================================================================
// 整机存储迁移
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareForMigrationRequest {
    pub vm: VmDescriptor,
    /// true 时回滚此前的准备动作
    pub rollback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareForMigrationResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateVmWithStorageRequest {
    pub vm_name: String,
    pub dest_ip: String,
    pub windows_guest: bool,
    pub vm: VmDescriptor,
    /// 卷 UUID -> 目标磁盘描述符
    pub disks: HashMap<String, DiskDescriptor>,
    pub managed_storage: bool,
    /// 整批标志：任一卷对为 NFS→NFS 时启用增量传输
    pub incremental_on_shared_nfs: bool,
    pub auto_converge: bool,
    pub wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateVmWithStorageResponse {
    pub success: bool,
    pub message: String,
}

// ============================================================================
// 存储系统操作
// ============================================================================

/// 重签名命令
///
/// 阵列级克隆/快照暴露为新 LUN 后，其盘内签名仍与源一致，
/// 使用前必须重写签名
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResignatureRequest {
    #[serde(default)]
    pub details: HashMap<String, String>,
    pub wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResignatureResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_size_gb: Option<i64>,
}

/// 修改宿主机可见的 iSCSI 目标（授予/回收访问）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyTargetsRequest {
    pub add: bool,
    pub targets: Vec<TargetDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyTargetsResponse {
    pub success: bool,
    pub message: String,
}

/// 探测宿主机是否已挂载指定存储池
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStorageAvailabilityRequest {
    /// 卷 UUID -> 其所在存储池
    pub pools_by_volume: HashMap<String, StoreDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStorageAvailabilityResponse {
    pub success: bool,
    pub message: String,
    /// 卷 UUID -> 对应池在该主机上是否可达
    #[serde(default)]
    pub available: HashMap<String, bool>,
}

/// 将卷连接到宿主机（返回主机侧访问路径）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectVolumeRequest {
    pub object: DataObjectDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectVolumeResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectVolumeRequest {
    pub object: DataObjectDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectVolumeResponse {
    pub success: bool,
    pub message: String,
}

// ============================================================================
// 存储池信息（Agent 发起）
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStoragePoolInfoRequest {
    pub pool_id: String,
}
