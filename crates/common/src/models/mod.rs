/// 共享数据模型
///
/// 定义 Server 和 Agent 共享的数据结构

use serde::{Deserialize, Serialize};

/// 数据对象类型
///
/// 数据迁移引擎跟踪的三类对象：存储卷、快照、模板
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataObjectKind {
    Volume,
    Snapshot,
    Template,
}

impl DataObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataObjectKind::Volume => "volume",
            DataObjectKind::Snapshot => "snapshot",
            DataObjectKind::Template => "template",
        }
    }
}

/// 存储后端角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreRole {
    /// 主存储（挂载到计算节点的块/文件存储池）
    Primary,
    /// 二级存储（镜像/对象存储）
    Image,
    /// 临时中转缓存存储
    ImageCache,
}

impl StoreRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreRole::Primary => "primary",
            StoreRole::Image => "image",
            StoreRole::ImageCache => "image_cache",
        }
    }
}

impl From<&str> for StoreRole {
    fn from(s: &str) -> Self {
        match s {
            "image" => StoreRole::Image,
            "image_cache" => StoreRole::ImageCache,
            _ => StoreRole::Primary,
        }
    }
}

/// 存储后端作用域
///
/// 作用域构成包含层级 Host ⊂ Cluster ⊂ Zone，缓存放置时按此层级收窄
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum StoreScope {
    Host,
    Cluster,
    Zone,
}

impl StoreScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreScope::Host => "host",
            StoreScope::Cluster => "cluster",
            StoreScope::Zone => "zone",
        }
    }

    /// 判断本作用域是否包含另一作用域
    pub fn contains(&self, other: &StoreScope) -> bool {
        self >= other
    }
}

impl From<&str> for StoreScope {
    fn from(s: &str) -> Self {
        match s {
            "host" => StoreScope::Host,
            "cluster" => StoreScope::Cluster,
            _ => StoreScope::Zone,
        }
    }
}

/// 存储池类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    Nfs,
    Filesystem,
    Lvm,
    Iscsi,
    Ceph,
}

impl PoolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::Nfs => "nfs",
            PoolType::Filesystem => "filesystem",
            PoolType::Lvm => "lvm",
            PoolType::Iscsi => "iscsi",
            PoolType::Ceph => "ceph",
        }
    }

    /// 是否为文件协议存储（可由宿主机直接按路径访问）
    pub fn is_file_protocol(&self) -> bool {
        matches!(self, PoolType::Nfs | PoolType::Filesystem)
    }
}

impl From<&str> for PoolType {
    fn from(s: &str) -> Self {
        match s {
            "nfs" => PoolType::Nfs,
            "lvm" => PoolType::Lvm,
            "iscsi" => PoolType::Iscsi,
            "ceph" => PoolType::Ceph,
            _ => PoolType::Filesystem,
        }
    }
}

/// 磁盘镜像格式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Qcow2,
    Raw,
    Vhd,
}

impl DiskFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Raw => "raw",
            DiskFormat::Vhd => "vhd",
        }
    }
}

impl From<&str> for DiskFormat {
    fn from(s: &str) -> Self {
        match s {
            "raw" => DiskFormat::Raw,
            "vhd" => DiskFormat::Vhd,
            _ => DiskFormat::Qcow2,
        }
    }
}
