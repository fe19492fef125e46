/// 工具函数集合

use uuid::Uuid;

/// 生成唯一 ID
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// 截断路径中嵌入的凭据查询串
///
/// 部分存储协议的路径会携带 `?user=x&password=y` 形式的连接参数，
/// 持久化前必须去除，连接凭据不得落库
pub fn strip_credential_query(path: &str) -> &str {
    match path.find('?') {
        Some(idx) => &path[..idx],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let id1 = generate_id();
        let id2 = generate_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36); // UUID v4 格式
    }

    #[test]
    fn test_strip_credential_query() {
        assert_eq!(
            strip_credential_query("smb://host/share?user=x&password=y"),
            "smb://host/share"
        );
        assert_eq!(strip_credential_query("/mnt/pool/vol.qcow2"), "/mnt/pool/vol.qcow2");
        assert_eq!(strip_credential_query("nfs://host/export?"), "nfs://host/export");
    }
}
