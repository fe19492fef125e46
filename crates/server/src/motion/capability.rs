/// 存储驱动能力注册表
///
/// 能力表是存储池上的扁平 string -> string 映射，
/// 值为字符串编码的布尔量，键精确匹配，缺失视为 false

use super::object::DataStore;

/// 阵列原生快照
pub const STORAGE_SYSTEM_SNAPSHOT: &str = "storage_system_snapshot";
/// 阵列原生从卷克隆卷
pub const CREATE_VOLUME_FROM_VOLUME: &str = "create_volume_from_volume";
/// 阵列原生从快照建卷
pub const CREATE_VOLUME_FROM_SNAPSHOT: &str = "create_volume_from_snapshot";
/// 驱动自带复制通道（门面优先于策略分发）
pub const NATIVE_COPY: &str = "native_copy";

/// 查询存储后端是否具备指定能力
pub fn supports(store: &DataStore, capability: &str) -> bool {
    store
        .capabilities
        .get(capability)
        .map(|v| v == "true")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::testkit;

    fn store_with(cap: &str, value: &str) -> DataStore {
        let pool = testkit::pool_builder("p1").capability(cap, value).build();
        DataStore::from_pool(&pool)
    }

    #[test]
    fn test_supports_true() {
        let store = store_with(STORAGE_SYSTEM_SNAPSHOT, "true");
        assert!(supports(&store, STORAGE_SYSTEM_SNAPSHOT));
    }

    #[test]
    fn test_absent_key_is_false() {
        let store = store_with(STORAGE_SYSTEM_SNAPSHOT, "true");
        assert!(!supports(&store, CREATE_VOLUME_FROM_VOLUME));
    }

    #[test]
    fn test_false_string_is_false() {
        let store = store_with(NATIVE_COPY, "false");
        assert!(!supports(&store, NATIVE_COPY));
        // 只认精确的 "true"
        let store = store_with(NATIVE_COPY, "True");
        assert!(!supports(&store, NATIVE_COPY));
    }
}
