/// 进程级命名咨询锁
///
/// 按字符串键提供互斥，带超时获取，守卫析构时必然释放
/// （包括 panic 展开路径）。用于重签名互斥与缓存引用计数原子化

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{Error, Result};
use once_cell::sync::Lazy;
use tokio::sync::{Mutex, OwnedMutexGuard};

static GLOBAL: Lazy<NamedLocks> = Lazy::new(NamedLocks::new);

/// 进程级锁注册表
pub fn global() -> &'static NamedLocks {
    &GLOBAL
}

pub struct NamedLocks {
    // 锁条目不回收：键空间以存储后端/缓存对象数量为界
    entries: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 带超时获取命名锁
    ///
    /// 超时返回 LockTimeout，调用方决定是否视为硬失败
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<NamedLockGuard> {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        match tokio::time::timeout(timeout, entry.lock_owned()).await {
            Ok(guard) => Ok(NamedLockGuard {
                key: key.to_string(),
                _guard: guard,
            }),
            Err(_) => Err(Error::LockTimeout(format!(
                "获取命名锁超时: key={}, timeout={}s",
                key,
                timeout.as_secs()
            ))),
        }
    }
}

impl Default for NamedLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// 作用域锁守卫
pub struct NamedLockGuard {
    pub key: String,
    _guard: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_mutual_exclusion() {
        let locks = Arc::new(NamedLocks::new());
        let spans = Arc::new(Mutex::new(Vec::<(Instant, Instant)>::new()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let spans = spans.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks
                    .acquire("store-a", Duration::from_secs(5))
                    .await
                    .unwrap();
                let enter = Instant::now();
                tokio::time::sleep(Duration::from_millis(10)).await;
                let exit = Instant::now();
                spans.lock().await.push((enter, exit));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // 临界区两两不重叠
        let spans = spans.lock().await;
        for (i, a) in spans.iter().enumerate() {
            for b in spans.iter().skip(i + 1) {
                assert!(a.1 <= b.0 || b.1 <= a.0, "临界区发生重叠");
            }
        }
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = NamedLocks::new();
        let _a = locks.acquire("store-a", Duration::from_secs(1)).await.unwrap();
        // 不同键可立即获取
        let _b = locks.acquire("store-b", Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_timeout() {
        let locks = Arc::new(NamedLocks::new());
        let _held = locks.acquire("store-a", Duration::from_secs(1)).await.unwrap();

        let err = locks
            .acquire("store-a", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));
    }

    #[tokio::test]
    async fn test_release_on_drop() {
        let locks = NamedLocks::new();
        {
            let _guard = locks.acquire("store-a", Duration::from_secs(1)).await.unwrap();
        }
        // 守卫析构后可再次获取
        let _again = locks.acquire("store-a", Duration::from_millis(50)).await.unwrap();
    }
}
