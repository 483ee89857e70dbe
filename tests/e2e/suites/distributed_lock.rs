//! 分布式锁测试套件
//!
//! 在真实 Redis 上验证条件写、租约与令牌校验释放。

use crate::setup::TestEnvironment;
use std::time::Duration;

#[cfg(test)]
mod mutex_tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_acquire_sets_owner_with_lease() {
        let env = TestEnvironment::setup().await.unwrap();
        let key = env.key("lease");
        let lock = env.lock(10, Duration::from_millis(100), Some(Duration::from_secs(30)));

        let guard = lock.mutex(&key).await.unwrap();
        assert_eq!(env.value(&key).await.unwrap().as_deref(), Some(guard.owner()));

        let ttl = env.pttl(&key).await.unwrap();
        assert!(ttl > 0 && ttl <= 30_000, "租约应该生效: pttl={}", ttl);

        guard.release().await.unwrap();
        assert_eq!(env.value(&key).await.unwrap(), None);

        env.cleanup().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_held_flag_times_out() {
        let env = TestEnvironment::setup().await.unwrap();
        let key = env.key("held");
        env.set_raw(&key, "true").await.unwrap();
        let lock = env.lock(5, Duration::from_millis(50), None);

        let started = std::time::Instant::now();
        let err = lock.mutex(&key).await.err().unwrap();
        assert!(err.is_timeout(), "应该超时: {}", err);
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(env.value(&key).await.unwrap().as_deref(), Some("true"));

        env.cleanup().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_legacy_false_flag_is_free() {
        let env = TestEnvironment::setup().await.unwrap();
        let key = env.key("legacy");
        env.set_raw(&key, "false").await.unwrap();
        let lock = env.lock(1, Duration::from_millis(50), None);

        let guard = lock.mutex(&key).await.unwrap();
        assert_eq!(env.value(&key).await.unwrap().as_deref(), Some(guard.owner()));
        // 没有租约时 key 不过期
        assert_eq!(env.pttl(&key).await.unwrap(), -1);
        guard.release().await.unwrap();

        env.cleanup().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_lease_expiry_lets_next_holder_in() {
        let env = TestEnvironment::setup().await.unwrap();
        let key = env.key("expiry");
        let crashed = env.lock(1, Duration::from_millis(50), Some(Duration::from_millis(300)));
        let next = env.lock(20, Duration::from_millis(50), Some(Duration::from_secs(30)));

        let stale = crashed.mutex(&key).await.unwrap();
        let guard = next.mutex(&key).await.unwrap();

        // 过期持有者的释放不影响新持有者
        stale.release().await.unwrap();
        assert_eq!(env.value(&key).await.unwrap().as_deref(), Some(guard.owner()));
        guard.release().await.unwrap();

        env.cleanup().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "需要运行 Redis"]
    async fn test_concurrent_clients_are_exclusive() {
        let env = TestEnvironment::setup().await.unwrap();
        let key = env.key("contended");
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = env.lock(500, Duration::from_millis(10), Some(Duration::from_secs(30)));
            let key = key.clone();
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let guard = lock.mutex(&key).await.unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    guard.release().await.unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(env.value(&key).await.unwrap(), None);

        env.cleanup().await.unwrap();
    }
}
