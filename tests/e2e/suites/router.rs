//! 连接路由测试套件

use crate::setup::TestEnvironment;

#[cfg(test)]
mod router_tests {
    use super::*;
    use keylock::{Intent, StoreConnection};

    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_action_roundtrip_on_primary() {
        let env = TestEnvironment::setup().await.unwrap();
        let key = env.key("action");

        let write_key = key.clone();
        env.router
            .action(move |conn| {
                Box::pin(async move { conn.set(&write_key, "false").await })
            })
            .await
            .unwrap();

        assert_eq!(env.value(&key).await.unwrap().as_deref(), Some("false"));
        assert_eq!(env.router.primary().active_count(), 0);
        assert_eq!(env.router.primary().idle_count(), 1);

        env.cleanup().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_single_endpoint_reads_from_primary() {
        let env = TestEnvironment::setup().await.unwrap();
        let key = env.key("read");
        env.set_raw(&key, "true").await.unwrap();

        let mut conn = env.router.get(Intent::Read).await.unwrap();
        assert_eq!(conn.get(&key).await.unwrap().as_deref(), Some("true"));
        drop(conn);

        env.cleanup().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_unreachable_store_fails_health_check() {
        let config = crate::setup::TestEnvConfig {
            redis_url: "redis://127.0.0.1:1".to_string(),
            connect_timeout: std::time::Duration::from_millis(200),
        };
        let result = TestEnvironment::setup_with_config(config).await;
        assert!(result.is_err(), "不可达的节点应该导致健康检查失败");
    }
}
