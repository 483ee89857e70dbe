//! 测试环境管理
//!
//! 每个测试环境使用独立的 key 前缀，结束时清理自己写入的 key。

use anyhow::Result;
use keylock::{
    DistributedLock, DistributedLockConfig, PoolOptions, RedisDialer, RetryPolicy, Router,
};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use std::time::Duration;

/// 测试环境配置
#[derive(Debug, Clone)]
pub struct TestEnvConfig {
    /// Redis 连接 URL
    pub redis_url: String,
    /// 建连超时
    pub connect_timeout: Duration,
}

impl Default for TestEnvConfig {
    fn default() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".into()),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// 测试环境
pub struct TestEnvironment {
    pub config: TestEnvConfig,
    pub router: Arc<Router<RedisDialer>>,
    /// 直连 Redis，用于校验与清理
    pub redis: MultiplexedConnection,
    prefix: String,
}

impl TestEnvironment {
    pub async fn setup() -> Result<Self> {
        Self::setup_with_config(TestEnvConfig::default()).await
    }

    pub async fn setup_with_config(config: TestEnvConfig) -> Result<Self> {
        let router = Router::new(
            &[config.redis_url.as_str()],
            RedisDialer::new(config.connect_timeout),
            PoolOptions {
                max_idle: 8,
                max_active: 64,
                acquire_timeout: Duration::from_secs(2),
            },
        )?;
        router.health_check().await?;

        let client = redis::Client::open(config.redis_url.as_str())?;
        let redis = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            config,
            router: Arc::new(router),
            redis,
            prefix: format!("keylock:e2e:{}", uuid::Uuid::new_v4()),
        })
    }

    /// 生成本环境独占的 key
    pub fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    /// 按给定重试策略和租约创建分布式锁
    pub fn lock(
        &self,
        retries: u32,
        interval: Duration,
        lease_ttl: Option<Duration>,
    ) -> DistributedLock<RedisDialer> {
        DistributedLock::new(
            Arc::clone(&self.router),
            DistributedLockConfig {
                retry: RetryPolicy::new(retries, interval),
                lease_ttl,
            },
        )
    }

    pub async fn value(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn pttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.redis.clone();
        Ok(conn.pttl(key).await?)
    }

    pub async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    /// 清理本环境写入的所有 key
    pub async fn cleanup(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let keys: Vec<String> = conn.keys(format!("{}:*", self.prefix)).await?;
        if !keys.is_empty() {
            let _: () = conn.del(keys).await?;
        }
        Ok(())
    }
}
