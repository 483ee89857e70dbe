//! Redis 存储实现
//!
//! 基于 redis crate 的多路复用异步连接。条件写通过 Lua 脚本完成，
//! 保证“检查空闲 + 写入令牌”和“校验令牌 + 删除”各自是一个原子操作。

use async_trait::async_trait;
use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client, Script};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{Dialer, StoreConnection};
use crate::error::{LockError, Result};

/// KEYS[1] = 锁 key，ARGV[1] = 令牌，ARGV[2] = 租约毫秒数（0 表示不过期）
static ACQUIRE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local current = redis.call("get", KEYS[1])
        if current == false or current == "false" or current == "0" or current == "" then
            if tonumber(ARGV[2]) > 0 then
                redis.call("set", KEYS[1], ARGV[1], "PX", ARGV[2])
            else
                redis.call("set", KEYS[1], ARGV[1])
            end
            return 1
        end
        return 0
        "#,
    )
});

/// 只有当锁的 owner 匹配时才删除
static RELEASE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("del", KEYS[1])
        else
            return 0
        end
        "#,
    )
});

/// 补全地址协议头，兼容 `host:port` 形式
pub fn normalize_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{}", addr)
    }
}

/// Redis 建连器
#[derive(Debug, Clone)]
pub struct RedisDialer {
    connect_timeout: Duration,
}

impl RedisDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for RedisDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl Dialer for RedisDialer {
    type Conn = RedisConnection;

    #[instrument(skip(self))]
    async fn dial(&self, addr: &str) -> Result<RedisConnection> {
        let url = normalize_addr(addr);
        let dial_err = |message: String| LockError::Dial {
            addr: url.clone(),
            message,
        };

        let client = Client::open(url.as_str()).map_err(|e| dial_err(e.to_string()))?;
        let conn = tokio::time::timeout(
            self.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| dial_err(format!("connect timed out after {:?}", self.connect_timeout)))?
        .map_err(|e| dial_err(e.to_string()))?;

        debug!(addr = %url, "Redis connection established");
        Ok(RedisConnection { conn })
    }
}

/// 单条 Redis 连接
pub struct RedisConnection {
    conn: MultiplexedConnection,
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.conn.get(key).await?;
        Ok(value)
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let _: () = self.conn.set(key, value).await?;
        Ok(())
    }

    async fn acquire_flag(
        &mut self,
        key: &str,
        token: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let ttl_ms = ttl.map(|t| t.as_millis().max(1) as u64).unwrap_or(0);
        let result: i32 = ACQUIRE_SCRIPT
            .key(key)
            .arg(token)
            .arg(ttl_ms)
            .invoke_async(&mut self.conn)
            .await?;
        Ok(result == 1)
    }

    async fn release_flag(&mut self, key: &str, token: &str) -> Result<bool> {
        let result: i32 = RELEASE_SCRIPT
            .key(key)
            .arg(token)
            .invoke_async(&mut self.conn)
            .await?;
        Ok(result > 0)
    }

    async fn ping(&mut self) -> Result<()> {
        ::redis::cmd("PING")
            .query_async::<String>(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(LockError::from)
    }
}
