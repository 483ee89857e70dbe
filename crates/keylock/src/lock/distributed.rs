//! 分布式咨询锁
//!
//! 锁标志保存在共享存储的 key 上，值为持有者令牌 `instance_id:uuid`。
//! 加锁通过一次原子条件写完成，释放前校验令牌，并可附带租约，
//! 持有者崩溃后锁会自动过期。

use keylock_shared::LockSettings;
use keylock_shared::observability::metrics::{record_lock_acquisition, record_lock_release};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use super::RetryPolicy;
use crate::error::{LockError, Result};
use crate::pool::PooledConnection;
use crate::router::{Intent, Router};
use crate::store::{Dialer, StoreConnection};

const KIND: &str = "distributed";

/// 分布式锁配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedLockConfig {
    /// 锁被占用时的轮询策略（默认 10 次 × 100ms）
    pub retry: RetryPolicy,
    /// 锁租约，None 表示锁标志永不过期
    pub lease_ttl: Option<Duration>,
}

impl Default for DistributedLockConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lease_ttl: Some(Duration::from_secs(30)),
        }
    }
}

impl From<&LockSettings> for DistributedLockConfig {
    fn from(settings: &LockSettings) -> Self {
        Self {
            retry: RetryPolicy::new(
                settings.retry_count,
                Duration::from_millis(settings.retry_interval_ms),
            ),
            lease_ttl: (settings.lease_ttl_ms > 0)
                .then(|| Duration::from_millis(settings.lease_ttl_ms)),
        }
    }
}

/// 分布式锁
pub struct DistributedLock<D: Dialer> {
    router: Arc<Router<D>>,
    config: DistributedLockConfig,
    /// 实例唯一标识，用于区分不同服务实例持有的锁
    instance_id: String,
}

impl<D: Dialer> DistributedLock<D> {
    pub fn new(router: Arc<Router<D>>, config: DistributedLockConfig) -> Self {
        Self {
            router,
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// 使用默认配置创建
    pub fn with_defaults(router: Arc<Router<D>>) -> Self {
        Self::new(router, DistributedLockConfig::default())
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &DistributedLockConfig {
        &self.config
    }

    /// owner 格式: instance_id:uuid，确保每次加锁的令牌唯一
    fn new_owner(&self) -> String {
        format!("{}:{}", self.instance_id, Uuid::new_v4())
    }

    /// 获取锁
    ///
    /// 锁空闲时立即返回守卫。已被占用时，本次借出的写连接移交给一个后台轮询任务，
    /// 按固定间隔重试，重试用尽返回 `LockTimeout`；存储命令失败直接返回错误，
    /// 不会被当作“空闲”处理。
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn mutex(&self, key: &str) -> Result<DistributedLockGuard<D::Conn>> {
        validate_key(key)?;
        let started = Instant::now();
        let owner = self.new_owner();
        let mut conn = self.router.get(Intent::Write).await?;

        match conn.acquire_flag(key, &owner, self.config.lease_ttl).await {
            Ok(true) => {
                debug!(key = %key, owner = %owner, "Distributed lock acquired");
                record_lock_acquisition(KIND, "acquired", 0.0);
                return Ok(DistributedLockGuard::new(key.to_string(), owner, conn));
            }
            Ok(false) => {
                debug!(
                    key = %key,
                    retries = self.config.retry.retries,
                    "Distributed lock is held, polling"
                );
            }
            Err(e) => {
                record_lock_acquisition(KIND, "error", 0.0);
                return Err(e);
            }
        }

        let (tx, rx) = oneshot::channel();
        let poll_key = key.to_string();
        let retry = self.config.retry;
        let lease_ttl = self.config.lease_ttl;
        // 连接随任务一起移交，轮询期间只有这一个使用方。
        // 通道里传递守卫本身，等待方离开后守卫随通道丢弃，在 Drop 中释放锁
        tokio::spawn(async move {
            let outcome = match poll_flag(&mut *conn, &poll_key, &owner, lease_ttl, retry).await {
                Ok(true) => Ok(Some(DistributedLockGuard::new(poll_key, owner, conn))),
                Ok(false) => Ok(None),
                Err(e) => Err(e),
            };
            if let Err(Ok(Some(guard))) = tx.send(outcome) {
                warn!(key = %guard.key(), "Lock waiter went away, handing lock back");
                if let Err(e) = guard.release().await {
                    warn!(error = %e, "Failed to hand back abandoned lock");
                }
            }
        });

        let wait_secs = || started.elapsed().as_secs_f64();
        match rx.await {
            Ok(Ok(Some(guard))) => {
                debug!(key = %key, owner = %guard.owner(), "Distributed lock acquired after polling");
                record_lock_acquisition(KIND, "acquired", wait_secs());
                Ok(guard)
            }
            Ok(Ok(None)) => {
                record_lock_acquisition(KIND, "timeout", wait_secs());
                warn!(key = %key, attempts = retry.retries, "Distributed lock acquisition timed out");
                Err(LockError::LockTimeout {
                    resource: key.to_string(),
                    attempts: retry.retries,
                })
            }
            Ok(Err(e)) => {
                record_lock_acquisition(KIND, "error", wait_secs());
                Err(e)
            }
            Err(_) => {
                record_lock_acquisition(KIND, "error", wait_secs());
                Err(LockError::Internal("lock poller exited early".to_string()))
            }
        }
    }

    /// 尝试获取锁，不重试
    ///
    /// 锁已被占用时返回 `Ok(None)`。
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn try_mutex(&self, key: &str) -> Result<Option<DistributedLockGuard<D::Conn>>> {
        validate_key(key)?;
        let owner = self.new_owner();
        let mut conn = self.router.get(Intent::Write).await?;

        if conn.acquire_flag(key, &owner, self.config.lease_ttl).await? {
            record_lock_acquisition(KIND, "acquired", 0.0);
            Ok(Some(DistributedLockGuard::new(key.to_string(), owner, conn)))
        } else {
            Ok(None)
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(LockError::Config("lock key must not be empty".to_string()));
    }
    Ok(())
}

/// 按固定间隔轮询，返回是否在重试预算内拿到锁
async fn poll_flag<C: StoreConnection>(
    conn: &mut C,
    key: &str,
    owner: &str,
    lease_ttl: Option<Duration>,
    retry: RetryPolicy,
) -> Result<bool> {
    for attempt in 1..=retry.retries {
        tokio::time::sleep(retry.interval).await;
        if conn.acquire_flag(key, owner, lease_ttl).await? {
            return Ok(true);
        }
        trace!(key = %key, attempt, "Distributed lock still held");
    }
    Ok(false)
}

/// 分布式锁守卫
///
/// 持有加锁时借出的连接，直到释放为止。
///
/// ## 注意事项
///
/// 建议使用 `release()` 显式释放：释放失败会返回错误。
/// 未释放就被 drop 时，会在当前 runtime 上尽力异步释放并记录警告；
/// 没有 runtime 时只能等待租约过期。
pub struct DistributedLockGuard<C: StoreConnection> {
    key: String,
    owner: String,
    conn: Option<PooledConnection<C>>,
}

impl<C: StoreConnection> DistributedLockGuard<C> {
    fn new(key: String, owner: String, conn: PooledConnection<C>) -> Self {
        Self {
            key,
            owner,
            conn: Some(conn),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 显式释放锁
    ///
    /// 只有令牌仍匹配时才会删除 key；锁已过期或被他人持有时记录警告并返回 Ok。
    /// 连接在释放完成后归还连接池。
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn release(mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        match conn.release_flag(&self.key, &self.owner).await {
            Ok(true) => {
                record_lock_release(KIND, "released");
                debug!(key = %self.key, "Distributed lock released");
                Ok(())
            }
            Ok(false) => {
                record_lock_release(KIND, "stale");
                warn!(
                    key = %self.key,
                    owner = %self.owner,
                    "Lock was already released or owned by another client"
                );
                Ok(())
            }
            Err(e) => {
                record_lock_release(KIND, "error");
                Err(e)
            }
        }
    }
}

impl<C: StoreConnection> Drop for DistributedLockGuard<C> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        warn!(
            lock_key = %self.key,
            owner = %self.owner,
            "DistributedLockGuard dropped without explicit release"
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        handle.spawn(async move {
            match conn.release_flag(&key, &owner).await {
                Ok(true) => record_lock_release(KIND, "released"),
                Ok(false) => record_lock_release(KIND, "stale"),
                Err(e) => {
                    record_lock_release(KIND, "error");
                    warn!(lock_key = %key, error = %e, "Background lock release failed");
                }
            }
        });
    }
}
