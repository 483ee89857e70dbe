//! 读写分离连接路由
//!
//! 第一个地址为主节点，承担所有写请求；其余地址组成只读副本集，
//! 读请求按轮询顺序分发到各副本。只配置一个地址时读写共用同一个池。

use futures::future::BoxFuture;
use keylock_shared::StoreConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, instrument};

use crate::error::{LockError, Result};
use crate::pool::{ConnectionPool, PoolOptions, PooledConnection};
use crate::store::{Dialer, RedisDialer, StoreConnection};

/// 连接用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
}

/// 连接路由
pub struct Router<D: Dialer> {
    primary: Arc<ConnectionPool<D>>,
    replicas: Vec<Arc<ConnectionPool<D>>>,
    cursor: AtomicUsize,
}

impl Router<RedisDialer> {
    /// 按存储配置创建基于 Redis 的路由
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let dialer = RedisDialer::new(Duration::from_millis(config.connect_timeout_ms));
        Self::new(config.addrs.as_slice(), dialer, PoolOptions::from(config))
    }
}

impl<D: Dialer> Router<D> {
    /// 创建路由
    ///
    /// 地址列表为空时返回配置错误。连接在首次使用时才建立。
    pub fn new<S: AsRef<str>>(addrs: &[S], dialer: D, options: PoolOptions) -> Result<Self> {
        let Some((primary_addr, replica_addrs)) = addrs.split_first() else {
            return Err(LockError::Config(
                "at least one store address is required".to_string(),
            ));
        };

        let dialer = Arc::new(dialer);
        let primary = Arc::new(ConnectionPool::new(
            primary_addr.as_ref(),
            Arc::clone(&dialer),
            options,
        )?);
        let replicas = replica_addrs
            .iter()
            .map(|addr| {
                ConnectionPool::new(addr.as_ref(), Arc::clone(&dialer), options).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            primary = %primary.addr(),
            replicas = replicas.len(),
            max_idle = options.max_idle,
            max_active = options.max_active,
            "Store router created"
        );

        Ok(Self {
            primary,
            replicas,
            cursor: AtomicUsize::new(0),
        })
    }

    /// 读写是否共用同一个池
    pub fn is_single_endpoint(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn primary(&self) -> &Arc<ConnectionPool<D>> {
        &self.primary
    }

    /// 选出负责该用途的连接池，读请求会推进轮询游标
    pub fn pool_for(&self, intent: Intent) -> Arc<ConnectionPool<D>> {
        match intent {
            Intent::Write => Arc::clone(&self.primary),
            Intent::Read if self.replicas.is_empty() => Arc::clone(&self.primary),
            Intent::Read => {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.replicas.len();
                Arc::clone(&self.replicas[index])
            }
        }
    }

    /// 按用途借出一条连接
    pub async fn get(&self, intent: Intent) -> Result<PooledConnection<D::Conn>> {
        self.pool_for(intent).get().await
    }

    pub async fn get_write(&self) -> Result<PooledConnection<D::Conn>> {
        self.get(Intent::Write).await
    }

    pub async fn get_read(&self) -> Result<PooledConnection<D::Conn>> {
        self.get(Intent::Read).await
    }

    /// 在一条写连接上执行操作
    ///
    /// 无论 `f` 正常返回、返回错误还是 panic，连接都会被归还（panic 时直接关闭）。
    ///
    /// ```ignore
    /// router
    ///     .action(|conn| Box::pin(async move { conn.set("job:42", "false").await }))
    ///     .await?;
    /// ```
    #[instrument(skip(self, f))]
    pub async fn action<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut D::Conn) -> BoxFuture<'c, Result<T>>,
    {
        let mut conn = self.get(Intent::Write).await?;
        f(&mut *conn).await
    }

    /// 健康检查：PING 主节点
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.primary.get().await?;
        conn.ping().await
    }
}
