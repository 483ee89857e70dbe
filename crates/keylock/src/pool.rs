//! 单节点连接池
//!
//! 每个存储节点一个池：按需建连，借出数受 `max_active` 限制，
//! 归还后保留至多 `max_idle` 条空闲连接供复用。

use keylock_shared::StoreConfig;
use keylock_shared::observability::metrics::record_store_dial;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument, warn};

use crate::error::{LockError, Result};
use crate::store::{Dialer, StoreConnection};

/// 连接池参数
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub max_idle: usize,
    pub max_active: usize,
    /// 借出数达到上限时等待归还的最长时间
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_idle: 80,
            max_active: 12000,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&StoreConfig> for PoolOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            max_idle: config.max_idle,
            max_active: config.max_active,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
        }
    }
}

/// 单节点连接池
pub struct ConnectionPool<D: Dialer> {
    addr: String,
    dialer: Arc<D>,
    idle: Arc<Mutex<VecDeque<D::Conn>>>,
    permits: Arc<Semaphore>,
    options: PoolOptions,
}

impl<D: Dialer> ConnectionPool<D> {
    pub fn new(addr: impl Into<String>, dialer: Arc<D>, options: PoolOptions) -> Result<Self> {
        if options.max_active == 0 {
            return Err(LockError::Config("max_active must be positive".to_string()));
        }
        if options.max_active > Semaphore::MAX_PERMITS {
            return Err(LockError::Config(format!(
                "max_active exceeds {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            addr: addr.into(),
            dialer,
            idle: Arc::new(Mutex::new(VecDeque::with_capacity(options.max_idle))),
            permits: Arc::new(Semaphore::new(options.max_active)),
            options,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// 当前空闲连接数
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// 当前借出中的连接数
    pub fn active_count(&self) -> usize {
        self.options.max_active - self.permits.available_permits()
    }

    /// 借出一条连接，优先复用最近归还的空闲连接
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn get(&self) -> Result<PooledConnection<D::Conn>> {
        let permit = tokio::time::timeout(
            self.options.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| LockError::PoolExhausted {
            addr: self.addr.clone(),
        })?
        .map_err(|_| LockError::Internal("connection pool closed".to_string()))?;

        let reused = self.idle.lock().pop_back();
        let conn = match reused {
            Some(conn) => conn,
            None => self.dial().await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            idle: Arc::clone(&self.idle),
            max_idle: self.options.max_idle,
            _permit: permit,
        })
    }

    async fn dial(&self) -> Result<D::Conn> {
        match self.dialer.dial(&self.addr).await {
            Ok(conn) => {
                record_store_dial(&self.addr, true);
                debug!(addr = %self.addr, "Dialed new store connection");
                Ok(conn)
            }
            Err(e) => {
                record_store_dial(&self.addr, false);
                warn!(addr = %self.addr, error = %e, "Failed to dial store");
                Err(e)
            }
        }
    }
}

/// 借出的连接
///
/// Drop 时归还到空闲列表；空闲列表已满或线程正在 unwind 时直接关闭。
pub struct PooledConnection<C: StoreConnection> {
    conn: Option<C>,
    idle: Arc<Mutex<VecDeque<C>>>,
    max_idle: usize,
    _permit: OwnedSemaphorePermit,
}

impl<C: StoreConnection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection is only taken in drop")
    }
}

impl<C: StoreConnection> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection is only taken in drop")
    }
}

impl<C: StoreConnection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        // 执行中途被中断的连接状态未知，不再复用
        if std::thread::panicking() {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push_back(conn);
        }
    }
}
