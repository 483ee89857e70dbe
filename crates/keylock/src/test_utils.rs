//! 测试工具模块
//!
//! 提供与 Redis 语义一致的内存存储，以及故障注入开关，
//! 让路由与锁的集成测试无需外部依赖即可运行。

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{LockError, Result};
use crate::store::{Dialer, StoreConnection, is_free_value};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_free(&self, now: Instant) -> bool {
        self.is_expired(now) || is_free_value(&self.value)
    }
}

#[derive(Default)]
struct MemoryStoreInner {
    entries: DashMap<String, StoredValue>,
    fail_commands: AtomicBool,
    failing_addrs: DashSet<String>,
    dial_log: Mutex<Vec<String>>,
    commands: AtomicU64,
}

/// 内存键值存储
///
/// 所有地址共享同一份数据，相当于复制无延迟的主从集群。
/// 过期时间基于 tokio 时钟，配合 `start_paused` 可精确控制。
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建连接到本存储的建连器
    pub fn dialer(&self) -> MemoryDialer {
        MemoryDialer {
            store: self.clone(),
        }
    }

    /// 读取当前值（已过期视为不存在）
    pub fn value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// 直接写入值，不经过连接，例如模拟一个已崩溃的持有者
    pub fn insert(&self, key: &str, value: &str) {
        self.inner.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: None,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.inner.entries.remove(key);
    }

    /// 之后的所有命令都返回存储错误
    pub fn set_fail_commands(&self, fail: bool) {
        self.inner.fail_commands.store(fail, Ordering::SeqCst);
    }

    /// 之后对该地址的建连都失败
    pub fn fail_dials_to(&self, addr: &str) {
        self.inner.failing_addrs.insert(addr.to_string());
    }

    pub fn restore_dials_to(&self, addr: &str) {
        self.inner.failing_addrs.remove(addr);
    }

    /// 按时间顺序记录的建连地址
    pub fn dial_log(&self) -> Vec<String> {
        self.inner.dial_log.lock().clone()
    }

    /// 已执行的命令总数
    pub fn command_count(&self) -> u64 {
        self.inner.commands.load(Ordering::SeqCst)
    }

    fn begin_command(&self) -> Result<Instant> {
        self.inner.commands.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_commands.load(Ordering::SeqCst) {
            return Err(LockError::StoreCommand("injected store failure".to_string()));
        }
        Ok(Instant::now())
    }
}

/// 内存存储建连器
#[derive(Clone)]
pub struct MemoryDialer {
    store: MemoryStore,
}

#[async_trait]
impl Dialer for MemoryDialer {
    type Conn = MemoryConnection;

    async fn dial(&self, addr: &str) -> Result<MemoryConnection> {
        self.store.inner.dial_log.lock().push(addr.to_string());
        if self.store.inner.failing_addrs.contains(addr) {
            return Err(LockError::Dial {
                addr: addr.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(MemoryConnection {
            store: self.store.clone(),
            addr: addr.to_string(),
        })
    }
}

/// 内存存储连接
pub struct MemoryConnection {
    store: MemoryStore,
    addr: String,
}

impl MemoryConnection {
    /// 建连时使用的地址
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        self.store.begin_command()?;
        Ok(self.store.value(key))
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.store.begin_command()?;
        self.store.insert(key, value);
        Ok(())
    }

    async fn acquire_flag(
        &mut self,
        key: &str,
        token: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let now = self.store.begin_command()?;
        let fresh = StoredValue {
            value: token.to_string(),
            expires_at: ttl.map(|ttl| now + ttl),
        };

        Ok(match self.store.inner.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_free(now) {
                    occupied.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        })
    }

    async fn release_flag(&mut self, key: &str, token: &str) -> Result<bool> {
        let now = self.store.begin_command()?;
        Ok(self
            .store
            .inner
            .entries
            .remove_if(key, |_, stored| {
                stored.value == token && !stored.is_expired(now)
            })
            .is_some())
    }

    async fn ping(&mut self) -> Result<()> {
        self.store.begin_command()?;
        Ok(())
    }
}
