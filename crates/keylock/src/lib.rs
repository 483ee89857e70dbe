//! 咨询锁组件
//!
//! 提供进程内锁、基于共享键值存储的分布式锁，以及分布式锁依赖的读写分离连接路由。
//!
//! ## 模块结构
//!
//! - `store`: 存储连接抽象与 Redis 实现
//! - `pool`: 单节点连接池
//! - `router`: 读写分离连接路由
//! - `lock`: 进程内锁与分布式锁
//! - `error`: 错误类型定义
//! - `test_utils`: 内存存储与故障注入，供测试使用

pub mod error;
pub mod lock;
pub mod pool;
pub mod router;
pub mod store;
pub mod test_utils;

pub use error::{LockError, Result};
pub use lock::{
    DistributedLock, DistributedLockConfig, DistributedLockGuard, LocalLock, LocalLockGuard,
    RetryPolicy,
};
pub use pool::{ConnectionPool, PoolOptions, PooledConnection};
pub use router::{Intent, Router};
pub use store::{Dialer, RedisConnection, RedisDialer, StoreConnection};
