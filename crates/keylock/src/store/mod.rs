//! 共享存储抽象
//!
//! 锁协议只依赖少量键值操作：读、写，以及两个原子的条件写。
//! 具体实现见 `redis` 子模块；测试使用 `crate::test_utils` 中的内存实现。

mod redis;

pub use self::redis::{RedisConnection, RedisDialer, normalize_addr};

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// 被视为“空闲”的旧式标志值
///
/// 早期写入方直接把布尔值写在 key 上，释放时写 false / 0 而不是删除 key。
pub const FREE_FLAG_VALUES: [&str; 3] = ["false", "0", ""];

/// 判断一个已存储的值是否表示空闲
pub fn is_free_value(value: &str) -> bool {
    FREE_FLAG_VALUES.contains(&value)
}

/// 单条存储连接
///
/// 同一连接在同一时刻只允许一个写入方使用（`&mut self`）。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreConnection: Send + 'static {
    async fn get(&mut self, key: &str) -> Result<Option<String>>;

    async fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// 原子地占用标志
    ///
    /// 仅当 key 不存在或存储的是空闲值时写入 `token` 并返回 true。
    /// `ttl` 不为空时同时设置租约，持有者崩溃后锁会自动过期。
    async fn acquire_flag(&mut self, key: &str, token: &str, ttl: Option<Duration>)
    -> Result<bool>;

    /// 原子地释放标志，仅当 key 仍存储 `token` 时删除
    async fn release_flag(&mut self, key: &str, token: &str) -> Result<bool>;

    async fn ping(&mut self) -> Result<()>;
}

/// 按地址建立新连接
#[cfg_attr(test, mockall::automock(type Conn = MockStoreConnection;))]
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Conn: StoreConnection;

    async fn dial(&self, addr: &str) -> Result<Self::Conn>;
}
