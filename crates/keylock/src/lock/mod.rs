//! 咨询锁模块
//!
//! 提供进程内锁与基于共享存储的分布式锁，两者共用同一套轮询重试策略。
//!
//! ## 状态机
//!
//! - 空闲时加锁立即成功：`FREE -> HELD`
//! - 已被占用时派生一个后台轮询任务，按固定间隔重试：
//!   `POLLING -> HELD`（期间被释放）或 `POLLING -> LockTimeout`（重试用尽）
//! - 超时不会修改锁状态；释放只对持有令牌的一方生效
//!
//! ## 使用示例
//!
//! ```ignore
//! let router = Arc::new(Router::from_config(&config.store)?);
//! let lock = DistributedLock::new(router, DistributedLockConfig::from(&config.lock));
//!
//! let guard = lock.mutex("job:42").await?;
//! do_critical_work().await?;
//! guard.release().await?;
//! ```

mod distributed;
mod local;

pub use distributed::{DistributedLock, DistributedLockConfig, DistributedLockGuard};
pub use local::{LocalLock, LocalLockGuard};

use std::time::Duration;

/// 轮询重试策略
///
/// 固定间隔、有限次数：最长等待时间为 `retries × interval`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 首次尝试失败后的轮询次数
    pub retries: u32,
    /// 相邻两次轮询的间隔
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            interval: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, interval: Duration) -> Self {
        Self { retries, interval }
    }

    /// 把总等待时间均分为 `parts` 次轮询，`parts` 为 0 时按 1 处理
    pub fn from_wait(wait: Duration, parts: u32) -> Self {
        let parts = parts.max(1);
        Self {
            retries: parts,
            interval: wait / parts,
        }
    }

    /// 最长等待时间
    pub fn budget(&self) -> Duration {
        self.interval * self.retries
    }
}
