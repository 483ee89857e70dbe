//! 进程内咨询锁
//!
//! 锁状态是一个原子的持有者令牌（0 表示空闲），加锁是一次 CAS，
//! 释放时校验令牌，过期的释放不会误清他人的锁。

use keylock_shared::observability::metrics::{record_lock_acquisition, record_lock_release};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::RetryPolicy;
use crate::error::{LockError, Result};

const KIND: &str = "local";
const FREE: u64 = 0;

struct LockState {
    owner: AtomicU64,
    next_token: AtomicU64,
}

impl LockState {
    fn new_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// 观察到空闲并标记占用是同一个原子步骤
    fn try_claim(&self, token: u64) -> bool {
        self.owner
            .compare_exchange(FREE, token, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self, token: u64) -> bool {
        self.owner
            .compare_exchange(token, FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// 进程内咨询锁
///
/// 克隆得到的实例共享同一把锁。
#[derive(Clone)]
pub struct LocalLock {
    name: Arc<str>,
    state: Arc<LockState>,
    policy: RetryPolicy,
}

impl LocalLock {
    /// 最长等待 `wait`，分 10 次轮询
    pub fn new(wait: Duration) -> Self {
        Self::with_parts(wait, 10)
    }

    /// 最长等待 `wait`，分 `parts` 次轮询
    pub fn with_parts(wait: Duration, parts: u32) -> Self {
        Self::from_policy(RetryPolicy::from_wait(wait, parts))
    }

    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self {
            name: Arc::from(KIND),
            state: Arc::new(LockState {
                owner: AtomicU64::new(FREE),
                next_token: AtomicU64::new(FREE + 1),
            }),
            policy,
        }
    }

    /// 设置锁名称，用于日志和超时错误
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Arc::from(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn is_held(&self) -> bool {
        self.state.owner.load(Ordering::Acquire) != FREE
    }

    /// 尝试加锁，不等待
    pub fn try_lock(&self) -> Option<LocalLockGuard> {
        let token = self.state.new_token();
        self.state.try_claim(token).then(|| self.guard(token))
    }

    /// 加锁
    ///
    /// 锁空闲时立即返回；否则派生一个后台任务按策略轮询，
    /// 重试用尽仍未获得锁时返回 `LockTimeout`，且不改变锁状态。
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn lock(&self) -> Result<LocalLockGuard> {
        let started = Instant::now();
        let token = self.state.new_token();

        if self.state.try_claim(token) {
            record_lock_acquisition(KIND, "acquired", 0.0);
            return Ok(self.guard(token));
        }

        debug!(
            retries = self.policy.retries,
            interval_ms = self.policy.interval.as_millis() as u64,
            "Lock is held, polling"
        );

        let (tx, rx) = oneshot::channel();
        let name = Arc::clone(&self.name);
        let state = Arc::clone(&self.state);
        let policy = self.policy;
        // 通道里传递守卫本身，等待方离开后守卫随通道丢弃，在 Drop 中释放锁
        tokio::spawn(async move {
            let mut outcome = None;
            for attempt in 1..=policy.retries {
                tokio::time::sleep(policy.interval).await;
                if state.try_claim(token) {
                    debug!(attempt, "Lock acquired after polling");
                    outcome = Some(LocalLockGuard::new(name, state, token));
                    break;
                }
            }
            if let Err(Some(guard)) = tx.send(outcome) {
                debug!(name = %guard.name, "Lock waiter went away, handing lock back");
                guard.release();
            }
        });

        let wait_secs = || started.elapsed().as_secs_f64();
        match rx.await {
            Ok(Some(guard)) => {
                record_lock_acquisition(KIND, "acquired", wait_secs());
                Ok(guard)
            }
            Ok(None) => {
                record_lock_acquisition(KIND, "timeout", wait_secs());
                warn!(attempts = self.policy.retries, "Lock acquisition timed out");
                Err(LockError::LockTimeout {
                    resource: self.name.to_string(),
                    attempts: self.policy.retries,
                })
            }
            Err(_) => {
                record_lock_acquisition(KIND, "error", wait_secs());
                Err(LockError::Internal("lock poller exited early".to_string()))
            }
        }
    }

    fn guard(&self, token: u64) -> LocalLockGuard {
        LocalLockGuard::new(Arc::clone(&self.name), Arc::clone(&self.state), token)
    }
}

/// 进程内锁守卫
///
/// Drop 时自动释放；也可以调用 `release()` 显式释放并得知释放是否生效。
pub struct LocalLockGuard {
    name: Arc<str>,
    state: Arc<LockState>,
    token: u64,
    released: bool,
}

impl LocalLockGuard {
    fn new(name: Arc<str>, state: Arc<LockState>, token: u64) -> Self {
        Self {
            name,
            state,
            token,
            released: false,
        }
    }

    /// 释放锁，返回 false 表示锁已不属于本守卫
    pub fn release(mut self) -> bool {
        self.released = true;
        self.release_inner()
    }

    fn release_inner(&self) -> bool {
        let released = self.state.release(self.token);
        if released {
            record_lock_release(KIND, "released");
        } else {
            record_lock_release(KIND, "stale");
            warn!(name = %self.name, token = self.token, "Local lock no longer owned by this guard");
        }
        released
    }
}

impl Drop for LocalLockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.release_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_lock_is_exclusive() {
        let lock = LocalLock::new(Duration::from_millis(100));
        let guard = lock.try_lock().unwrap();
        assert!(lock.is_held());
        assert!(lock.try_lock().is_none());

        assert!(guard.release());
        assert!(!lock.is_held());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_drop_releases() {
        let lock = LocalLock::new(Duration::from_millis(100));
        {
            let _guard = lock.try_lock().unwrap();
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
    }

    #[test]
    fn test_stale_token_cannot_release() {
        let lock = LocalLock::new(Duration::from_millis(100));
        let state = Arc::clone(&lock.state);
        let guard = lock.try_lock().unwrap();

        // 其他令牌的释放不生效
        assert!(!state.release(guard.token + 1));
        assert!(lock.is_held());
        assert!(guard.release());
    }

    #[test]
    fn test_policy_from_parts() {
        let lock = LocalLock::with_parts(Duration::from_millis(300), 3).with_name("sms");
        assert_eq!(lock.name(), "sms");
        assert_eq!(lock.policy().retries, 3);
        assert_eq!(lock.policy().interval, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_lock_returns_immediately() {
        let lock = LocalLock::with_parts(Duration::from_millis(100), 10);
        let started = Instant::now();
        let guard = lock.lock().await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(lock.is_held());
        drop(guard);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_acquires_after_release() {
        let lock = LocalLock::with_parts(Duration::from_millis(100), 10);
        let holder = lock.lock().await.unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            holder.release();
        });

        let started = Instant::now();
        let guard = lock.lock().await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(30), "elapsed {:?}", elapsed);
        // 释放后最多一个轮询间隔内拿到锁
        assert!(elapsed <= Duration::from_millis(40), "elapsed {:?}", elapsed);
        assert!(guard.release());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_lock_held() {
        let lock = LocalLock::with_parts(Duration::from_millis(100), 10).with_name("report");
        let holder = lock.lock().await.unwrap();

        let started = Instant::now();
        let err = lock.lock().await.err().unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(110), "elapsed {:?}", elapsed);
        match err {
            LockError::LockTimeout { resource, attempts } => {
                assert_eq!(resource, "report");
                assert_eq!(attempts, 10);
            }
            other => panic!("unexpected error: {other}"),
        }

        // 超时的一方没有动锁，原持有者仍能正常释放
        assert!(lock.is_held());
        assert!(holder.release());
        assert!(!lock.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_waiter_hands_lock_back() {
        let lock = LocalLock::with_parts(Duration::from_millis(100), 10);
        let holder = lock.lock().await.unwrap();

        // 等待方在轮询期间被取消
        let waiter = lock.clone();
        let pending = tokio::spawn(async move { waiter.lock().await.map(|g| g.release()) });
        tokio::time::sleep(Duration::from_millis(15)).await;
        pending.abort();
        let _ = pending.await;

        holder.release();
        // 给后台轮询任务足够时间抢到锁并归还
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!lock.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_dropped_after_poller_won_releases_lock() {
        let lock = LocalLock::with_parts(Duration::from_millis(100), 10);
        let holder = lock.lock().await.unwrap();

        let mut waiter = tokio_test::task::spawn(lock.lock());
        assert!(waiter.poll().is_pending());

        // 轮询任务在 10ms 时抢到锁并把守卫放进通道，等待方随后才被丢弃
        assert!(holder.release());
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(waiter.is_woken());
        assert!(lock.is_held());
        drop(waiter);

        assert!(!lock.is_held());
        let guard = lock.lock().await.unwrap();
        assert!(guard.release());
    }
}
