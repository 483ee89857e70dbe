//! 分布式锁探针
//!
//! 按配置连接存储，获取指定 key 的锁，持有一段时间后释放。
//! 用于排查“锁一直拿不到”一类问题。
//!
//! ```bash
//! KEYLOCK_STORE__ADDRS=10.0.0.1:6379,10.0.0.2:6379 keylock-probe job:42 2000
//! ```

use anyhow::{Context, Result, anyhow};
use keylock_shared::{AppConfig, observability};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use keylock::{DistributedLock, DistributedLockConfig, Router};

const SERVICE_NAME: &str = "keylock-probe";
const DEFAULT_HOLD_MS: u64 = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, load_error) = match AppConfig::load(SERVICE_NAME) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    observability::init(&config.service_name, &config.observability)?;
    if let Some(e) = load_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    let mut args = std::env::args().skip(1);
    let key = args
        .next()
        .ok_or_else(|| anyhow!("usage: {} <key> [hold_ms]", SERVICE_NAME))?;
    let hold_ms = args
        .next()
        .map(|raw| raw.parse::<u64>())
        .transpose()
        .context("hold_ms must be an integer")?
        .unwrap_or(DEFAULT_HOLD_MS);

    info!(
        environment = %config.environment,
        addrs = ?config.store.addrs,
        "Configuration loaded"
    );

    let router = Arc::new(Router::from_config(&config.store)?);
    router.health_check().await?;
    info!(
        replicas = router.replica_count(),
        "Store connection established"
    );

    let lock = DistributedLock::new(router, DistributedLockConfig::from(&config.lock));
    let started = Instant::now();
    let guard = lock.mutex(&key).await?;
    info!(
        key = %guard.key(),
        owner = %guard.owner(),
        waited_ms = started.elapsed().as_millis() as u64,
        "Lock acquired"
    );

    tokio::time::sleep(Duration::from_millis(hold_ms)).await;
    guard.release().await?;
    info!(key = %key, hold_ms, "Lock released");

    Ok(())
}
