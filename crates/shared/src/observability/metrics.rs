//! 锁相关指标
//!
//! 基于 metrics 门面记录，未安装 recorder 时所有调用都是空操作。

/// 注册指标描述，会出现在导出端点的 HELP 注释中
pub fn describe_metrics(service_name: &str) {
    metrics::describe_counter!(
        "lock_acquisitions_total",
        "Total number of lock acquisition attempts"
    );
    metrics::describe_histogram!(
        "lock_wait_duration_seconds",
        "Time spent waiting for a lock"
    );
    metrics::describe_counter!("lock_timeouts_total", "Total number of lock timeouts");
    metrics::describe_counter!("lock_releases_total", "Total number of lock releases");
    metrics::describe_counter!("store_dials_total", "Total number of store dials");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 记录一次加锁结果
///
/// `kind` 为 local / distributed，`status` 为 acquired / timeout / error
#[inline]
pub fn record_lock_acquisition(kind: &'static str, status: &'static str, wait_secs: f64) {
    metrics::counter!("lock_acquisitions_total", "kind" => kind, "status" => status).increment(1);
    metrics::histogram!("lock_wait_duration_seconds", "kind" => kind).record(wait_secs);

    if status == "timeout" {
        metrics::counter!("lock_timeouts_total", "kind" => kind).increment(1);
    }
}

/// 记录一次释放结果，`status` 为 released / stale / error
#[inline]
pub fn record_lock_release(kind: &'static str, status: &'static str) {
    metrics::counter!("lock_releases_total", "kind" => kind, "status" => status).increment(1);
}

/// 记录一次建连
#[inline]
pub fn record_store_dial(addr: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    metrics::counter!(
        "store_dials_total",
        "addr" => addr.to_string(),
        "status" => status
    )
    .increment(1);
}
