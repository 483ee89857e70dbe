//! 统一可观测性模块
//!
//! 提供 logging 与 metrics 的统一初始化。
//! 锁组件只依赖 tracing / metrics 门面，由嵌入方决定是否安装导出器。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 日志级别（如 "info", "debug"），RUST_LOG 优先
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 统一初始化可观测性
///
/// 1. Tracing（日志）
/// 2. 指标描述注册
///
/// ```ignore
/// let config = AppConfig::load("keylock-probe")?;
/// keylock_shared::observability::init(&config.service_name, &config.observability)?;
/// ```
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<()> {
    tracing::init(config)?;
    metrics::describe_metrics(service_name);

    info!(
        service = %service_name,
        log_level = %config.log_level,
        log_format = %config.log_format,
        "Observability initialized"
    );
    Ok(())
}
