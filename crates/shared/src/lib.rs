//! 共享库
//!
//! 包含锁组件共用的配置加载与可观测性初始化代码。

pub mod config;
pub mod observability;

pub use config::{AppConfig, LockSettings, StoreConfig};
pub use observability::ObservabilityConfig;
