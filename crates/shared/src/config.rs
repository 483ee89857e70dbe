//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};
use std::path::Path;

use crate::observability::ObservabilityConfig;

/// 环境变量前缀（KEYLOCK_STORE__ADDRS -> store.addrs）
pub const ENV_PREFIX: &str = "KEYLOCK";

/// 共享存储（Redis）连接配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 节点地址列表：第一个为主节点（写），其余为只读副本
    ///
    /// 既可以写成列表，也可以写成逗号分隔的字符串
    #[serde(deserialize_with = "deserialize_addrs")]
    pub addrs: Vec<String>,
    /// 每个节点连接池保留的最大空闲连接数
    pub max_idle: usize,
    /// 每个节点连接池同时借出的最大连接数
    pub max_active: usize,
    pub connect_timeout_ms: u64,
    /// 连接池耗尽时等待空闲连接的最长时间
    pub acquire_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            addrs: vec!["redis://localhost:6379".to_string()],
            max_idle: 80,
            max_active: 12000,
            connect_timeout_ms: 3000,
            acquire_timeout_ms: 5000,
        }
    }
}

/// 分布式锁重试与租约配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub retry_count: u32,
    pub retry_interval_ms: u64,
    /// 锁租约时长，0 表示不设置过期时间
    pub lease_ttl_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            retry_count: 10,
            retry_interval_ms: 100,
            lease_ttl_ms: 30_000,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub store: StoreConfig,
    pub lock: LockSettings,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "keylock".to_string(),
            environment: "development".to_string(),
            store: StoreConfig::default(),
            lock: LockSettings::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（KEYLOCK_ 前缀，层级用双下划线，如 KEYLOCK_STORE__MAX_IDLE -> store.max_idle）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("KEYLOCK_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(service_name, &env, Path::new(&config_dir), ENV_PREFIX)
    }

    /// 指定配置目录与环境变量前缀加载配置
    pub fn load_from(
        service_name: &str,
        env: &str,
        config_dir: &Path,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// 拆分逗号分隔的地址列表，忽略空白项
pub fn split_addrs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn deserialize_addrs<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Addrs {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Addrs::deserialize(deserializer)? {
        Addrs::List(list) => list
            .iter()
            .flat_map(|item| split_addrs(item))
            .collect(),
        Addrs::Joined(joined) => split_addrs(&joined),
    })
}
