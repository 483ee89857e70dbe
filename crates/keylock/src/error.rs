//! 锁组件错误类型
//!
//! 区分配置错误、建连错误、加锁超时与存储命令错误

use thiserror::Error;

/// 锁组件错误类型
#[derive(Debug, Error)]
pub enum LockError {
    #[error("配置无效: {0}")]
    Config(String),

    #[error("连接存储节点失败: addr={addr}, {message}")]
    Dial { addr: String, message: String },

    #[error("连接池已耗尽: addr={addr}")]
    PoolExhausted { addr: String },

    #[error("获取锁超时: resource={resource}, attempts={attempts}")]
    LockTimeout { resource: String, attempts: u32 },

    #[error("存储命令执行失败: {0}")]
    StoreCommand(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 锁组件 Result 类型别名
pub type Result<T> = std::result::Result<T, LockError>;

impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreCommand(err.to_string())
    }
}

impl LockError {
    /// 是否值得由调用方重试
    ///
    /// 加锁超时同样可重试：资源只是暂时被占用
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. }
                | Self::PoolExhausted { .. }
                | Self::LockTimeout { .. }
                | Self::StoreCommand(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Dial { .. } => "DIAL_ERROR",
            Self::PoolExhausted { .. } => "POOL_EXHAUSTED",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::StoreCommand(_) => "STORE_COMMAND_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
