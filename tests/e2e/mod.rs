//! keylock 端到端测试
//!
//! 依赖真实的 Redis 实例（默认 redis://localhost:6379，可通过 REDIS_URL 覆盖），
//! 所有用例默认忽略，使用 `cargo test --test e2e -- --ignored` 运行。
//!
//! 覆盖：
//! - 连接路由与健康检查
//! - 分布式锁的互斥、超时与租约过期
//! - 令牌校验的释放

pub mod setup;
pub mod suites;

pub use setup::TestEnvironment;
