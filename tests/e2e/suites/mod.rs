//! 测试套件

pub mod distributed_lock;
pub mod router;
