//! 共享库
//!
//! 包含用户行为事件管道共用的配置、错误处理、事件模型、消息总线抽象、
//! 重试策略与可观测性等基础设施代码。

pub mod config;
pub mod error;
pub mod events;
pub mod kafka;
pub mod observability;
pub mod retry;
pub mod test_utils;
