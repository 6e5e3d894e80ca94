//! 统一错误处理模块
//!
//! 定义系统中所有共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum ActivityError {
    // ==================== 消息总线错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("消息总线未连接: {0}")]
    NotConnected(String),

    // ==================== 序列化错误 ====================
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, ActivityError>;

impl ActivityError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::NotConnected(_) => "NOT_CONNECTED",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 只有传输层故障值得重试；序列化或参数问题重试多少次结果都一样。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Kafka(_) | Self::NotConnected(_))
    }
}
