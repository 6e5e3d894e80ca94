//! 用户行为事件服务专用错误类型
//!
//! 在共享库 ActivityError 基础上定义本服务特有的错误变体，
//! 使上层可以精确区分"解码失败/结构非法/发布失败/处理失败"等不同失败原因。
//! HTTP 层的错误由 `ApiError` 映射为状态码与响应体。

use activity_shared::error::ActivityError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::validator::RequestViolation;

/// 事件管道错误
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// 消息体不是合法 JSON
    #[error("消息解码失败: {0}")]
    Decode(String),

    /// JSON 合法但不符合 UserEvent 结构
    #[error("事件结构非法: {0}")]
    SchemaViolation(String),

    /// 所有发送尝试均失败
    #[error("Unable to publish event after retries: {message}")]
    Publish { attempts: u32, message: String },

    /// 处理器或账本在处理合法消息时失败
    #[error("事件处理失败: {0}")]
    Processing(String),

    /// 消费者状态机不允许当前操作
    #[error("消费者状态不允许 {operation}: 当前 {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] ActivityError),
}

impl ServiceError {
    /// 用于日志与指标的错误分类
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode_error",
            Self::SchemaViolation(_) => "schema_violation",
            Self::Publish { .. } => "publish_error",
            Self::Processing(_) => "processing_error",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shared(_) => "shared_error",
        }
    }
}

/// HTTP 接口错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 请求未通过校验，携带全部违规项
    #[error("Invalid request payload")]
    InvalidRequest(Vec<RequestViolation>),

    /// 事件发布失败
    #[error("Failed to publish event")]
    PublishFailed(#[source] ServiceError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PublishFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 发布失败的细节只进日志，响应体使用固定提示
        let body = match &self {
            Self::InvalidRequest(violations) => {
                let errors: Vec<String> = violations.iter().map(ToString::to_string).collect();
                json!({ "message": self.to_string(), "errors": errors })
            }
            Self::PublishFailed(e) => {
                tracing::error!(error = %e, "Failed to publish event");
                json!({ "message": self.to_string() })
            }
        };

        (status, Json(body)).into_response()
    }
}
