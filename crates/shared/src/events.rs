//! 用户行为事件模型
//!
//! 定义系统中流转的唯一事件类型 `UserEvent` 及其事件类型枚举。
//! 事件在请求受理时创建，经 Kafka 投递后由消费端写入账本，构造后不可变。

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 事件负载：任意 JSON 对象（不能是数组或 null）
pub type EventPayload = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// EventType — 事件类型枚举
// ---------------------------------------------------------------------------

/// 允许的事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Login,
    Logout,
    ProductView,
}

impl EventType {
    /// 全部允许值，顺序即错误提示中的列举顺序
    pub const ALL: [EventType; 3] = [Self::Login, Self::Logout, Self::ProductView];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::ProductView => "PRODUCT_VIEW",
        }
    }

    /// 以 ", " 连接的允许值列表，用于校验错误信息
    pub fn allowed_values() -> String {
        Self::ALL
            .iter()
            .map(EventType::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知事件类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("未知的事件类型: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// UserEvent — 用户行为事件
// ---------------------------------------------------------------------------

/// 用户行为事件
///
/// 字段私有、只读访问，保证事件一经构造便不可修改。
/// JSON 序列化使用 camelCase，即 Kafka 消息体的线上格式；`event_id` 同时是消息 key。
/// `timestamp` 保留收到时的原始字符串，消费后原样写入账本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    event_id: String,
    user_id: String,
    event_type: EventType,
    timestamp: String,
    #[serde(default)]
    payload: EventPayload,
}

impl UserEvent {
    /// 受理请求时构造新事件：生成 UUID v4 作为 event_id，
    /// 时间戳取当前 UTC 时间，毫秒精度、Z 结尾，例如 `2025-01-15T10:30:00.000Z`
    pub fn new(user_id: impl Into<String>, event_type: EventType, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            event_type,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            payload,
        }
    }

    /// 以既有标识重建事件，用于回放已知事件或测试
    pub fn from_parts(
        event_id: impl Into<String>,
        user_id: impl Into<String>,
        event_type: EventType,
        timestamp: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            user_id: user_id.into(),
            event_type,
            timestamp: timestamp.into(),
            payload,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
