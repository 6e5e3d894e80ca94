//! 请求与事件结构校验
//!
//! 两类入口：
//! - 生成事件请求：逐项校验并返回全部违规项，供 HTTP 层原样回给调用方；
//! - 消费到的消息：只做布尔判定，不合法的消息直接丢弃，不需要细节。

use activity_shared::events::{EventPayload, EventType, UserEvent};
use serde_json::Value;

use crate::error::ServiceError;

/// 生成事件请求的单项违规
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestViolation {
    #[error("Request body must be a JSON object")]
    NotAnObject,

    #[error("userId is required and must be a non-empty string")]
    InvalidUserId,

    #[error("eventType is required and must be a string")]
    MissingEventType,

    #[error("eventType must be one of: {}", EventType::allowed_values())]
    UnknownEventType { value: String },

    #[error("payload must be a JSON object when provided")]
    InvalidPayload,
}

impl RequestViolation {
    /// 违规涉及的字段名，整体结构错误时为 None
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::NotAnObject => None,
            Self::InvalidUserId => Some("userId"),
            Self::MissingEventType | Self::UnknownEventType { .. } => Some("eventType"),
            Self::InvalidPayload => Some("payload"),
        }
    }
}

/// 通过校验的生成事件请求
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateEventRequest {
    pub user_id: String,
    pub event_type: EventType,
    pub payload: EventPayload,
}

impl GenerateEventRequest {
    /// 由请求构造新事件，分配 eventId 与时间戳
    pub fn into_event(self) -> UserEvent {
        UserEvent::new(self.user_id, self.event_type, self.payload)
    }
}

/// 解析并校验生成事件请求
///
/// 根节点不是对象时只返回一项 `NotAnObject`；否则各字段独立校验，违规项全部返回。
pub fn parse_request(input: &Value) -> Result<GenerateEventRequest, Vec<RequestViolation>> {
    let Some(obj) = input.as_object() else {
        return Err(vec![RequestViolation::NotAnObject]);
    };

    let mut violations = Vec::new();

    let user_id = match obj.get("userId").and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Some(s.to_string()),
        _ => {
            violations.push(RequestViolation::InvalidUserId);
            None
        }
    };

    let event_type = match obj.get("eventType").and_then(Value::as_str) {
        Some(s) if !s.is_empty() => match s.parse::<EventType>() {
            Ok(t) => Some(t),
            Err(_) => {
                violations.push(RequestViolation::UnknownEventType {
                    value: s.to_string(),
                });
                None
            }
        },
        _ => {
            violations.push(RequestViolation::MissingEventType);
            None
        }
    };

    // 缺省时为空对象；显式给出的 null 或数组都不合法
    let payload = match obj.get("payload") {
        None => Some(EventPayload::new()),
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => {
            violations.push(RequestViolation::InvalidPayload);
            None
        }
    };

    match (user_id, event_type, payload) {
        (Some(user_id), Some(event_type), Some(payload)) if violations.is_empty() => {
            Ok(GenerateEventRequest {
                user_id,
                event_type,
                payload,
            })
        }
        _ => Err(violations),
    }
}

/// 只返回违规列表，空列表表示请求合法
pub fn validate_request(input: &Value) -> Vec<RequestViolation> {
    parse_request(input).err().unwrap_or_default()
}

/// 消费端的结构判定
///
/// eventId、userId、timestamp 为非空字符串，eventType 属于允许集合，payload 为对象。
/// timestamp 只校验类型，原文保留，不做格式解析。
pub fn is_valid_event(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };

    let non_empty_str = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
    };

    non_empty_str("eventId")
        && non_empty_str("userId")
        && non_empty_str("timestamp")
        && obj
            .get("eventType")
            .and_then(Value::as_str)
            .is_some_and(|s| s.parse::<EventType>().is_ok())
        && obj.get("payload").is_some_and(Value::is_object)
}

/// 解码一条消息体为 UserEvent
///
/// 空消息体按 `{}` 处理。JSON 非法返回 `Decode`，结构不符返回 `SchemaViolation`。
pub fn decode_event(raw: &[u8]) -> Result<UserEvent, ServiceError> {
    let raw: &[u8] = if raw.is_empty() { b"{}" } else { raw };

    let value: Value =
        serde_json::from_slice(raw).map_err(|e| ServiceError::Decode(e.to_string()))?;

    if !is_valid_event(&value) {
        return Err(ServiceError::SchemaViolation(
            "Invalid UserEvent schema".to_string(),
        ));
    }

    serde_json::from_value(value).map_err(|e| ServiceError::SchemaViolation(e.to_string()))
}
