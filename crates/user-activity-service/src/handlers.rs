//! HTTP 请求处理器

use activity_shared::events::UserEvent;
use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;
use crate::validator::{RequestViolation, parse_request};

/// 生成事件的响应体
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateEventResponse {
    pub event_id: String,
}

/// 受理并发布一条用户行为事件
///
/// POST /events/generate
///
/// 空请求体按 `{}` 校验；无法解析为 JSON 的请求体视为非对象。
pub async fn generate_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<GenerateEventResponse>), ApiError> {
    let input: Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|_| ApiError::InvalidRequest(vec![RequestViolation::NotAnObject]))?
    };

    let event = parse_request(&input)
        .map_err(ApiError::InvalidRequest)?
        .into_event();

    state
        .producer
        .publish(&event)
        .await
        .map_err(ApiError::PublishFailed)?;

    info!(
        event_id = %event.event_id(),
        event_type = %event.event_type(),
        "事件已受理"
    );

    Ok((
        StatusCode::CREATED,
        Json(GenerateEventResponse {
            event_id: event.event_id().to_string(),
        }),
    ))
}

/// 按处理顺序返回已处理事件
///
/// GET /events/processed
pub async fn list_processed(State(state): State<AppState>) -> Json<Vec<UserEvent>> {
    Json(state.ledger.get_all())
}

/// 存活探针
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
