//! 路由配置模块

use std::any::Any;

use activity_shared::observability::middleware as obs_middleware;
use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;

use crate::{handlers, state::AppState};

/// 构建完整的 HTTP 路由
///
/// 所有路由都经过请求 ID 与请求追踪中间件；handler 内部 panic 转为 500
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/events/generate", post(handlers::generate_event))
        .route("/events/processed", get(handlers::list_processed))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "Unhandled server error");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "Internal server error" })),
    )
        .into_response()
}
