//! 应用状态定义

use std::sync::Arc;

use crate::ledger::Ledger;
use crate::producer::EventProducer;

/// Axum 路由共享状态
///
/// 生产者负责受理新事件，账本只读用于查询已处理事件
#[derive(Clone)]
pub struct AppState {
    pub producer: Arc<EventProducer>,
    pub ledger: Arc<Ledger>,
}

impl AppState {
    pub fn new(producer: Arc<EventProducer>, ledger: Arc<Ledger>) -> Self {
        Self { producer, ledger }
    }
}
