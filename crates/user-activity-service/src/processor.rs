//! 事件处理器
//!
//! 消费端唯一的幂等落点：把解码后的事件写入账本，重复的 eventId 只确认不生效。

use std::sync::Arc;

use activity_shared::events::UserEvent;
use async_trait::async_trait;
use tracing::info;

use crate::error::ServiceError;
use crate::ledger::Ledger;

/// 单条事件的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 首次见到该 eventId，已写入账本
    Recorded,
    /// eventId 已存在，按已处理确认
    Duplicate,
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::Duplicate => "duplicate",
        }
    }
}

/// 事件处理管道的核心抽象
///
/// 消费循环只依赖此 trait，测试中可替换为 mock 以观察调用情况。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: &UserEvent) -> Result<ProcessOutcome, ServiceError>;
}

/// 基于账本的事件处理器
#[derive(Clone)]
pub struct LedgerEventProcessor {
    ledger: Arc<Ledger>,
}

impl LedgerEventProcessor {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl EventProcessor for LedgerEventProcessor {
    async fn process(&self, event: &UserEvent) -> Result<ProcessOutcome, ServiceError> {
        if self.ledger.add_if_new(event) {
            info!(
                event_id = %event.event_id(),
                user_id = %event.user_id(),
                event_type = %event.event_type(),
                "Processed event"
            );
            Ok(ProcessOutcome::Recorded)
        } else {
            info!(event_id = %event.event_id(), "Duplicate event ignored");
            Ok(ProcessOutcome::Duplicate)
        }
    }
}
