//! 测试工具模块
//!
//! 提供内存消息总线（`InMemoryBus`）和测试数据生成辅助函数，
//! 让生产、消费管道在没有 Kafka 的环境下也能端到端运行。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::ActivityError;
use crate::events::{EventPayload, EventType, UserEvent};
use crate::kafka::{ConsumerMessage, MessagePublisher, MessageSubscriber};

// ==================== 测试数据辅助 ====================

/// 生成唯一的测试用户 ID
pub fn test_user_id() -> String {
    format!("test-user-{}", Uuid::new_v4())
}

/// 构造一个指定 event_id 的测试事件
pub fn test_event(event_id: &str, event_type: EventType) -> UserEvent {
    UserEvent::from_parts(
        event_id,
        "test-user",
        event_type,
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        EventPayload::new(),
    )
}

/// 从 `json!` 对象构造事件负载，非对象输入返回空负载
pub fn payload_from(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}

// ==================== 内存消息总线 ====================

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<String, Vec<ConsumerMessage>>>,
    notify: Notify,
    publish_calls: AtomicU32,
    failures_remaining: AtomicU32,
    fail_always: AtomicBool,
    connected: AtomicBool,
}

/// 内存消息总线
///
/// 单分区、按追加顺序分配 offset。自身实现 `MessagePublisher`，
/// 通过 `subscriber()` 获得独立游标的订阅端。可注入发送失败以模拟 broker 故障。
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个从最早 offset 开始读取的订阅端
    pub fn subscriber(&self) -> InMemorySubscriber {
        InMemorySubscriber {
            bus: self.clone(),
            topic: Mutex::new(None),
            cursor: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// 接下来的 `n` 次发送返回错误
    pub fn fail_next(&self, n: u32) {
        self.inner.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// 所有发送都返回错误，直到再次以 false 调用
    pub fn fail_always(&self, enabled: bool) {
        self.inner.fail_always.store(enabled, Ordering::SeqCst);
    }

    /// 累计发送调用次数（含失败）
    pub fn publish_calls(&self) -> u32 {
        self.inner.publish_calls.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// 某个 topic 上已写入的全部消息
    pub fn messages(&self, topic: &str) -> Vec<ConsumerMessage> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// 绕过发送逻辑直接写入原始字节，用于构造畸形消息
    pub fn inject_raw(&self, topic: &str, key: Option<&str>, payload: &[u8]) {
        self.append(topic, key.map(String::from), payload.to_vec());
    }

    fn append(&self, topic: &str, key: Option<String>, payload: Vec<u8>) {
        {
            let mut topics = self.inner.topics.lock();
            let log = topics.entry(topic.to_string()).or_default();
            log.push(ConsumerMessage {
                topic: topic.to_string(),
                partition: 0,
                offset: log.len() as i64,
                key,
                payload,
            });
        }
        self.inner.notify.notify_waiters();
    }

    fn take_injected_failure(&self) -> bool {
        if self.inner.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        self.inner
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBus {
    async fn connect(&self) -> Result<(), ActivityError> {
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ActivityError> {
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), ActivityError> {
        self.inner.publish_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_injected_failure() {
            return Err(ActivityError::Kafka("模拟 broker 故障".to_string()));
        }

        self.append(topic, Some(key.to_string()), value.to_vec());
        Ok(())
    }
}

/// 内存总线的订阅端，持有自己的读取游标
pub struct InMemorySubscriber {
    bus: InMemoryBus,
    topic: Mutex<Option<String>>,
    cursor: AtomicUsize,
    closed: AtomicBool,
}

#[async_trait]
impl MessageSubscriber for InMemorySubscriber {
    async fn connect(&self) -> Result<(), ActivityError> {
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ActivityError> {
        *self.topic.lock() = Some(topic.to_string());
        self.cursor.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn receive(&self) -> Option<Result<ConsumerMessage, ActivityError>> {
        loop {
            // 先登记唤醒再检查，避免检查与等待之间漏掉新消息
            let notified = self.bus.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) {
                return None;
            }

            let Some(topic) = self.topic.lock().clone() else {
                return Some(Err(ActivityError::NotConnected("未订阅任何 topic".to_string())));
            };

            let cursor = self.cursor.load(Ordering::SeqCst);
            let next = self
                .bus
                .inner
                .topics
                .lock()
                .get(&topic)
                .and_then(|log| log.get(cursor).cloned());

            if let Some(msg) = next {
                self.cursor.store(cursor + 1, Ordering::SeqCst);
                return Some(Ok(msg));
            }

            notified.await;
        }
    }

    async fn disconnect(&self) -> Result<(), ActivityError> {
        self.closed.store(true, Ordering::SeqCst);
        self.bus.inner.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_then_receive_in_order() {
        let bus = InMemoryBus::new();
        let sub = bus.subscriber();
        sub.subscribe("t").await.unwrap();

        bus.publish("t", "k1", b"one").await.unwrap();
        bus.publish("t", "k2", b"two").await.unwrap();

        let first = sub.receive().await.unwrap().unwrap();
        let second = sub.receive().await.unwrap().unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(first.offset, 0);
        assert_eq!(second.key.as_deref(), Some("k2"));
        assert_eq!(second.offset, 1);
    }

    #[tokio::test]
    async fn test_receive_waits_for_new_message() {
        let bus = InMemoryBus::new();
        let sub = bus.subscriber();
        sub.subscribe("t").await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("t", "k", b"late").await.unwrap();
        });

        let msg = tokio::time::timeout(Duration::from_secs(2), sub.receive())
            .await
            .expect("等待消息超时")
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, b"late");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let bus = InMemoryBus::new();
        bus.fail_next(2);

        assert!(bus.publish("t", "k", b"x").await.is_err());
        assert!(bus.publish("t", "k", b"x").await.is_err());
        assert!(bus.publish("t", "k", b"x").await.is_ok());
        assert_eq!(bus.publish_calls(), 3);
        assert_eq!(bus.messages("t").len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let bus = InMemoryBus::new();
        let sub = bus.subscriber();
        sub.subscribe("t").await.unwrap();
        sub.disconnect().await.unwrap();

        assert!(sub.receive().await.is_none());
    }
}
