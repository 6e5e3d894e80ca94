//! 事件生产者
//!
//! 以 eventId 为 key 将事件 JSON 发送到配置的 topic，失败时按线性退避重试。
//! 每次发布各自持有退避计时，互不阻塞。

use std::sync::Arc;

use activity_shared::error::ActivityError;
use activity_shared::events::UserEvent;
use activity_shared::kafka::MessagePublisher;
use activity_shared::observability::metrics;
use activity_shared::retry::{BackoffPolicy, retry_with_policy};
use tracing::{debug, error, info};

use crate::error::ServiceError;

/// 事件生产者
#[derive(Clone)]
pub struct EventProducer {
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
    policy: BackoffPolicy,
}

impl EventProducer {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        topic: impl Into<String>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            policy,
        }
    }

    pub async fn connect(&self) -> Result<(), ServiceError> {
        self.publisher.connect().await?;
        info!(topic = %self.topic, "事件生产者已连接");
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), ServiceError> {
        self.publisher.disconnect().await?;
        info!(topic = %self.topic, "事件生产者已断开");
        Ok(())
    }

    /// 发布事件
    ///
    /// 最多尝试 `max_retries + 1` 次，第 N 次失败后等待 `base_delay * N`。
    /// 任一次成功立即返回；全部失败时返回携带最后一次错误信息的 `Publish` 错误。
    pub async fn publish(&self, event: &UserEvent) -> Result<(), ServiceError> {
        let value = serde_json::to_vec(event).map_err(ActivityError::from)?;
        let key = event.event_id();
        let mut attempts = 0;

        let result = retry_with_policy(
            &self.policy,
            "publish_event",
            ActivityError::is_retryable,
            |attempt| {
                attempts = attempt;
                let value = &value;
                async move {
                    debug!(event_id = %key, attempt, "发送事件");
                    self.publisher
                        .publish(&self.topic, key, value)
                        .await
                        .inspect_err(|e| {
                            error!(event_id = %key, attempt, error = %e, "Producer send failed");
                        })
                }
            },
        )
        .await;

        match result {
            Ok(()) => {
                metrics::record_publish("success", attempts);
                info!(event_id = %key, topic = %self.topic, attempts, "事件已发布");
                Ok(())
            }
            Err(err) => {
                metrics::record_publish("failure", err.attempts);
                Err(ServiceError::Publish {
                    attempts: err.attempts,
                    message: err.last_error.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use activity_shared::events::EventType;
    use activity_shared::test_utils::{InMemoryBus, test_event};
    use metrics_exporter_prometheus::PrometheusBuilder;

    const TOPIC: &str = "user-activity-events";

    fn producer_with(bus: &InMemoryBus, max_retries: u32) -> EventProducer {
        EventProducer::new(
            Arc::new(bus.clone()),
            TOPIC,
            BackoffPolicy::linear(max_retries, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_publishes_event_keyed_by_event_id() {
        let bus = InMemoryBus::new();
        let producer = producer_with(&bus, 2);
        let event = test_event("evt-1", EventType::Login);

        producer.publish(&event).await.unwrap();

        assert_eq!(bus.publish_calls(), 1);
        let messages = bus.messages(TOPIC);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.as_deref(), Some("evt-1"));

        let decoded: UserEvent = messages[0].deserialize_payload().unwrap();
        assert_eq!(decoded, event);
    }

    #[tokio::test]
    async fn test_retries_and_eventually_succeeds() {
        let bus = InMemoryBus::new();
        bus.fail_next(1);
        let producer = producer_with(&bus, 2);

        producer
            .publish(&test_event("evt-2", EventType::Login))
            .await
            .unwrap();

        assert_eq!(bus.publish_calls(), 2);
        assert_eq!(bus.messages(TOPIC).len(), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_last_allowed_attempt() {
        let bus = InMemoryBus::new();
        bus.fail_next(2);
        let producer = producer_with(&bus, 2);

        producer
            .publish(&test_event("evt-3", EventType::Logout))
            .await
            .unwrap();

        assert_eq!(bus.publish_calls(), 3);
    }

    #[tokio::test]
    async fn test_fails_after_exhausting_retries() {
        let bus = InMemoryBus::new();
        bus.fail_always(true);
        let producer = producer_with(&bus, 2);

        let err = producer
            .publish(&test_event("evt-4", EventType::Login))
            .await
            .unwrap_err();

        assert_eq!(bus.publish_calls(), 3);
        assert!(bus.messages(TOPIC).is_empty());
        match err {
            ServiceError::Publish { attempts, message } => {
                assert_eq!(attempts, 3);
                assert!(message.contains("模拟 broker 故障"));
            }
            other => panic!("期望 Publish 错误，实际 {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_linear_between_attempts() {
        let bus = InMemoryBus::new();
        bus.fail_always(true);
        let producer = EventProducer::new(
            Arc::new(bus.clone()),
            TOPIC,
            BackoffPolicy::linear(3, Duration::from_millis(500)),
        );
        let start = tokio::time::Instant::now();

        let _ = producer.publish(&test_event("evt-5", EventType::Login)).await;

        // 500 * 1 + 500 * 2 + 500 * 3
        assert_eq!(bus.publish_calls(), 4);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_publishes_back_off_independently() {
        let failing = InMemoryBus::new();
        failing.fail_always(true);
        let healthy = InMemoryBus::new();

        let slow = EventProducer::new(
            Arc::new(failing.clone()),
            TOPIC,
            BackoffPolicy::linear(2, Duration::from_secs(10)),
        );
        let fast = producer_with(&healthy, 2);

        let slow_task = tokio::spawn(async move {
            slow.publish(&test_event("slow", EventType::Login)).await
        });

        let start = tokio::time::Instant::now();
        fast.publish(&test_event("fast", EventType::Login))
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));

        assert!(slow_task.await.unwrap().is_err());
        assert_eq!(failing.publish_calls(), 3);
    }

    /// 在线程本地 recorder 下执行一次发布，返回渲染后的指标文本
    fn publish_and_render_metrics(bus: &InMemoryBus, event_id: &str) -> String {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let producer = producer_with(bus, 2);

        ::metrics::with_local_recorder(&recorder, || {
            tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap()
                .block_on(async {
                    let _ = producer.publish(&test_event(event_id, EventType::Login)).await;
                });
        });

        handle.render()
    }

    #[test]
    fn test_attempt_metric_counts_every_send() {
        let bus = InMemoryBus::new();
        bus.fail_next(2);

        let rendered = publish_and_render_metrics(&bus, "evt-metrics");

        assert_eq!(bus.publish_calls(), 3);
        assert!(rendered.contains("event_publish_attempts_total 3"), "{rendered}");
        assert!(rendered.contains(r#"events_published_total{status="success"} 1"#), "{rendered}");
    }

    #[test]
    fn test_attempt_metric_on_exhaustion() {
        let bus = InMemoryBus::new();
        bus.fail_always(true);

        let rendered = publish_and_render_metrics(&bus, "evt-exhausted");

        assert!(rendered.contains("event_publish_attempts_total 3"), "{rendered}");
        assert!(rendered.contains(r#"events_published_total{status="failure"} 1"#), "{rendered}");
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_delegate() {
        let bus = InMemoryBus::new();
        let producer = producer_with(&bus, 0);

        producer.connect().await.unwrap();
        assert!(bus.is_connected());
        producer.disconnect().await.unwrap();
        assert!(!bus.is_connected());
    }
}
