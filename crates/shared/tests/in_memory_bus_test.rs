//! 内存消息总线的集成测试
//!
//! 验证总线与重试执行器、事件模型配合时的行为，
//! 这是服务端生产、消费测试所依赖的前提。

use std::time::Duration;

use activity_shared::error::ActivityError;
use activity_shared::events::{EventType, UserEvent};
use activity_shared::kafka::{MessagePublisher, MessageSubscriber};
use activity_shared::retry::{BackoffPolicy, retry_with_policy};
use activity_shared::test_utils::*;
use serde_json::json;

const TOPIC: &str = "user-activity-events";

#[tokio::test]
async fn test_event_round_trips_through_bus() {
    let bus = InMemoryBus::new();
    let subscriber = bus.subscriber();
    subscriber.subscribe(TOPIC).await.unwrap();

    let event = UserEvent::new(
        test_user_id(),
        EventType::ProductView,
        payload_from(json!({"productId": "sku-1"})),
    );
    bus.publish(TOPIC, event.event_id(), &serde_json::to_vec(&event).unwrap())
        .await
        .unwrap();

    let msg = subscriber.receive().await.unwrap().unwrap();
    assert_eq!(msg.key.as_deref(), Some(event.event_id()));

    let decoded: UserEvent = msg.deserialize_payload().unwrap();
    assert_eq!(decoded, event);
    assert_eq!(decoded.payload()["productId"], "sku-1");
}

#[tokio::test]
async fn test_subscribers_read_independently_from_earliest() {
    let bus = InMemoryBus::new();
    bus.publish(TOPIC, "k1", b"first").await.unwrap();

    let early = bus.subscriber();
    early.subscribe(TOPIC).await.unwrap();
    let late = bus.subscriber();
    late.subscribe(TOPIC).await.unwrap();

    assert_eq!(early.receive().await.unwrap().unwrap().payload, b"first");
    assert_eq!(late.receive().await.unwrap().unwrap().payload, b"first");
}

#[tokio::test]
async fn test_topics_are_isolated() {
    let bus = InMemoryBus::new();
    bus.publish("other-topic", "k", b"noise").await.unwrap();
    bus.publish(TOPIC, "k", b"signal").await.unwrap();

    assert_eq!(bus.messages(TOPIC).len(), 1);
    assert_eq!(bus.messages("other-topic").len(), 1);
    assert!(bus.messages("missing").is_empty());
}

#[tokio::test]
async fn test_receive_without_subscription_errors() {
    let bus = InMemoryBus::new();
    let subscriber = bus.subscriber();

    let result = subscriber.receive().await.unwrap();
    assert!(matches!(result, Err(ActivityError::NotConnected(_))));
}

#[tokio::test]
async fn test_retry_executor_over_flaky_bus() {
    let bus = InMemoryBus::new();
    bus.fail_next(2);
    let policy = BackoffPolicy::linear(3, Duration::from_millis(1));

    let result = retry_with_policy(&policy, "publish", ActivityError::is_retryable, |_| {
        let bus = bus.clone();
        async move { bus.publish(TOPIC, "k", b"payload").await }
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(bus.publish_calls(), 3);
    assert_eq!(bus.messages(TOPIC).len(), 1);
}

#[tokio::test]
async fn test_retry_executor_reports_attempts_on_exhaustion() {
    let bus = InMemoryBus::new();
    bus.fail_always(true);
    let policy = BackoffPolicy::linear(2, Duration::from_millis(1));

    let err = retry_with_policy(&policy, "publish", ActivityError::is_retryable, |_| {
        let bus = bus.clone();
        async move { bus.publish(TOPIC, "k", b"payload").await }
    })
    .await
    .unwrap_err();

    assert_eq!(err.attempts, 3);
    assert_eq!(err.last_error.code(), "KAFKA_ERROR");
    assert_eq!(bus.publish_calls(), 3);
}

#[test]
fn test_helpers_build_valid_events() {
    let event = test_event("evt-1", EventType::Logout);
    assert_eq!(event.event_id(), "evt-1");
    assert_eq!(event.user_id(), "test-user");
    assert!(event.payload().is_empty());

    assert_ne!(test_user_id(), test_user_id());
    assert!(payload_from(json!([1, 2])).is_empty());
}
