//! 消息总线抽象与 Kafka 实现
//!
//! 以 `MessagePublisher` / `MessageSubscriber` 两个最小能力接口描述 broker，
//! 生产、消费逻辑只依赖接口，既可以挂在 rdkafka 上运行，也可以换成内存实现做测试。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::error::ActivityError;

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
        }
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, ActivityError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

// ---------------------------------------------------------------------------
// 能力接口
// ---------------------------------------------------------------------------

/// 发布端能力：建立/释放会话，按 key 向 topic 发送一条消息
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn connect(&self) -> Result<(), ActivityError>;

    async fn disconnect(&self) -> Result<(), ActivityError>;

    async fn publish(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), ActivityError>;
}

/// 订阅端能力：建立会话、订阅 topic、逐条拉取消息
#[async_trait]
pub trait MessageSubscriber: Send + Sync {
    async fn connect(&self) -> Result<(), ActivityError>;

    /// 订阅 topic，从最早可用的 offset 开始读
    async fn subscribe(&self, topic: &str) -> Result<(), ActivityError>;

    /// 拉取下一条消息；`None` 表示消息流已结束
    async fn receive(&self) -> Option<Result<ConsumerMessage, ActivityError>>;

    async fn disconnect(&self) -> Result<(), ActivityError>;
}

/// 公共客户端配置：client.id、broker 地址与连接/请求超时
fn base_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("client.id", &config.client_id)
        .set("bootstrap.servers", &config.brokers)
        .set(
            "socket.connection.setup.timeout.ms",
            config.connection_timeout_ms.to_string(),
        )
        .set("socket.timeout.ms", config.request_timeout_ms.to_string());
    client
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 基于 `FutureProducer` 的发布端实现
///
/// `FutureProducer` 本身是 Arc 包装的，Clone 开销很小。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    connection_timeout: Duration,
    request_timeout: Duration,
    connected: Arc<AtomicBool>,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// rdkafka 的重试关闭（`message.send.max.retries=0`），重试由上层退避策略统一负责，
    /// 避免两层重试叠加导致实际尝试次数不可控。
    pub fn new(config: &KafkaConfig) -> Result<Self, ActivityError> {
        let producer: FutureProducer = base_client_config(config)
            .set("request.timeout.ms", config.request_timeout_ms.to_string())
            .set("message.timeout.ms", config.request_timeout_ms.to_string())
            .set("message.send.max.retries", "0")
            .create()
            .map_err(|e| ActivityError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, client_id = %config.client_id, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            connection_timeout: config.connection_timeout(),
            request_timeout: config.request_timeout(),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl MessagePublisher for KafkaProducer {
    /// 通过一次元数据请求确认 broker 可达
    async fn connect(&self) -> Result<(), ActivityError> {
        let producer = self.producer.clone();
        let timeout = self.connection_timeout;

        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|_| ())
        })
        .await
        .map_err(|e| ActivityError::Internal(format!("元数据请求任务异常: {e}")))?
        .map_err(|e| ActivityError::Kafka(format!("连接 broker 失败: {e}")))?;

        self.connected.store(true, Ordering::SeqCst);
        info!("Kafka 生产者已连接");
        Ok(())
    }

    /// 刷出发送队列中尚未确认的消息后断开
    async fn disconnect(&self) -> Result<(), ActivityError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let producer = self.producer.clone();
        let timeout = self.request_timeout;

        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| ActivityError::Internal(format!("flush 任务异常: {e}")))?
            .map_err(|e| ActivityError::Kafka(format!("flush 失败: {e}")))?;

        info!("Kafka 生产者已断开");
        Ok(())
    }

    async fn publish(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), ActivityError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ActivityError::NotConnected("producer".to_string()));
        }

        let record = FutureRecord::to(topic).key(key).payload(value);

        let delivery = self
            .producer
            .send(record, self.request_timeout)
            .await
            .map_err(|(e, _)| ActivityError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 基于 `StreamConsumer` 的订阅端实现
///
/// 开启自动提交：消息交给处理器后即视为已消费，处理失败也不会重投。
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    group_id: String,
    connection_timeout: Duration,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self, ActivityError> {
        let consumer: StreamConsumer = base_client_config(config)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| ActivityError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            "Kafka 消费者已初始化"
        );
        Ok(Self {
            consumer: Arc::new(consumer),
            group_id: config.consumer_group.clone(),
            connection_timeout: config.connection_timeout(),
        })
    }
}

#[async_trait]
impl MessageSubscriber for KafkaConsumer {
    async fn connect(&self) -> Result<(), ActivityError> {
        let consumer = self.consumer.clone();
        let timeout = self.connection_timeout;

        tokio::task::spawn_blocking(move || consumer.fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(|e| ActivityError::Internal(format!("元数据请求任务异常: {e}")))?
            .map_err(|e| ActivityError::Kafka(format!("连接 broker 失败: {e}")))?;

        info!(group_id = %self.group_id, "Kafka 消费者已连接");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ActivityError> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| ActivityError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(topic, "已订阅 Kafka topic");
        Ok(())
    }

    async fn receive(&self) -> Option<Result<ConsumerMessage, ActivityError>> {
        let result = self
            .consumer
            .recv()
            .await
            .map(|msg| ConsumerMessage::from_borrowed(&msg))
            .map_err(|e| ActivityError::Kafka(format!("接收消息出错: {e}")));
        Some(result)
    }

    async fn disconnect(&self) -> Result<(), ActivityError> {
        self.consumer.unsubscribe();
        warn!(group_id = %self.group_id, "Kafka 消费者已取消订阅");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
