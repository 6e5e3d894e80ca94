//! 事件消费者
//!
//! 订阅事件 topic，逐条解码、校验并交给 `EventProcessor`。
//! 非法消息与处理失败只记录日志后丢弃，消费循环不会因单条消息失败而停止。
//! offset 自动提交，失败的消息不会重投。

use std::fmt;
use std::sync::Arc;

use activity_shared::kafka::{ConsumerMessage, MessageSubscriber};
use activity_shared::observability::metrics;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ServiceError;
use crate::processor::{EventProcessor, ProcessOutcome};
use crate::validator::decode_event;

/// 消费者生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    /// 正在建立会话，此时拒绝其他生命周期操作
    Connecting,
    /// 会话已建立并完成订阅
    Connected,
    /// 消费循环运行中
    Running,
    /// 正在停止循环并释放会话
    Disconnecting,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Running => "Running",
            Self::Disconnecting => "Disconnecting",
        };
        f.write_str(name)
    }
}

/// 事件消费者
///
/// 状态流转：`Disconnected -> Connected -> Running -> Disconnected`。
/// `connect` 只能从 Disconnected 调用，`start` 只能从 Connected 调用，
/// `disconnect` 在任意稳定状态下都可调用。
///
/// 每次状态检查与状态写入在同一次加锁内完成；需要 await 的步骤先切到
/// Connecting / Disconnecting，并发的生命周期调用因此只有一个能通过检查。
pub struct EventConsumer {
    subscriber: Arc<dyn MessageSubscriber>,
    processor: Arc<dyn EventProcessor>,
    topic: String,
    state: Mutex<ConsumerState>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventConsumer {
    pub fn new(
        subscriber: Arc<dyn MessageSubscriber>,
        processor: Arc<dyn EventProcessor>,
        topic: impl Into<String>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            subscriber,
            processor,
            topic: topic.into(),
            state: Mutex::new(ConsumerState::Disconnected),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock()
    }

    /// 建立会话并从最早 offset 订阅 topic
    pub async fn connect(&self) -> Result<(), ServiceError> {
        self.transition(
            "connect",
            ConsumerState::Disconnected,
            ConsumerState::Connecting,
        )?;

        if let Err(e) = self.open_session().await {
            *self.state.lock() = ConsumerState::Disconnected;
            return Err(e);
        }

        *self.state.lock() = ConsumerState::Connected;
        info!(topic = %self.topic, "事件消费者已连接并订阅");
        Ok(())
    }

    async fn open_session(&self) -> Result<(), ServiceError> {
        self.subscriber.connect().await?;
        self.subscriber.subscribe(&self.topic).await?;
        Ok(())
    }

    /// 在后台任务中启动消费循环
    pub fn start(&self) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        check_state("start", *state, ConsumerState::Connected)?;

        self.shutdown_tx.send_replace(false);
        let shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(consume_loop(
            self.subscriber.clone(),
            self.processor.clone(),
            shutdown,
        ));

        *self.task.lock() = Some(handle);
        *state = ConsumerState::Running;
        info!(topic = %self.topic, "事件消费循环已启动");
        Ok(())
    }

    /// 通知消费循环退出，等待其结束后释放会话
    ///
    /// 已断开或正在断开时直接返回；连接尚未完成时返回 `InvalidState`。
    pub async fn disconnect(&self) -> Result<(), ServiceError> {
        {
            let mut state = self.state.lock();
            match *state {
                ConsumerState::Disconnected | ConsumerState::Disconnecting => return Ok(()),
                ConsumerState::Connecting => {
                    return Err(ServiceError::InvalidState {
                        operation: "disconnect",
                        state: state.to_string(),
                    });
                }
                ConsumerState::Connected | ConsumerState::Running => {
                    *state = ConsumerState::Disconnecting;
                }
            }
        }

        self.shutdown_tx.send_replace(true);

        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "消费循环任务异常退出");
        }

        let result = self.subscriber.disconnect().await;
        *self.state.lock() = ConsumerState::Disconnected;
        result?;

        info!(topic = %self.topic, "事件消费者已断开");
        Ok(())
    }

    /// 在一次加锁内完成状态检查与切换
    fn transition(
        &self,
        operation: &'static str,
        expected: ConsumerState,
        next: ConsumerState,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        check_state(operation, *state, expected)?;
        *state = next;
        Ok(())
    }
}

fn check_state(
    operation: &'static str,
    current: ConsumerState,
    expected: ConsumerState,
) -> Result<(), ServiceError> {
    if current != expected {
        return Err(ServiceError::InvalidState {
            operation,
            state: current.to_string(),
        });
    }
    Ok(())
}

/// 消费循环：顺序处理消息，直到收到关闭信号或消息流结束
async fn consume_loop(
    subscriber: Arc<dyn MessageSubscriber>,
    processor: Arc<dyn EventProcessor>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            // 偏向关闭信号，保证收到关闭时能尽快退出
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("收到关闭信号，消费循环退出");
                    break;
                }
            }

            next = subscriber.receive() => {
                let Some(received) = next else {
                    warn!("消息流已结束，消费循环退出");
                    break;
                };

                match received {
                    Ok(msg) => {
                        let outcome = match handle_message(processor.as_ref(), &msg).await {
                            Ok(outcome) => outcome.as_str(),
                            Err(e) => {
                                log_rejected(&msg, &e);
                                e.kind()
                            }
                        };
                        metrics::record_consumed(outcome);
                    }
                    Err(e) => {
                        error!(error = %e, "接收消息出错");
                    }
                }
            }
        }
    }
}

/// 处理单条消息：解码、结构校验、交给处理器
///
/// 独立成函数，测试中可以直接驱动而无需启动消费循环。
pub async fn handle_message(
    processor: &dyn EventProcessor,
    msg: &ConsumerMessage,
) -> Result<ProcessOutcome, ServiceError> {
    debug!(
        topic = %msg.topic,
        partition = msg.partition,
        offset = msg.offset,
        "收到消息"
    );

    let event = decode_event(&msg.payload)?;
    processor.process(&event).await
}

fn log_rejected(msg: &ConsumerMessage, err: &ServiceError) {
    match err {
        ServiceError::Decode(_) | ServiceError::SchemaViolation(_) => {
            warn!(
                error = %err,
                key = msg.key.as_deref().unwrap_or("-"),
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "丢弃非法消息"
            );
        }
        _ => {
            error!(
                error = %err,
                key = msg.key.as_deref().unwrap_or("-"),
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "事件处理失败，消息已丢弃"
            );
        }
    }
}
