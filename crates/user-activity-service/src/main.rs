//! 用户行为事件服务
//!
//! 启动 HTTP 接口、Kafka 生产者与消费者；收到 SIGTERM/Ctrl+C 后
//! 依次停止 HTTP、消费者、生产者。

use std::sync::Arc;

use activity_shared::config::AppConfig;
use activity_shared::kafka::{KafkaConsumer, KafkaProducer};
use activity_shared::observability;
use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use user_activity_service::consumer::EventConsumer;
use user_activity_service::ledger::Ledger;
use user_activity_service::processor::LedgerEventProcessor;
use user_activity_service::producer::EventProducer;
use user_activity_service::routes::build_router;
use user_activity_service::state::AppState;

const SERVICE_NAME: &str = "user-activity-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME).context("加载配置失败")?;

    let _observability = observability::init(&config.observability, SERVICE_NAME).await?;

    info!(
        environment = %config.environment,
        brokers = %config.kafka.brokers,
        topic = %config.kafka.topic,
        "Starting {}...",
        SERVICE_NAME
    );

    let ledger = Arc::new(Ledger::new());

    let producer = Arc::new(EventProducer::new(
        Arc::new(KafkaProducer::new(&config.kafka)?),
        config.kafka.topic.clone(),
        config.kafka.backoff_policy(),
    ));
    let consumer = EventConsumer::new(
        Arc::new(KafkaConsumer::new(&config.kafka)?),
        Arc::new(LedgerEventProcessor::new(ledger.clone())),
        config.kafka.topic.clone(),
    );

    producer.connect().await.context("连接 Kafka 生产者失败")?;
    consumer.connect().await.context("连接 Kafka 消费者失败")?;
    consumer.start()?;

    let app = build_router(AppState::new(producer.clone(), ledger));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Service listening on {}", config.server_addr());

    // 先停止接收新请求并等待已有请求完成，再释放 Kafka 会话
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = consumer.disconnect().await {
        error!(error = %e, "断开消费者失败");
    }
    if let Err(e) = producer.disconnect().await {
        error!(error = %e, "断开生产者失败");
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
