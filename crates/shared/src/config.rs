//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;
use crate::retry::BackoffPolicy;

/// Kafka 配置
///
/// 除连接参数外还携带生产者重试参数，生产者与消费者共享同一份配置。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub client_id: String,
    /// 逗号分隔的 broker 地址列表
    pub brokers: String,
    pub topic: String,
    pub consumer_group: String,
    pub auto_offset_reset: String,
    pub connection_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// 首次发送之外的最大重试次数
    pub producer_retries: u32,
    /// 线性退避基数，第 N 次重试前等待 N 倍该值
    pub producer_retry_backoff_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            client_id: "event-driven-user-activity-service".to_string(),
            brokers: "localhost:9092".to_string(),
            topic: "user-activity-events".to_string(),
            consumer_group: "user-activity-consumer-group".to_string(),
            auto_offset_reset: "earliest".to_string(),
            connection_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            producer_retries: 3,
            producer_retry_backoff_ms: 500,
        }
    }
}

impl KafkaConfig {
    /// 由重试参数构造生产者退避策略
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::linear(
            self.producer_retries,
            Duration::from_millis(self.producer_retry_backoff_ms),
        )
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. `.env` 文件（仅填充尚未设置的环境变量）
    /// 2. config/default.toml（默认配置）
    /// 3. config/{environment}.toml（环境特定配置）
    /// 4. config/{service_name}.toml（服务特定配置）
    /// 5. 环境变量（ACTIVITY_ 前缀，层级用双下划线，如 ACTIVITY_KAFKA__TOPIC -> kafka.topic）
    /// 6. PORT 环境变量覆盖监听端口
    pub fn load(service_name: &str) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let env = std::env::var("ACTIVITY_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{env}.toml"))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{service_name}.toml")))
                    .required(false),
            )
            // kafka 字段名本身含下划线，层级分隔符只能用双下划线
            .add_source(
                Environment::with_prefix("ACTIVITY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;

        if let Some(port) = Self::port_from_env() {
            config.server.port = port;
        }

        Ok(config)
    }

    fn port_from_env() -> Option<u16> {
        std::env::var("PORT").ok().and_then(|v| v.parse().ok())
    }

    /// 获取服务地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
