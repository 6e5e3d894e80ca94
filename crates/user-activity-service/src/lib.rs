//! 用户行为事件服务
//!
//! 通过 HTTP 受理登录、登出、商品浏览等用户行为事件并发布到 Kafka，
//! 再从同一 topic 消费回来，按 eventId 幂等地写入内存账本供查询。
//!
//! 数据流：请求校验 -> 生产者（线性退避重试）-> 总线 -> 消费者 -> 解码与结构校验
//! -> 处理器 -> 账本。

pub mod consumer;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod processor;
pub mod producer;
pub mod routes;
pub mod state;
pub mod validator;
