//! # Dispatcher
//!
//! 消费分发模块。
//!
//! 负责：
//! - 校验 endpoint 与 handler 绑定 (全部成功或全部失败)
//! - 每个 endpoint 启动 N 个 worker，各自运行 broker 的 consume 循环
//! - 拦截 handler panic，worker 继续消费
//! - 单个 error watcher 汇总所有 worker 的错误

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod watcher;

pub use contracts::{BrokerClient, ConsumeError, Message, MessageHandler};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig, DEFAULT_ERROR_BUFFER};
pub use error::DispatcherError;
pub use handle::ConsumerHandle;
pub use handlers::{main_consume, MAIN_CONSUME};
pub use metrics::{DispatchMetrics, DispatchSnapshot};
pub use registry::{
    EndpointConfig, EndpointOptions, HandlerRegistry, HandlerTable, DEFAULT_WORKER_COUNT,
};
pub use watcher::FailureRecord;
