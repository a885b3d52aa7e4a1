//! Consumer 指标模块
//!
//! Prometheus 计数器与仪表，按 endpoint 打标签。

use contracts::AckOutcome;
use metrics::{counter, gauge, histogram};

/// 记录 handler 成功处理一条消息
pub fn record_message_handled(endpoint: &str, duration_ms: f64) {
    counter!(
        "consumer_svc_messages_handled_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);

    histogram!(
        "consumer_svc_handler_duration_ms",
        "endpoint" => endpoint.to_string()
    )
    .record(duration_ms);
}

/// 记录 handler 返回错误
pub fn record_handler_failure(endpoint: &str) {
    counter!(
        "consumer_svc_handler_failures_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// 记录被拦截的 handler panic
pub fn record_handler_panic(endpoint: &str) {
    counter!(
        "consumer_svc_handler_panics_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// 记录 error watcher 收到的错误
///
/// `transport` 为 true 表示错误不关联具体消息。
pub fn record_consume_error(transport: bool) {
    let kind = if transport { "transport" } else { "message" };
    counter!("consumer_svc_consume_errors_total", "kind" => kind).increment(1);
}

/// 记录消息确认结果
pub fn record_settlement(handler: &str, outcome: AckOutcome, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "consumer_svc_settlements_total",
        "handler" => handler.to_string(),
        "outcome" => outcome.as_str(),
        "status" => status
    )
    .increment(1);
}

/// 设置 endpoint 当前运行的 worker 数
pub fn set_workers_running(endpoint: &str, workers: usize) {
    gauge!(
        "consumer_svc_workers_running",
        "endpoint" => endpoint.to_string()
    )
    .set(workers as f64);
}
