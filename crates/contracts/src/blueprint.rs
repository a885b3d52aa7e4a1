//! ServiceBlueprint - Config Loader output
//!
//! Describes the whole service: identity, broker connection, dispatcher tuning
//! and the named consumption endpoints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

/// Handler bound to endpoints that do not name one
pub const DEFAULT_HANDLER: &str = "main_consume";

/// Consumers per endpoint when the file does not say
pub const DEFAULT_ENDPOINT_WORKERS: i32 = 4;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

impl ConfigVersion {
    /// Name as written in the config file
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "V1",
        }
    }
}

/// Full service blueprint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServiceBlueprint {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Service identity
    #[serde(default)]
    #[validate(nested)]
    pub service: ServiceConfig,

    /// Broker connection
    #[serde(default)]
    #[validate(nested)]
    pub broker: BrokerConfig,

    /// Dispatcher tuning
    #[serde(default)]
    #[validate(nested)]
    pub dispatcher: DispatcherSettings,

    /// Endpoint name -> endpoint definition
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointSpec>,
}

impl ServiceBlueprint {
    /// Prefix for generated consumer tags
    pub fn consumer_tag_prefix(&self) -> &str {
        self.broker
            .consumer_tag_prefix
            .as_deref()
            .unwrap_or(&self.service.name)
    }

    /// Sum of configured workers, counting non-positive values as zero
    pub fn configured_workers(&self) -> usize {
        self.endpoints
            .values()
            .map(|e| e.workers.max(0) as usize)
            .sum()
    }
}

/// Service identity
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServiceConfig {
    /// Service name, used in logs and consumer tags
    #[serde(default = "default_service_name")]
    #[validate(length(min = 1, message = "service name cannot be empty"))]
    pub name: String,

    /// Environment name (dev / staging / prod)
    #[serde(default = "default_env")]
    #[validate(length(min = 1, message = "environment name cannot be empty"))]
    pub env: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            env: default_env(),
        }
    }
}

fn default_service_name() -> String {
    "consumer-svc".to_string()
}

fn default_env() -> String {
    "dev".to_string()
}

/// Broker transport selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    /// AMQP 0-9-1 (RabbitMQ)
    #[default]
    Amqp,
    /// In-process queue (demo / tests)
    Memory,
}

impl BrokerKind {
    /// Name as written in the config file
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amqp => "amqp",
            Self::Memory => "memory",
        }
    }
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BrokerConfig {
    /// Transport
    #[serde(default)]
    pub kind: BrokerKind,

    /// Server URL
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Unacked deliveries allowed in flight per worker
    #[serde(default = "default_prefetch")]
    #[validate(range(min = 1, message = "prefetch must be >= 1"))]
    pub prefetch: u16,

    /// Consumer tag prefix (defaults to the service name)
    #[serde(default)]
    pub consumer_tag_prefix: Option<String>,

    /// Pause before a worker retries after a transport failure
    #[serde(default = "default_reconnect_delay_ms")]
    #[validate(range(min = 1, message = "reconnect_delay_ms must be >= 1"))]
    pub reconnect_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            url: default_broker_url(),
            prefetch: default_prefetch(),
            consumer_tag_prefix: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_broker_url() -> String {
    "amqp://localhost".to_string()
}

fn default_prefetch() -> u16 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

/// Acknowledgment policy of the reference handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Ack on receipt, before any processing. Avoids redelivery storms while
    /// the processing step is still being built.
    #[default]
    Immediate,
    /// Ack after processing succeeds; nack with requeue on transient failure,
    /// reject without requeue on terminal failure.
    OnSuccess,
}

impl AckPolicy {
    /// Name as written in the config file
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::OnSuccess => "on_success",
        }
    }
}

/// Dispatcher tuning
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatcherSettings {
    /// Capacity of the shared error channel
    #[serde(default = "default_error_buffer")]
    #[validate(range(min = 1, message = "error_buffer must be >= 1"))]
    pub error_buffer: usize,

    /// How long shutdown waits for workers to drain
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Reference handler ack policy
    #[serde(default)]
    pub ack_policy: AckPolicy,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            error_buffer: default_error_buffer(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            ack_policy: AckPolicy::default(),
        }
    }
}

fn default_error_buffer() -> usize {
    64
}

fn default_shutdown_timeout() -> u64 {
    10
}

/// One consumption endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EndpointSpec {
    /// Broker resource (queue name)
    #[validate(length(min = 1, message = "resource cannot be empty"))]
    pub resource: String,

    /// Concurrent consumers; values < 1 are coerced by the dispatcher
    #[serde(default = "default_workers")]
    pub workers: i32,

    /// Symbolic handler name, resolved against the handler table
    #[serde(default = "default_handler")]
    #[validate(length(min = 1, message = "handler cannot be empty"))]
    pub handler: String,
}

fn default_workers() -> i32 {
    DEFAULT_ENDPOINT_WORKERS
}

fn default_handler() -> String {
    DEFAULT_HANDLER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults() {
        let spec: EndpointSpec = serde_json::from_str(r#"{ "resource": "data-proc" }"#).unwrap();
        assert_eq!(spec.workers, DEFAULT_ENDPOINT_WORKERS);
        assert_eq!(spec.handler, DEFAULT_HANDLER);
    }

    #[test]
    fn test_labels_match_serde_names() {
        for kind in [BrokerKind::Amqp, BrokerKind::Memory] {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
        for policy in [AckPolicy::Immediate, AckPolicy::OnSuccess] {
            assert_eq!(serde_json::to_value(policy).unwrap(), policy.as_str());
        }
        assert_eq!(
            serde_json::to_value(ConfigVersion::V1).unwrap(),
            ConfigVersion::V1.as_str()
        );
    }

    #[test]
    fn test_broker_defaults() {
        let broker = BrokerConfig::default();
        assert_eq!(broker.kind.as_str(), "amqp");
        assert_eq!(broker.reconnect_delay_ms, 5000);
    }

    #[test]
    fn test_empty_resource_fails_validation() {
        let spec = EndpointSpec {
            resource: String::new(),
            workers: 1,
            handler: DEFAULT_HANDLER.into(),
        };
        let errors = spec.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("resource"));
    }

    #[test]
    fn test_consumer_tag_prefix_falls_back_to_service_name() {
        let mut bp: ServiceBlueprint = serde_json::from_str(r#"{ "endpoints": {} }"#).unwrap();
        assert_eq!(bp.consumer_tag_prefix(), "consumer-svc");

        bp.broker.consumer_tag_prefix = Some("proc".into());
        assert_eq!(bp.consumer_tag_prefix(), "proc");
    }

    #[test]
    fn test_configured_workers_ignores_negative() {
        let bp: ServiceBlueprint = serde_json::from_str(
            r#"{ "endpoints": {
                "a": { "resource": "qa", "workers": 3 },
                "b": { "resource": "qb", "workers": -2 }
            } }"#,
        )
        .unwrap();
        assert_eq!(bp.configured_workers(), 3);
    }
}
