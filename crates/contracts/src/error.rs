//! Layered error definitions
//!
//! Categorized by source: config / broker / settlement / handler

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Broker Errors =====
    /// Transport-level failure reported by a broker client
    #[error("broker error on '{resource}': {message}")]
    Broker { resource: String, message: String },

    // ===== Settlement Errors =====
    /// Ack / nack / reject could not be delivered to the broker
    #[error("failed to settle delivery {delivery_tag}: {message}")]
    Settle { delivery_tag: u64, message: String },

    /// Message was already acked, nacked or rejected
    #[error("delivery {delivery_tag} already settled")]
    AlreadySettled { delivery_tag: u64 },

    // ===== Handler Errors =====
    /// Handler returned an error
    #[error("handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },

    /// Handler panicked; the panic was contained at the invocation point
    #[error("handler '{handler}' panicked: {message}")]
    HandlerPanicked { handler: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create broker transport error
    pub fn broker(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Broker {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create settlement error
    pub fn settle(delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Settle {
            delivery_tag,
            message: message.into(),
        }
    }

    /// Create handler error
    pub fn handler(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.into(),
            message: message.into(),
        }
    }

    /// Create contained-panic error
    pub fn handler_panicked(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerPanicked {
            handler: handler.into(),
            message: message.into(),
        }
    }

    /// Whether a retry (redelivery) of the same message may succeed
    ///
    /// Broker and settlement failures are transient; handler failures and
    /// contained panics are treated as terminal for that message.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Broker { .. } | Self::Settle { .. } | Self::Io(_)
        )
    }
}
