//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Broker kind compiled out of this binary
    #[error("Broker kind '{kind}' is not supported by this build (enable the '{feature}' feature)")]
    BrokerUnsupported { kind: String, feature: String },

    /// Demo messages requested for a real broker
    #[error("--demo-messages requires broker.kind = \"memory\"")]
    DemoRequiresMemory,

    /// Graceful shutdown error
    #[error("Error during shutdown: {message}")]
    Shutdown { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn broker_unsupported(kind: impl Into<String>, feature: impl Into<String>) -> Self {
        Self::BrokerUnsupported {
            kind: kind.into(),
            feature: feature.into(),
        }
    }

    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::Shutdown {
            message: message.into(),
        }
    }
}
