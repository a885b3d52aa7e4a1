//! Broker error types

use contracts::ContractError;
use thiserror::Error;

/// Broker specific error
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Connection to the broker failed
    #[error("failed to connect to broker at '{url}': {message}")]
    ConnectionFailed { url: String, message: String },

    /// Channel or consumer setup failed
    #[error("failed to open consumer on '{resource}': {message}")]
    ConsumerSetup { resource: String, message: String },

    /// Publish into a closed in-memory queue
    #[error("queue '{resource}' is closed")]
    QueueClosed { resource: String },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl BrokerError {
    /// Create consumer setup error
    pub fn consumer_setup(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConsumerSetup {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Convert into the shared error type, attributing it to `resource`
    pub fn into_contract(self, resource: &str) -> ContractError {
        match self {
            Self::Contract(err) => err,
            other => ContractError::broker(resource, other.to_string()),
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_contract_is_transient() {
        let err = BrokerError::consumer_setup("data-proc", "channel closed")
            .into_contract("data-proc");
        assert!(err.is_transient());
        assert!(err.to_string().contains("data-proc"));
    }

    #[test]
    fn test_contract_passthrough() {
        let err = BrokerError::from(ContractError::Other("x".into())).into_contract("q");
        assert!(matches!(err, ContractError::Other(_)));
    }
}
