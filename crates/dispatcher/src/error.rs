//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
///
/// Every variant except `NoRuntime` is a construction failure: nothing has
/// been spawned when it is returned.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// No endpoints configured
    #[error("no endpoints configured")]
    NoEndpoints,

    /// Endpoint has no broker client
    #[error("endpoint '{endpoint}': broker client is missing")]
    MissingBroker { endpoint: String },

    /// Endpoint has an empty handler name
    #[error("endpoint '{endpoint}': handler name is empty")]
    EmptyHandlerName { endpoint: String },

    /// Handler name not present in the handler table
    #[error("endpoint '{endpoint}': handler '{handler}' is not registered")]
    UnknownHandler { endpoint: String, handler: String },

    /// start_consumers called outside a tokio runtime
    #[error("no async runtime available: {0}")]
    NoRuntime(String),
}

impl DispatcherError {
    /// Create an unknown handler error
    pub fn unknown_handler(endpoint: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::UnknownHandler {
            endpoint: endpoint.into(),
            handler: handler.into(),
        }
    }
}
