//! Handler registry - binds endpoints to resolved handlers
//!
//! Handlers are looked up by name in a caller-supplied [`HandlerTable`], so the
//! endpoint set can still be described from configuration data. Validation is
//! all-or-nothing: a single bad endpoint fails the whole registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use contracts::{AckPolicy, MessageHandler};
use tracing::warn;

use crate::error::DispatcherError;
use crate::handlers::{main_consume, MAIN_CONSUME};

/// Worker count substituted when an endpoint asks for fewer than one
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Name -> handler lookup table
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, MessageHandler>,
}

impl HandlerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table pre-populated with the reference `main_consume` handler
    pub fn builtin(policy: AckPolicy) -> Self {
        Self::new().register(MAIN_CONSUME, main_consume(policy))
    }

    /// Register a handler under `name`, replacing any previous binding
    pub fn register(mut self, name: impl Into<String>, handler: MessageHandler) -> Self {
        self.insert(name, handler);
        self
    }

    /// In-place variant of [`register`](Self::register)
    pub fn insert(&mut self, name: impl Into<String>, handler: MessageHandler) {
        self.handlers.insert(name.into(), handler);
    }

    /// Resolve a handler by name
    pub fn resolve(&self, name: &str) -> Option<MessageHandler> {
        self.handlers.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.names())
            .finish()
    }
}

/// Unvalidated endpoint description
pub struct EndpointOptions<B> {
    /// Broker client reading the endpoint's resource
    pub broker: Option<Arc<B>>,
    /// Requested worker count; values < 1 are coerced
    pub workers: i32,
    /// Handler name, resolved against the handler table
    pub handler: String,
}

impl<B> EndpointOptions<B> {
    /// Create endpoint options
    pub fn new(broker: Arc<B>, workers: i32, handler: impl Into<String>) -> Self {
        Self {
            broker: Some(broker),
            workers,
            handler: handler.into(),
        }
    }
}

/// Validated endpoint, immutable after construction
pub struct EndpointConfig<B> {
    name: String,
    workers: usize,
    handler_name: String,
    handler: MessageHandler,
    broker: Arc<B>,
}

impl<B> EndpointConfig<B> {
    /// Endpoint name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker count (always >= 1)
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Handler name as configured
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    /// Resolved handler
    pub fn handler(&self) -> &MessageHandler {
        &self.handler
    }

    /// Broker client
    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }
}

/// Endpoint name -> validated endpoint
pub struct HandlerRegistry<B> {
    endpoints: BTreeMap<String, EndpointConfig<B>>,
}

impl<B> HandlerRegistry<B> {
    /// Validate every endpoint against `table`
    ///
    /// Per endpoint, in order: broker present, handler name non-empty, worker
    /// count coerced, handler name resolved. Endpoints are checked in name
    /// order so the reported failure is deterministic.
    ///
    /// # Errors
    /// - `NoEndpoints` for an empty map
    /// - `MissingBroker`, `EmptyHandlerName`, `UnknownHandler` for the first bad endpoint
    pub fn validate(
        options: HashMap<String, EndpointOptions<B>>,
        table: &HandlerTable,
    ) -> Result<Self, DispatcherError> {
        if options.is_empty() {
            return Err(DispatcherError::NoEndpoints);
        }

        let sorted: BTreeMap<_, _> = options.into_iter().collect();
        let mut endpoints = BTreeMap::new();

        for (name, opts) in sorted {
            let broker = opts.broker.ok_or_else(|| DispatcherError::MissingBroker {
                endpoint: name.clone(),
            })?;

            if opts.handler.is_empty() {
                return Err(DispatcherError::EmptyHandlerName { endpoint: name });
            }

            let workers = coerce_workers(&name, opts.workers);

            let handler = table
                .resolve(&opts.handler)
                .ok_or_else(|| DispatcherError::unknown_handler(&name, &opts.handler))?;

            endpoints.insert(
                name.clone(),
                EndpointConfig {
                    name,
                    workers,
                    handler_name: opts.handler,
                    handler,
                    broker,
                },
            );
        }

        Ok(Self { endpoints })
    }

    /// Look up one endpoint
    pub fn get(&self, name: &str) -> Option<&EndpointConfig<B>> {
        self.endpoints.get(name)
    }

    /// Endpoints in name order
    pub fn iter(&self) -> impl Iterator<Item = &EndpointConfig<B>> {
        self.endpoints.values()
    }

    /// Number of endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Σ workers over all endpoints
    pub fn total_workers(&self) -> usize {
        self.endpoints.values().map(|e| e.workers).sum()
    }
}

fn coerce_workers(endpoint: &str, requested: i32) -> usize {
    if requested < 1 {
        warn!(
            endpoint = %endpoint,
            requested,
            default = DEFAULT_WORKER_COUNT,
            "worker count below 1, using default"
        );
        DEFAULT_WORKER_COUNT
    } else {
        requested as usize
    }
}
