//! Dispatcher - validated endpoints and worker fan-out

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{BrokerClient, ConsumeError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument, Span};

use crate::error::DispatcherError;
use crate::handle::{ConsumerHandle, WorkerTask};
use crate::handlers::contain_panics;
use crate::metrics::DispatchMetrics;
use crate::registry::{EndpointConfig, EndpointOptions, HandlerRegistry, HandlerTable};
use crate::watcher::run_error_watcher;

/// Capacity of the shared error channel unless configured otherwise
pub const DEFAULT_ERROR_BUFFER: usize = 64;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Error channel capacity (minimum 1)
    pub error_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            error_buffer: DEFAULT_ERROR_BUFFER,
        }
    }
}

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder<B> {
    config: DispatcherConfig,
    handlers: HandlerTable,
    endpoints: HashMap<String, EndpointOptions<B>>,
    span: Option<Span>,
}

impl<B> DispatcherBuilder<B> {
    /// Create a new DispatcherBuilder
    pub fn new(config: DispatcherConfig, handlers: HandlerTable) -> Self {
        Self {
            config,
            handlers,
            endpoints: HashMap::new(),
            span: None,
        }
    }

    /// Add or replace an endpoint
    pub fn endpoint(mut self, name: impl Into<String>, options: EndpointOptions<B>) -> Self {
        self.endpoints.insert(name.into(), options);
        self
    }

    /// Parent span for every log record of this dispatcher
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validate every endpoint and build the dispatcher
    ///
    /// Nothing is spawned here, so a failure leaves no tasks behind.
    pub fn build(self) -> Result<Dispatcher<B>, DispatcherError> {
        let span = self.span.unwrap_or_else(|| info_span!("dispatcher"));
        let registry =
            span.in_scope(|| HandlerRegistry::validate(self.endpoints, &self.handlers))?;

        Ok(Dispatcher {
            registry,
            config: self.config,
            span,
        })
    }
}

/// Consumer dispatcher
///
/// Owns the validated endpoints. Broker clients are shared with the caller.
pub struct Dispatcher<B> {
    registry: HandlerRegistry<B>,
    config: DispatcherConfig,
    span: Span,
}

impl<B> Dispatcher<B> {
    /// Validated endpoints, in name order
    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointConfig<B>> {
        self.registry.iter()
    }

    /// Σ workers over all endpoints
    pub fn total_workers(&self) -> usize {
        self.registry.total_workers()
    }

    /// Dispatcher configuration
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}

impl<B> Dispatcher<B>
where
    B: BrokerClient + Send + Sync + 'static,
{
    /// Start the error watcher and every worker, then return
    ///
    /// Spawns `1 + Σ workers` tasks on the current tokio runtime. Workers stop
    /// when `shutdown` (or the returned handle) is cancelled. Broker
    /// connectivity is not checked here; connection failures surface through
    /// the error watcher.
    ///
    /// # Errors
    /// - `NoEndpoints` if the registry is empty
    /// - `NoRuntime` when called outside a tokio runtime
    pub fn start_consumers(
        &self,
        shutdown: CancellationToken,
    ) -> Result<ConsumerHandle, DispatcherError> {
        let _entered = self.span.enter();

        if self.registry.is_empty() {
            return Err(DispatcherError::NoEndpoints);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DispatcherError::NoRuntime(e.to_string()))?;

        let cancel = shutdown.child_token();
        let metrics = Arc::new(DispatchMetrics::new());
        let (errors_tx, errors_rx) =
            mpsc::channel::<ConsumeError>(self.config.error_buffer.max(1));

        let watcher_span = info_span!(
            parent: &self.span,
            "watcher",
            method = "run_consumer_error_watcher"
        );
        let watcher =
            runtime.spawn(run_error_watcher(errors_rx, metrics.clone()).instrument(watcher_span));

        let mut workers = Vec::with_capacity(self.registry.total_workers());
        for endpoint in self.registry.iter() {
            let name: Arc<str> = Arc::from(endpoint.name());
            let handler = contain_panics(
                name.clone(),
                Arc::from(endpoint.handler_name()),
                endpoint.handler().clone(),
                metrics.clone(),
            );

            for index in 0..endpoint.workers() {
                let broker = endpoint.broker().clone();
                let token = cancel.clone();
                let errors = errors_tx.clone();
                let handler = handler.clone();
                let span = info_span!(
                    parent: &self.span,
                    "worker",
                    endpoint = %name,
                    worker = index,
                    resource = %broker.resource()
                );

                let handle = runtime.spawn(
                    async move {
                        debug!("worker started");
                        broker.consume(token, errors, handler).await;
                        debug!("worker stopped");
                    }
                    .instrument(span),
                );

                workers.push(WorkerTask {
                    endpoint: endpoint.name().to_string(),
                    index,
                    handle,
                });
            }

            observability::set_workers_running(endpoint.name(), endpoint.workers());
        }
        // workers hold the remaining senders
        drop(errors_tx);

        info!(
            endpoints = self.registry.len(),
            workers = workers.len(),
            "consumers started"
        );

        Ok(ConsumerHandle::new(cancel, watcher, workers, metrics))
    }
}
