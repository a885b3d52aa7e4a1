//! Service runner - builds brokers and the dispatcher, then drives them.
//!
//! The broker kind is chosen from configuration. Both kinds go through the
//! same generic `drive` path, so shutdown behaves identically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use broker::MemoryBroker;
use contracts::{BrokerClient, BrokerKind, EndpointSpec, ServiceBlueprint};
use dispatcher::{DispatcherBuilder, DispatcherConfig, EndpointOptions, HandlerTable};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

use super::RunStats;
use crate::error::CliError;

/// Service runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Validated blueprint, CLI overrides already applied
    pub blueprint: ServiceBlueprint,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Synthetic messages published per endpoint (memory broker only)
    pub demo_messages: usize,
}

/// Runs the consumers until the shutdown token fires or every worker returns
pub struct ServiceRunner {
    config: RunnerConfig,
}

impl ServiceRunner {
    /// Create a new runner with the given configuration
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Run to completion
    ///
    /// Returns once all workers have stopped, or once the shutdown timeout
    /// elapses after `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<RunStats> {
        let blueprint = &self.config.blueprint;

        if self.config.demo_messages > 0 && blueprint.broker.kind != BrokerKind::Memory {
            return Err(CliError::DemoRequiresMemory.into());
        }

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        match blueprint.broker.kind {
            BrokerKind::Memory => self.run_memory(shutdown).await,
            BrokerKind::Amqp => self.run_amqp(shutdown).await,
        }
    }

    /// Run against in-process queues
    ///
    /// Endpoints naming the same resource share one queue.
    async fn run_memory(&self, shutdown: CancellationToken) -> Result<RunStats> {
        let blueprint = &self.config.blueprint;
        info!("Running with in-memory broker");

        let mut queues: HashMap<String, Arc<MemoryBroker>> = HashMap::new();
        let endpoints = endpoint_options(blueprint, |_, spec| {
            queues
                .entry(spec.resource.clone())
                .or_insert_with(|| Arc::new(MemoryBroker::new(spec.resource.clone())))
                .clone()
        });

        if self.config.demo_messages > 0 {
            for (name, spec) in &blueprint.endpoints {
                let Some(queue) = queues.get(&spec.resource) else {
                    continue;
                };
                for i in 0..self.config.demo_messages {
                    let id = format!("demo-{name}-{i}");
                    let body = serde_json::json!({ "endpoint": name, "seq": i }).to_string();
                    queue.publish(Some(id.as_str()), body).with_context(|| {
                        format!("Failed to publish demo message to '{}'", spec.resource)
                    })?;
                }
            }
            // workers return once the demo backlog is drained
            for queue in queues.values() {
                queue.close();
            }
            info!(
                per_endpoint = self.config.demo_messages,
                queues = queues.len(),
                "Demo messages published"
            );
        }

        self.drive(endpoints, shutdown).await
    }

    #[cfg(feature = "amqp")]
    async fn run_amqp(&self, shutdown: CancellationToken) -> Result<RunStats> {
        use broker::{AmqpBroker, AmqpSession};

        let blueprint = &self.config.blueprint;
        let session = Arc::new(AmqpSession::new(blueprint.broker.url.clone()));
        let prefix = blueprint.consumer_tag_prefix().to_string();
        let prefetch = blueprint.broker.prefetch;
        let reconnect_delay = Duration::from_millis(blueprint.broker.reconnect_delay_ms);

        info!(
            url = %session.url(),
            prefetch,
            reconnect_delay_ms = blueprint.broker.reconnect_delay_ms,
            "Running with AMQP broker"
        );

        let endpoints = endpoint_options(blueprint, |name, spec| {
            Arc::new(
                AmqpBroker::new(
                    session.clone(),
                    spec.resource.clone(),
                    format!("{prefix}-{name}"),
                    prefetch,
                )
                .with_reconnect_delay(reconnect_delay),
            )
        });

        let stats = self.drive(endpoints, shutdown).await;
        session.close().await;
        stats
    }

    #[cfg(not(feature = "amqp"))]
    async fn run_amqp(&self, _shutdown: CancellationToken) -> Result<RunStats> {
        Err(CliError::broker_unsupported("amqp", "amqp").into())
    }

    /// Build the dispatcher, start it, and wait for it to stop
    async fn drive<B>(
        &self,
        endpoints: HashMap<String, EndpointOptions<B>>,
        shutdown: CancellationToken,
    ) -> Result<RunStats>
    where
        B: BrokerClient + Send + Sync + 'static,
    {
        let blueprint = &self.config.blueprint;
        let started = Instant::now();

        let mut builder = DispatcherBuilder::new(
            DispatcherConfig {
                error_buffer: blueprint.dispatcher.error_buffer,
            },
            HandlerTable::builtin(blueprint.dispatcher.ack_policy),
        )
        .span(info_span!(
            "dispatcher",
            service = %blueprint.service.name,
            env = %blueprint.service.env
        ));
        for (name, options) in endpoints {
            builder = builder.endpoint(name, options);
        }

        let dispatcher = builder.build().context("Failed to build dispatcher")?;
        let handle = dispatcher
            .start_consumers(shutdown.clone())
            .context("Failed to start consumers")?;

        let workers = dispatcher.total_workers();
        let metrics = handle.metrics().clone();
        info!(
            endpoints = blueprint.endpoints.len(),
            workers,
            "Consumers running"
        );

        let drain_timeout = Duration::from_secs(blueprint.dispatcher.shutdown_timeout_secs);
        let join = handle.join();
        tokio::pin!(join);

        let (dispatch, drained) = tokio::select! {
            snapshot = &mut join => (snapshot, true),
            _ = shutdown.cancelled() => {
                info!(timeout_secs = drain_timeout.as_secs(), "Shutdown requested, draining workers");
                match tokio::time::timeout(drain_timeout, &mut join).await {
                    Ok(snapshot) => (snapshot, true),
                    Err(_) => {
                        warn!(
                            timeout_secs = drain_timeout.as_secs(),
                            "Workers did not stop before the shutdown timeout"
                        );
                        (metrics.snapshot(), false)
                    }
                }
            }
        };

        Ok(RunStats {
            endpoints: blueprint.endpoints.len(),
            workers,
            duration: started.elapsed(),
            dispatch,
            drained,
        })
    }
}

/// Endpoint options for every configured endpoint, with brokers from `make_broker`
fn endpoint_options<B>(
    blueprint: &ServiceBlueprint,
    mut make_broker: impl FnMut(&str, &EndpointSpec) -> Arc<B>,
) -> HashMap<String, EndpointOptions<B>> {
    blueprint
        .endpoints
        .iter()
        .map(|(name, spec)| {
            let broker = make_broker(name, spec);
            (
                name.clone(),
                EndpointOptions::new(broker, spec.workers, spec.handler.clone()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};

    fn memory_blueprint(workers: i32) -> ServiceBlueprint {
        let toml = format!(
            r#"
[broker]
kind = "memory"

[dispatcher]
shutdown_timeout_secs = 2

[endpoints.orders]
resource = "orders-q"
workers = {workers}

[endpoints.audit]
resource = "orders-q"
workers = 1
"#
        );
        ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap()
    }

    #[tokio::test]
    async fn test_demo_run_drains_and_stops() {
        let runner = ServiceRunner::new(RunnerConfig {
            blueprint: memory_blueprint(2),
            metrics_port: None,
            demo_messages: 5,
        });

        let stats = runner.run(CancellationToken::new()).await.unwrap();

        assert!(stats.drained);
        assert_eq!(stats.endpoints, 2);
        assert_eq!(stats.workers, 3);
        assert_eq!(stats.dispatch.handled, 10);
        assert_eq!(stats.dispatch.consume_errors, 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_consumers() {
        let runner = ServiceRunner::new(RunnerConfig {
            blueprint: memory_blueprint(0),
            metrics_port: None,
            demo_messages: 0,
        });
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let stats = runner.run(shutdown).await.unwrap();

        assert!(stats.drained);
        assert_eq!(stats.workers, dispatcher::DEFAULT_WORKER_COUNT + 1);
        assert_eq!(stats.dispatch.handled, 0);
    }

    #[tokio::test]
    async fn test_demo_requires_memory_broker() {
        let mut blueprint = memory_blueprint(1);
        blueprint.broker.kind = BrokerKind::Amqp;
        let runner = ServiceRunner::new(RunnerConfig {
            blueprint,
            metrics_port: None,
            demo_messages: 1,
        });

        let err = runner.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("memory"), "got: {err}");
    }

    #[cfg(feature = "amqp")]
    #[tokio::test]
    async fn test_unreachable_amqp_runs_until_shutdown() {
        let blueprint = ConfigLoader::load_from_str(
            r#"
[broker]
kind = "amqp"
url = "amqp://127.0.0.1:1"
reconnect_delay_ms = 20

[dispatcher]
shutdown_timeout_secs = 2

[endpoints.orders]
resource = "orders-q"
workers = 2
"#,
            ConfigFormat::Toml,
        )
        .unwrap();
        let runner = ServiceRunner::new(RunnerConfig {
            blueprint,
            metrics_port: None,
            demo_messages: 0,
        });
        let shutdown = CancellationToken::new();

        let run = runner.run(shutdown.clone());
        tokio::pin!(run);
        tokio::select! {
            res = &mut run => panic!("run finished before shutdown: {:?}", res.map(|s| s.dispatch)),
            _ = tokio::time::sleep(Duration::from_millis(300)) => {}
        }

        shutdown.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();

        assert!(stats.drained);
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.dispatch.handled, 0);
        assert!(stats.dispatch.transport_errors >= 2);
        assert_eq!(stats.dispatch.transport_errors, stats.dispatch.consume_errors);
    }
}
