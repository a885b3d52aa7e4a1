//! AMQP broker client (RabbitMQ)
//!
//! One [`AmqpSession`] owns the connection and is shared by every endpoint.
//! Each worker opens its own channel and consumer, so prefetch applies per
//! worker. No topology is declared: queues must already exist.
//!
//! Transport failures never end a worker: the failure is reported, then the
//! worker waits `reconnect_delay` and opens a fresh channel and consumer,
//! reconnecting the session if needed. Only shutdown stops the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use contracts::{
    deliver, report, AckOutcome, Acknowledger, BrokerClient, ConsumeError, ContractError,
    ErrorSender, Message, MessageHandler, MessageMeta,
};
use futures::future::BoxFuture;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    BasicRejectOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{BrokerError, Result};

/// Pause between a transport failure and the next consumer attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Shared AMQP connection
///
/// Connects lazily on first use and again whenever the previous connection
/// is no longer usable.
pub struct AmqpSession {
    url: String,
    connection: Mutex<Option<Connection>>,
}

impl AmqpSession {
    /// Create a session for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: Mutex::new(None),
        }
    }

    /// Broker URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open a new channel, (re)connecting first when needed
    pub async fn open_channel(&self) -> Result<Channel> {
        let mut guard = self.connection.lock().await;
        let connection = match guard.take() {
            Some(connection) if connection.status().connected() => connection,
            _ => self.connect().await?,
        };

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::ConnectionFailed {
                url: self.url.clone(),
                message: format!("create channel: {e}"),
            });
        *guard = Some(connection);
        channel
    }

    /// Close the connection if it was opened
    pub async fn close(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            if let Err(e) = connection.close(200, "shutdown").await {
                warn!(error = %e, "failed to close AMQP connection");
            }
        }
    }

    async fn connect(&self) -> Result<Connection> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::ConnectionFailed {
                url: self.url.clone(),
                message: e.to_string(),
            })?;
        info!(url = %self.url, "connected to AMQP broker");
        Ok(connection)
    }
}

/// Settles through the delivery's lapin acker
struct LapinAcker {
    acker: Acker,
}

impl Acknowledger for LapinAcker {
    fn settle(
        &self,
        delivery_tag: u64,
        outcome: AckOutcome,
    ) -> BoxFuture<'_, std::result::Result<(), ContractError>> {
        Box::pin(async move {
            let result = match outcome {
                AckOutcome::Ack => self.acker.ack(BasicAckOptions::default()).await.map(|_| ()),
                AckOutcome::Nack { requeue } => self
                    .acker
                    .nack(BasicNackOptions {
                        requeue,
                        ..Default::default()
                    })
                    .await
                    .map(|_| ()),
                AckOutcome::Reject { requeue } => self
                    .acker
                    .reject(BasicRejectOptions { requeue })
                    .await
                    .map(|_| ()),
            };
            result.map_err(|e| ContractError::settle(delivery_tag, e.to_string()))
        })
    }
}

/// Why one consumer stopped
enum ConsumerExit {
    Shutdown,
    TransportLost,
}

/// AMQP broker client for one queue
pub struct AmqpBroker {
    session: Arc<AmqpSession>,
    resource: String,
    tag_prefix: String,
    prefetch: u16,
    reconnect_delay: Duration,
    next_consumer: AtomicU64,
}

impl AmqpBroker {
    /// Create a client reading `resource` over `session`
    ///
    /// Consumer tags are `<tag_prefix>-<n>`, a new one per consumer attempt.
    pub fn new(
        session: Arc<AmqpSession>,
        resource: impl Into<String>,
        tag_prefix: impl Into<String>,
        prefetch: u16,
    ) -> Self {
        Self {
            session,
            resource: resource.into(),
            tag_prefix: tag_prefix.into(),
            prefetch,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            next_consumer: AtomicU64::new(1),
        }
    }

    /// Override the pause between a transport failure and the next attempt
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    fn next_consumer_tag(&self) -> String {
        let n = self.next_consumer.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.tag_prefix)
    }

    async fn open_consumer(&self, consumer_tag: &str) -> Result<(Channel, Consumer)> {
        let channel = self.session.open_channel().await?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::consumer_setup(&self.resource, format!("qos: {e}")))?;
        let consumer = channel
            .basic_consume(
                &self.resource,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::consumer_setup(&self.resource, e.to_string()))?;
        Ok((channel, consumer))
    }

    /// Deliver from `consumer` until shutdown or a stream failure
    async fn drain(
        &self,
        shutdown: &CancellationToken,
        errors: &ErrorSender,
        handler: &MessageHandler,
        consumer_tag: &str,
        mut consumer: Consumer,
    ) -> ConsumerExit {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return ConsumerExit::Shutdown,
                next = consumer.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let message = Self::to_message(consumer_tag, delivery);
                    deliver(handler, message, errors).await;
                }
                Some(Err(e)) => {
                    report(errors, self.transport_error(e.to_string())).await;
                    return ConsumerExit::TransportLost;
                }
                None => {
                    report(errors, self.transport_error("consumer stream ended")).await;
                    return ConsumerExit::TransportLost;
                }
            }
        }
    }

    async fn close_consumer(&self, channel: &Channel, consumer_tag: &str) {
        if let Err(e) = channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
        {
            debug!(consumer_tag = %consumer_tag, error = %e, "basic_cancel failed");
        }
        if let Err(e) = channel.close(200, "consumer stopped").await {
            debug!(consumer_tag = %consumer_tag, error = %e, "channel close failed");
        }
    }

    fn to_message(consumer_tag: &str, delivery: Delivery) -> Message {
        let Delivery {
            delivery_tag,
            redelivered,
            properties,
            data,
            acker,
            ..
        } = delivery;
        let message_id = properties
            .message_id()
            .as_ref()
            .map(|id| id.as_str().to_string());

        Message::new(
            MessageMeta {
                message_id,
                consumer_tag: consumer_tag.to_string(),
                delivery_tag,
                redelivered,
            },
            Bytes::from(data),
            Arc::new(LapinAcker { acker }),
        )
    }

    fn transport_error(&self, message: impl Into<String>) -> ConsumeError {
        ConsumeError::transport(ContractError::broker(&self.resource, message))
    }
}

impl BrokerClient for AmqpBroker {
    fn resource(&self) -> &str {
        &self.resource
    }

    #[instrument(name = "amqp_consume", skip_all, fields(resource = %self.resource))]
    async fn consume(
        &self,
        shutdown: CancellationToken,
        errors: ErrorSender,
        handler: MessageHandler,
    ) {
        loop {
            let consumer_tag = self.next_consumer_tag();
            let opened = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                opened = self.open_consumer(&consumer_tag) => opened,
            };

            match opened {
                Ok((channel, consumer)) => {
                    debug!(consumer_tag = %consumer_tag, prefetch = self.prefetch, "consumer started");
                    let exit = self
                        .drain(&shutdown, &errors, &handler, &consumer_tag, consumer)
                        .await;
                    self.close_consumer(&channel, &consumer_tag).await;
                    debug!(consumer_tag = %consumer_tag, "consumer stopped");
                    if let ConsumerExit::Shutdown = exit {
                        break;
                    }
                }
                Err(e) => {
                    let error = e.into_contract(&self.resource);
                    report(&errors, ConsumeError::transport(error)).await;
                }
            }

            warn!(
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "AMQP consumer lost, retrying"
            );
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_tags_are_unique_per_attempt() {
        let session = Arc::new(AmqpSession::new("amqp://localhost"));
        let broker = AmqpBroker::new(session, "data-proc", "svc-main", 10);
        assert_eq!(broker.next_consumer_tag(), "svc-main-1");
        assert_eq!(broker.next_consumer_tag(), "svc-main-2");
        assert_eq!(broker.resource(), "data-proc");
    }

    #[tokio::test]
    async fn test_unreachable_broker_keeps_retrying_until_shutdown() {
        let session = Arc::new(AmqpSession::new("amqp://127.0.0.1:1"));
        let broker = Arc::new(
            AmqpBroker::new(session, "data-proc", "svc", 1)
                .with_reconnect_delay(Duration::from_millis(20)),
        );
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let handler = contracts::handler_fn(|_msg: Message| async { Ok(()) });
        let shutdown = CancellationToken::new();

        let task = {
            let broker = broker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { broker.consume(shutdown, tx, handler).await })
        };

        for _ in 0..2 {
            let err = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(err.message.is_none());
            assert!(err.error.is_transient());
        }
        assert!(!task.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_before_start_returns() {
        let session = Arc::new(AmqpSession::new("amqp://127.0.0.1:1"));
        let broker = AmqpBroker::new(session, "data-proc", "svc", 1);
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let handler = contracts::handler_fn(|_msg: Message| async { Ok(()) });
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        broker.consume(shutdown, tx, handler).await;
        assert!(rx.recv().await.is_none());
    }
}
