//! In-memory broker
//!
//! Competing-consumer queue backed by `async-channel`. Used by the demo mode and
//! tests; supports fault injection and records every settlement.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_channel::{unbounded, Receiver, Sender};
use bytes::Bytes;
use contracts::{
    deliver, report, AckOutcome, Acknowledger, BrokerClient, ConsumeError, ContractError,
    ErrorSender, Message, MessageHandler, MessageMeta,
};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{BrokerError, Result};

/// Queue entry
enum Envelope {
    Deliver {
        message_id: Option<String>,
        body: Bytes,
        redelivered: bool,
    },
    /// Simulated transport failure, reported without a message reference
    Fault(String),
}

/// Settlement log shared by every message of one broker
#[derive(Default)]
struct Ledger {
    settlements: Mutex<Vec<(u64, AckOutcome)>>,
    fail_settlements: AtomicBool,
}

/// Per-delivery acknowledger; requeues on nack / reject with requeue
struct MemoryAcker {
    ledger: Arc<Ledger>,
    requeue: Sender<Envelope>,
    message_id: Option<String>,
    body: Bytes,
}

impl Acknowledger for MemoryAcker {
    fn settle(
        &self,
        delivery_tag: u64,
        outcome: AckOutcome,
    ) -> BoxFuture<'_, std::result::Result<(), ContractError>> {
        Box::pin(async move {
            if self.ledger.fail_settlements.load(Ordering::Acquire) {
                return Err(ContractError::settle(delivery_tag, "injected settle failure"));
            }

            let requeue = matches!(
                outcome,
                AckOutcome::Nack { requeue: true } | AckOutcome::Reject { requeue: true }
            );
            if requeue {
                let redelivery = Envelope::Deliver {
                    message_id: self.message_id.clone(),
                    body: self.body.clone(),
                    redelivered: true,
                };
                if self.requeue.send(redelivery).await.is_err() {
                    warn!(
                        delivery_tag,
                        outcome = outcome.as_str(),
                        "queue closed, requeued delivery dropped"
                    );
                    return Err(ContractError::settle(
                        delivery_tag,
                        "queue closed, cannot requeue",
                    ));
                }
            }

            self.ledger
                .settlements
                .lock()
                .unwrap()
                .push((delivery_tag, outcome));
            Ok(())
        })
    }
}

/// In-memory broker client
///
/// All workers bound to one `MemoryBroker` compete for the same queue, so each
/// published message is delivered to exactly one consumer.
pub struct MemoryBroker {
    resource: String,
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    ledger: Arc<Ledger>,
    next_delivery_tag: AtomicU64,
    next_consumer: AtomicU64,
    consume_calls: AtomicUsize,
    active_consumers: AtomicUsize,
}

impl MemoryBroker {
    /// Create an empty queue named `resource`
    pub fn new(resource: impl Into<String>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            resource: resource.into(),
            tx,
            rx,
            ledger: Arc::new(Ledger::default()),
            next_delivery_tag: AtomicU64::new(1),
            next_consumer: AtomicU64::new(1),
            consume_calls: AtomicUsize::new(0),
            active_consumers: AtomicUsize::new(0),
        }
    }

    /// Enqueue a message
    pub fn publish(&self, message_id: Option<&str>, body: impl Into<Bytes>) -> Result<()> {
        self.push(Envelope::Deliver {
            message_id: message_id.map(str::to_string),
            body: body.into(),
            redelivered: false,
        })
    }

    /// Enqueue a simulated transport failure
    pub fn publish_fault(&self, reason: impl Into<String>) -> Result<()> {
        self.push(Envelope::Fault(reason.into()))
    }

    /// Close the queue; consumers return once it is drained
    pub fn close(&self) {
        self.tx.close();
    }

    /// Make every following settlement fail
    pub fn fail_settlements(&self, fail: bool) {
        self.ledger.fail_settlements.store(fail, Ordering::Release);
    }

    /// Settlements recorded so far, in order
    pub fn settlements(&self) -> Vec<(u64, AckOutcome)> {
        self.ledger.settlements.lock().unwrap().clone()
    }

    /// Number of `consume` invocations since creation
    pub fn consume_calls(&self) -> usize {
        self.consume_calls.load(Ordering::Acquire)
    }

    /// Consume loops currently running
    pub fn active_consumers(&self) -> usize {
        self.active_consumers.load(Ordering::Acquire)
    }

    /// Poll until `count` settlements are recorded or `timeout` elapses
    pub async fn wait_for_settlements(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.ledger.settlements.lock().unwrap().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.ledger.settlements.lock().unwrap().len() >= count
    }

    fn push(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .try_send(envelope)
            .map_err(|_| BrokerError::QueueClosed {
                resource: self.resource.clone(),
            })
    }

    fn next_consumer_tag(&self) -> String {
        let n = self.next_consumer.fetch_add(1, Ordering::Relaxed);
        format!("ctag-{n}")
    }

    fn to_message(
        &self,
        consumer_tag: &str,
        message_id: Option<String>,
        body: Bytes,
        redelivered: bool,
    ) -> Message {
        let delivery_tag = self.next_delivery_tag.fetch_add(1, Ordering::Relaxed);
        let acker = MemoryAcker {
            ledger: self.ledger.clone(),
            requeue: self.tx.clone(),
            message_id: message_id.clone(),
            body: body.clone(),
        };
        Message::new(
            MessageMeta {
                message_id,
                consumer_tag: consumer_tag.to_string(),
                delivery_tag,
                redelivered,
            },
            body,
            Arc::new(acker),
        )
    }
}

/// Decrements the active consumer count when the consume loop exits
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl BrokerClient for MemoryBroker {
    fn resource(&self) -> &str {
        &self.resource
    }

    #[instrument(name = "memory_consume", skip_all, fields(resource = %self.resource))]
    async fn consume(
        &self,
        shutdown: CancellationToken,
        errors: ErrorSender,
        handler: MessageHandler,
    ) {
        self.consume_calls.fetch_add(1, Ordering::AcqRel);
        let _active = ActiveGuard::enter(&self.active_consumers);
        let consumer_tag = self.next_consumer_tag();
        debug!(consumer_tag = %consumer_tag, "consumer started");

        loop {
            let envelope = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Ok(envelope) => envelope,
                    Err(_) => {
                        debug!(consumer_tag = %consumer_tag, "queue closed");
                        break;
                    }
                },
            };

            match envelope {
                Envelope::Deliver {
                    message_id,
                    body,
                    redelivered,
                } => {
                    let message = self.to_message(&consumer_tag, message_id, body, redelivered);
                    deliver(&handler, message, &errors).await;
                }
                Envelope::Fault(reason) => {
                    let error = ContractError::broker(&self.resource, reason);
                    report(&errors, ConsumeError::transport(error)).await;
                }
            }
        }

        debug!(consumer_tag = %consumer_tag, "consumer stopped");
    }
}
