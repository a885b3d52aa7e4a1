//! Message - Broker Client output, handler input
//!
//! An opaque payload plus the identifiers needed for settlement and diagnostics.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Sentinel used wherever a message identifier or consumer tag is not known
pub const UNKNOWN: &str = "unknown";

/// How a delivery is settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckOutcome {
    /// Processed; remove from the queue
    Ack,
    /// Negative ack, optionally requeued for redelivery
    Nack { requeue: bool },
    /// Refuse the delivery, optionally requeued
    Reject { requeue: bool },
}

impl AckOutcome {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nack { requeue: true } => "nack_requeue",
            Self::Nack { requeue: false } => "nack",
            Self::Reject { requeue: true } => "reject_requeue",
            Self::Reject { requeue: false } => "reject",
        }
    }
}

/// Settlement channel back to the broker
///
/// Implemented by each broker client. Object safe so a [`Message`] can carry it.
pub trait Acknowledger: Send + Sync {
    /// Settle the delivery identified by `delivery_tag`
    fn settle(&self, delivery_tag: u64, outcome: AckOutcome)
        -> BoxFuture<'_, Result<(), ContractError>>;
}

/// Lightweight reference to a delivered message
///
/// Survives the handler invocation, so it can travel inside a `ConsumeError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Producer-assigned message id (may be absent)
    pub message_id: Option<String>,

    /// Tag of the consumer that received the delivery
    pub consumer_tag: String,

    /// Broker-assigned delivery tag (per channel)
    pub delivery_tag: u64,

    /// Whether the broker flagged this as a redelivery
    pub redelivered: bool,
}

impl MessageMeta {
    /// Message id, or the `"unknown"` sentinel
    pub fn message_id_or_unknown(&self) -> &str {
        self.message_id.as_deref().unwrap_or(UNKNOWN)
    }
}

/// Inbound message
///
/// Cloning is cheap (shared body and acknowledger); all clones share a single
/// settlement, so only the first ack / nack / reject reaches the broker.
#[derive(Clone)]
pub struct Message {
    meta: MessageMeta,
    body: Bytes,
    acker: Arc<dyn Acknowledger>,
    settled: Arc<AtomicBool>,
}

impl Message {
    /// Create a message from a broker delivery
    pub fn new(meta: MessageMeta, body: Bytes, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            meta,
            body,
            acker,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delivery metadata
    pub fn meta(&self) -> &MessageMeta {
        &self.meta
    }

    /// Producer-assigned message id
    pub fn message_id(&self) -> Option<&str> {
        self.meta.message_id.as_deref()
    }

    /// Consumer tag
    pub fn consumer_tag(&self) -> &str {
        &self.meta.consumer_tag
    }

    /// Delivery tag
    pub fn delivery_tag(&self) -> u64 {
        self.meta.delivery_tag
    }

    /// Opaque payload
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether this message has already been settled
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Acknowledge the message
    pub async fn ack(&self) -> Result<(), ContractError> {
        self.settle(AckOutcome::Ack).await
    }

    /// Negative-acknowledge the message
    pub async fn nack(&self, requeue: bool) -> Result<(), ContractError> {
        self.settle(AckOutcome::Nack { requeue }).await
    }

    /// Reject the message
    pub async fn reject(&self, requeue: bool) -> Result<(), ContractError> {
        self.settle(AckOutcome::Reject { requeue }).await
    }

    /// Settle the message with the given outcome
    ///
    /// # Errors
    /// - `AlreadySettled` if any clone already settled this delivery
    /// - `Settle` if the broker refused the settlement; the message stays
    ///   unsettled and the call may be retried
    pub async fn settle(&self, outcome: AckOutcome) -> Result<(), ContractError> {
        if self.settled.swap(true, Ordering::AcqRel) {
            return Err(ContractError::AlreadySettled {
                delivery_tag: self.meta.delivery_tag,
            });
        }
        let result = self.acker.settle(self.meta.delivery_tag, outcome).await;
        if result.is_err() {
            self.settled.store(false, Ordering::Release);
        }
        result
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("meta", &self.meta)
            .field("body_len", &self.body.len())
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAcker {
        settled: Mutex<Vec<(u64, AckOutcome)>>,
        failures_left: Mutex<u32>,
    }

    impl Acknowledger for RecordingAcker {
        fn settle(
            &self,
            delivery_tag: u64,
            outcome: AckOutcome,
        ) -> BoxFuture<'_, Result<(), ContractError>> {
            let mut failures_left = self.failures_left.lock().unwrap();
            let result = if *failures_left > 0 {
                *failures_left -= 1;
                Err(ContractError::settle(delivery_tag, "channel busy"))
            } else {
                self.settled.lock().unwrap().push((delivery_tag, outcome));
                Ok(())
            };
            Box::pin(async move { result })
        }
    }

    fn message(acker: Arc<RecordingAcker>, message_id: Option<&str>) -> Message {
        Message::new(
            MessageMeta {
                message_id: message_id.map(str::to_string),
                consumer_tag: "ctag-1".into(),
                delivery_tag: 42,
                redelivered: false,
            },
            Bytes::from_static(b"payload"),
            acker,
        )
    }

    #[tokio::test]
    async fn test_ack_reaches_acknowledger() {
        let acker = Arc::new(RecordingAcker::default());
        let msg = message(acker.clone(), Some("m-1"));

        msg.ack().await.unwrap();

        assert!(msg.is_settled());
        assert_eq!(*acker.settled.lock().unwrap(), vec![(42, AckOutcome::Ack)]);
    }

    #[tokio::test]
    async fn test_clones_share_settlement() {
        let acker = Arc::new(RecordingAcker::default());
        let msg = message(acker.clone(), Some("m-1"));
        let clone = msg.clone();

        msg.nack(true).await.unwrap();
        let err = clone.ack().await.unwrap_err();

        assert!(matches!(err, ContractError::AlreadySettled { delivery_tag: 42 }));
        assert_eq!(acker.settled.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_settle_can_be_retried() {
        let acker = Arc::new(RecordingAcker {
            failures_left: Mutex::new(1),
            ..Default::default()
        });
        let msg = message(acker.clone(), Some("m-1"));

        let err = msg.ack().await.unwrap_err();
        assert!(matches!(err, ContractError::Settle { delivery_tag: 42, .. }));
        assert!(!msg.is_settled());

        msg.ack().await.unwrap();
        assert!(msg.is_settled());
        assert_eq!(*acker.settled.lock().unwrap(), vec![(42, AckOutcome::Ack)]);
    }

    #[test]
    fn test_missing_message_id_uses_sentinel() {
        let msg = message(Arc::new(RecordingAcker::default()), None);
        assert_eq!(msg.meta().message_id_or_unknown(), UNKNOWN);
        assert_eq!(msg.consumer_tag(), "ctag-1");
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(AckOutcome::Ack.as_str(), "ack");
        assert_eq!(AckOutcome::Nack { requeue: true }.as_str(), "nack_requeue");
        assert_eq!(AckOutcome::Reject { requeue: false }.as_str(), "reject");
    }
}
