//! Error watcher - single drain for the shared error channel

use std::sync::Arc;

use contracts::{ConsumeError, ErrorReceiver, UNKNOWN};
use tracing::{debug, error, instrument};

use crate::metrics::DispatchMetrics;

/// Structured view of one [`ConsumeError`], as logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub error: String,
    pub message_id: String,
    pub consumer_tag: String,
    /// True when the error carries no message reference
    pub transport: bool,
}

impl From<&ConsumeError> for FailureRecord {
    fn from(err: &ConsumeError) -> Self {
        match &err.message {
            Some(meta) => Self {
                error: err.error.to_string(),
                message_id: meta.message_id_or_unknown().to_string(),
                consumer_tag: if meta.consumer_tag.is_empty() {
                    UNKNOWN.to_string()
                } else {
                    meta.consumer_tag.clone()
                },
                transport: false,
            },
            None => Self {
                error: err.error.to_string(),
                message_id: UNKNOWN.to_string(),
                consumer_tag: UNKNOWN.to_string(),
                transport: true,
            },
        }
    }
}

/// Drain `rx` until every sender is dropped
///
/// Logs one record per error and never stops early: a failing worker must not
/// silence the others.
#[instrument(name = "error_watcher", skip_all)]
pub(crate) async fn run_error_watcher(mut rx: ErrorReceiver, metrics: Arc<DispatchMetrics>) {
    debug!("error watcher started");

    while let Some(err) = rx.recv().await {
        let record = FailureRecord::from(&err);
        metrics.inc_consume_errors(record.transport);
        observability::record_consume_error(record.transport);

        error!(
            method = "run_consumer_error_watcher",
            error = %record.error,
            message_id = %record.message_id,
            consumer_tag = %record.consumer_tag,
            "Received error from consumer"
        );
    }

    debug!(
        drained = metrics.consume_errors(),
        "error channel closed, watcher stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ContractError, MessageMeta};
    use tokio::sync::mpsc;

    fn meta(message_id: Option<&str>) -> MessageMeta {
        MessageMeta {
            message_id: message_id.map(str::to_string),
            consumer_tag: "svc-main-3".into(),
            delivery_tag: 5,
            redelivered: false,
        }
    }

    #[test]
    fn test_missing_message_uses_unknown_sentinel() {
        let err = ConsumeError::transport(ContractError::broker("q", "connection reset"));
        let record = FailureRecord::from(&err);

        assert_eq!(record.message_id, "unknown");
        assert_eq!(record.consumer_tag, "unknown");
        assert!(record.transport);
        assert!(record.error.contains("connection reset"));
    }

    #[test]
    fn test_message_reference_is_extracted() {
        let err = ConsumeError::new(
            ContractError::handler("main_consume", "bad"),
            Some(meta(Some("m-42"))),
        );
        let record = FailureRecord::from(&err);

        assert_eq!(record.message_id, "m-42");
        assert_eq!(record.consumer_tag, "svc-main-3");
        assert!(!record.transport);
    }

    #[test]
    fn test_missing_message_id_only() {
        let err = ConsumeError::new(ContractError::handler("h", "bad"), Some(meta(None)));
        let record = FailureRecord::from(&err);

        assert_eq!(record.message_id, "unknown");
        assert_eq!(record.consumer_tag, "svc-main-3");
    }

    #[tokio::test]
    async fn test_watcher_drains_until_senders_dropped() {
        let (tx, rx) = mpsc::channel(1);
        let metrics = Arc::new(DispatchMetrics::new());
        let watcher = tokio::spawn(run_error_watcher(rx, metrics.clone()));

        let tx2 = tx.clone();
        for _ in 0..3 {
            tx.send(ConsumeError::transport(ContractError::broker("q", "eof")))
                .await
                .unwrap();
        }
        tx2.send(ConsumeError::new(
            ContractError::handler("h", "bad"),
            Some(meta(Some("m-1"))),
        ))
        .await
        .unwrap();
        drop(tx);
        drop(tx2);

        watcher.await.unwrap();
        assert_eq!(metrics.consume_errors(), 4);
        assert_eq!(metrics.transport_errors(), 3);
    }
}
