//! Handlers - reference handler and panic containment

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use contracts::{AckOutcome, AckPolicy, ContractError, Message, MessageHandler, DEFAULT_HANDLER};
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::metrics::DispatchMetrics;

/// Name the reference handler is registered under
pub const MAIN_CONSUME: &str = DEFAULT_HANDLER;

/// Reference handler
///
/// With [`AckPolicy::Immediate`] the message is acked before anything else. A
/// failed ack is logged and swallowed: the broker will redeliver. With
/// [`AckPolicy::OnSuccess`] the message is acked only after processing; a failed
/// processing step nacks with requeue when transient and rejects otherwise.
pub fn main_consume(policy: AckPolicy) -> MessageHandler {
    Arc::new(move |message: Message| {
        async move {
            match policy {
                AckPolicy::Immediate => consume_immediate(message).await,
                AckPolicy::OnSuccess => consume_on_success(message).await,
            }
        }
        .boxed()
    })
}

async fn consume_immediate(message: Message) -> Result<(), ContractError> {
    if !settle(&message, AckOutcome::Ack).await {
        return Ok(());
    }
    process(&message)
}

async fn consume_on_success(message: Message) -> Result<(), ContractError> {
    match process(&message) {
        Ok(()) => {
            settle(&message, AckOutcome::Ack).await;
            Ok(())
        }
        Err(e) => {
            let outcome = if e.is_transient() {
                AckOutcome::Nack { requeue: true }
            } else {
                AckOutcome::Reject { requeue: false }
            };
            settle(&message, outcome).await;
            Err(e)
        }
    }
}

/// Settle and log a failure; returns whether the broker accepted it
async fn settle(message: &Message, outcome: AckOutcome) -> bool {
    let result = message.settle(outcome).await;
    observability::record_settlement(MAIN_CONSUME, outcome, result.is_ok());

    match result {
        Ok(()) => true,
        Err(e) => {
            error!(
                method = MAIN_CONSUME,
                message_id = %message.meta().message_id_or_unknown(),
                consumer_tag = %message.consumer_tag(),
                outcome = outcome.as_str(),
                error = %e,
                "Error acknowledging message"
            );
            false
        }
    }
}

/// Content processing step; bodies are opaque, only emptiness is rejected
fn process(message: &Message) -> Result<(), ContractError> {
    if message.body().is_empty() {
        return Err(ContractError::handler(MAIN_CONSUME, "empty message body"));
    }
    debug!(
        message_id = %message.meta().message_id_or_unknown(),
        bytes = message.body().len(),
        redelivered = message.meta().redelivered,
        "message processed"
    );
    Ok(())
}

/// Wrap `handler` so a panic becomes a `HandlerPanicked` error
///
/// Catches panics raised while creating the future as well as while polling
/// it. A delivery left unsettled by the panic is rejected without requeue so
/// it does not hold a prefetch slot. Also feeds the per-start counters and the
/// Prometheus metrics.
pub(crate) fn contain_panics(
    endpoint: Arc<str>,
    handler_name: Arc<str>,
    handler: MessageHandler,
    metrics: Arc<DispatchMetrics>,
) -> MessageHandler {
    Arc::new(move |message: Message| {
        let endpoint = endpoint.clone();
        let handler_name = handler_name.clone();
        let metrics = metrics.clone();
        let message_id = message.meta().message_id_or_unknown().to_string();
        let pending = message.clone();
        let started = Instant::now();
        let invoked = std::panic::catch_unwind(AssertUnwindSafe(|| handler(message)));

        async move {
            let outcome = match invoked {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(payload) => Err(payload),
            };

            match outcome {
                Ok(Ok(())) => {
                    metrics.inc_handled();
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    observability::record_message_handled(&endpoint, elapsed_ms);
                    Ok(())
                }
                Ok(Err(e)) => {
                    metrics.inc_failed();
                    observability::record_handler_failure(&endpoint);
                    warn!(
                        endpoint = %endpoint,
                        handler = %handler_name,
                        message_id = %message_id,
                        error = %e,
                        "handler returned error"
                    );
                    Err(e)
                }
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    metrics.inc_panicked();
                    observability::record_handler_panic(&endpoint);
                    error!(
                        endpoint = %endpoint,
                        handler = %handler_name,
                        message_id = %message_id,
                        panic = %reason,
                        "recovered from panic"
                    );
                    if !pending.is_settled() {
                        settle_after_panic(&pending, &handler_name).await;
                    }
                    Err(ContractError::handler_panicked(handler_name.as_ref(), reason))
                }
            }
        }
        .boxed()
    })
}

async fn settle_after_panic(message: &Message, handler_name: &str) {
    let outcome = AckOutcome::Reject { requeue: false };
    let result = message.settle(outcome).await;
    observability::record_settlement(handler_name, outcome, result.is_ok());

    if let Err(e) = result {
        error!(
            handler = %handler_name,
            message_id = %message.meta().message_id_or_unknown(),
            consumer_tag = %message.consumer_tag(),
            outcome = outcome.as_str(),
            error = %e,
            "Error acknowledging message"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
