//! BrokerClient trait - Dispatcher input interface
//!
//! The dispatcher never talks to a transport directly. Each worker calls
//! [`BrokerClient::consume`] once and the client drives the delivery loop,
//! invoking the bound [`MessageHandler`] per message and reporting failures
//! through the shared [`ErrorSender`].

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{ContractError, Message, MessageMeta};

/// Bound message handler
///
/// Invoked concurrently by every worker of an endpoint, so it must not rely on
/// unsynchronized shared state.
pub type MessageHandler =
    Arc<dyn Fn(Message) -> BoxFuture<'static, Result<(), ContractError>> + Send + Sync>;

/// Producer side of the shared error channel
pub type ErrorSender = mpsc::Sender<ConsumeError>;

/// Consumer side of the shared error channel
pub type ErrorReceiver = mpsc::Receiver<ConsumeError>;

/// Wrap an async closure into a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ContractError>> + Send + 'static,
{
    Arc::new(move |message| f(message).boxed())
}

/// Failure record produced by a worker or transport
///
/// Consumed exactly once by the error watcher.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ConsumeError {
    /// Underlying failure
    #[source]
    pub error: ContractError,

    /// Reference to the message being processed, if known
    pub message: Option<MessageMeta>,
}

impl ConsumeError {
    /// Failure tied to a specific delivery
    pub fn new(error: ContractError, message: Option<MessageMeta>) -> Self {
        Self { error, message }
    }

    /// Transport failure with no message reference
    pub fn transport(error: ContractError) -> Self {
        Self {
            error,
            message: None,
        }
    }
}

/// Broker client trait
///
/// Implementations own the transport: connecting, reading, mapping deliveries to
/// [`Message`], and settling. The dispatcher only provides the handler, the error
/// channel and the shutdown signal.
#[trait_variant::make(BrokerClient: Send)]
pub trait LocalBrokerClient {
    /// Broker resource (queue) this client reads from
    fn resource(&self) -> &str;

    /// Run the consume loop until `shutdown` is cancelled or the transport ends
    ///
    /// Called once per worker task. Must not panic on transport failures; report
    /// them as [`ConsumeError`] on `errors` instead.
    async fn consume(
        &self,
        shutdown: CancellationToken,
        errors: ErrorSender,
        handler: MessageHandler,
    );
}

/// Invoke `handler` for one message and report a failure, if any
///
/// Shared by every broker client so the "invoke then report" contract is the
/// same regardless of transport.
pub async fn deliver(handler: &MessageHandler, message: Message, errors: &ErrorSender) {
    let meta = message.meta().clone();
    if let Err(error) = handler(message).await {
        report(errors, ConsumeError::new(error, Some(meta))).await;
    }
}

/// Push a failure onto the error channel
///
/// Returns false when the error watcher is gone and the record was dropped.
pub async fn report(errors: &ErrorSender, error: ConsumeError) -> bool {
    match errors.send(error).await {
        Ok(()) => true,
        Err(mpsc::error::SendError(dropped)) => {
            warn!(error = %dropped, "error watcher closed, consume error dropped");
            false
        }
    }
}
