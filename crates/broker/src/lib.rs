//! # Broker
//!
//! Broker client implementations for the dispatcher.
//!
//! Responsibilities:
//! - Drive the per-worker consume loop
//! - Map transport deliveries to [`contracts::Message`]
//! - Settle deliveries through [`contracts::Acknowledger`]
//! - Report transport failures on the shared error channel
//!
//! ## Feature Flags
//!
//! - `amqp`: Enable the RabbitMQ client (requires lapin)

pub mod error;
pub mod memory;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use contracts::{BrokerClient, ConsumeError, Message, MessageHandler};
pub use error::{BrokerError, Result};
pub use memory::MemoryBroker;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpBroker, AmqpSession};
