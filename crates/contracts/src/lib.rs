//! # Contracts
//!
//! Shared interface contracts between the consumer service crates.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Ownership model
//! - A [`Message`] is owned by the handler for the duration of one invocation
//! - Settlement (ack / nack / reject) goes back to the broker through [`Acknowledger`]
//! - Failures travel to the error watcher as [`ConsumeError`] over an [`ErrorSender`]

mod blueprint;
mod broker;
mod error;
mod message;

pub use blueprint::*;
pub use broker::*;
pub use error::*;
pub use message::*;
