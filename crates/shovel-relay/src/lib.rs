//! Shovel relay engine.
//!
//! This crate admits messages from a subscription against a job target,
//! forwards admitted payloads to a topic, settles each original with an
//! ack or nack, and terminates the job on count completion, timeout, or
//! source exhaustion.

pub mod admission;
pub mod aggregate;
pub mod bridge;
pub mod config;
pub mod governor;
pub mod job;
pub mod state;

pub use aggregate::JobReport;
pub use config::RelayRuntimeConfig;
pub use governor::{GovernorPhase, Termination};
pub use job::{RelayError, RelayJob};
pub use state::{RelayCounters, RelayState};
