//! Message transport abstractions for shovel.
//!
//! The relay engine only depends on the source, sink, and broker traits
//! defined in this crate. An in-memory broker is provided for tests and
//! local runs.

pub mod broker;
pub mod memory;
pub mod sink;
pub mod source;

pub use broker::{Broker, BrokerError};
pub use sink::{MessageId, MessageSink, SinkError};
pub use source::{
    AckHandle, DeliveryHandler, InFlightMessage, MessageSource, ReceiveSettings, SourceError,
};
