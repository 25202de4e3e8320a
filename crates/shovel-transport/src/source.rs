use std::sync::Arc;

use async_trait::async_trait;
use shovel_core::{Attributes, Message};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure of a subscription's consumption loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("subscription {0} is unavailable")]
    Unavailable(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Settles one delivered message with the source.
///
/// Both methods consume the handle, so a message is settled at most once.
/// Dropping an unsettled handle leaves the message unacknowledged and the
/// source redelivers it.
pub trait AckHandle: Send {
    /// Durably removes the message from the source.
    fn ack(self: Box<Self>);
    /// Returns the message to the source for redelivery.
    fn nack(self: Box<Self>);
}

/// A delivered message together with the handle that settles it.
pub struct InFlightMessage {
    message: Message,
    ack: Box<dyn AckHandle>,
}

impl InFlightMessage {
    pub fn new(message: Message, ack: Box<dyn AckHandle>) -> Self {
        Self { message, ack }
    }

    pub fn payload(&self) -> &[u8] {
        &self.message.data
    }

    pub fn attributes(&self) -> &Attributes {
        &self.message.attributes
    }

    pub fn ack(self) {
        self.ack.ack();
    }

    pub fn nack(self) {
        self.ack.nack();
    }

    /// Splits the content from its settle handle so the content can be
    /// forwarded while the handle waits for the outcome.
    pub fn into_parts(self) -> (Message, Box<dyn AckHandle>) {
        (self.message, self.ack)
    }
}

impl std::fmt::Debug for InFlightMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightMessage")
            .field("payload_len", &self.message.data.len())
            .field("attributes", &self.message.attributes)
            .finish_non_exhaustive()
    }
}

/// Callback invoked by a source once per delivered message.
///
/// Implementations must return quickly; long-running work belongs in a
/// spawned task.
pub trait DeliveryHandler: Send + Sync {
    fn on_message(&self, message: InFlightMessage);
}

impl<F> DeliveryHandler for F
where
    F: Fn(InFlightMessage) + Send + Sync,
{
    fn on_message(&self, message: InFlightMessage) {
        self(message)
    }
}

/// Flow-control knobs for a consumption loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveSettings {
    /// Maximum concurrent handler invocations.
    pub max_concurrency: usize,
    /// Maximum delivered-but-unsettled messages.
    pub max_outstanding: usize,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_outstanding: 100,
        }
    }
}

/// Pull-based message source (a subscription).
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Delivers messages to `handler` until `cancel` fires or the source has
    /// nothing left to deliver.
    async fn consume(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        settings: ReceiveSettings,
        cancel: CancellationToken,
    ) -> Result<(), SourceError>;
}
