use async_trait::async_trait;
use shovel_core::Message;
use thiserror::Error;

/// Identifier assigned by a sink to a published message.
pub type MessageId = String;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("topic {0} does not exist")]
    NotFound(String),
    #[error("publish rejected: {0}")]
    Rejected(String),
    #[error("topic is closed")]
    Closed,
}

/// Push-based message sink (a topic). Safe to call from many tasks at once.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Whether the topic exists and can accept publishes.
    async fn exists(&self) -> Result<bool, SinkError>;

    /// Publishes `message` and resolves once the topic confirms or refuses it.
    async fn publish(&self, message: Message) -> Result<MessageId, SinkError>;
}
