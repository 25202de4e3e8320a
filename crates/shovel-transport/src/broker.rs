use std::sync::Arc;

use shovel_core::ResourceName;
use thiserror::Error;

use crate::sink::MessageSink;
use crate::source::MessageSource;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("subscription {0} not found")]
    UnknownSubscription(String),
    #[error("topic {0} not found")]
    UnknownTopic(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
}

/// Resolves locators into source and sink handles.
pub trait Broker: Send + Sync {
    /// Opens the subscription named by `name`.
    fn source(&self, name: &ResourceName) -> Result<Arc<dyn MessageSource>, BrokerError>;

    /// Returns a handle for the topic named by `name`.
    ///
    /// The handle is returned even when the topic is missing; callers check
    /// [`MessageSink::exists`] before publishing.
    fn sink(&self, name: &ResourceName) -> Arc<dyn MessageSink>;
}
