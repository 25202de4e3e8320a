use thiserror::Error;

use crate::resource::ResourceKind;

/// Failure to interpret a subscription or topic locator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceNameError {
    #[error("resource name is empty")]
    Empty,
    #[error("resource {name} is not a {expected}")]
    KindMismatch {
        name: String,
        expected: ResourceKind,
    },
}

/// Rejection of an inbound shovel request before any job is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("sourceSubscription is required")]
    MissingSource,
    #[error("targetTopic is required")]
    MissingTarget,
    #[error("numMessages must be greater than 0 when allMessages is false")]
    NonPositiveCount,
    #[error("cannot specify both allMessages=true and numMessages > 0")]
    ConflictingMode,
    #[error(transparent)]
    Resource(#[from] ResourceNameError),
}

#[cfg(test)]
mod tests {
    use super::{ResourceNameError, ValidationError};
    use crate::resource::ResourceKind;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(
            ValidationError::MissingSource.to_string(),
            "sourceSubscription is required"
        );
        assert_eq!(
            ValidationError::NonPositiveCount.to_string(),
            "numMessages must be greater than 0 when allMessages is false"
        );
        assert_eq!(
            ValidationError::from(ResourceNameError::KindMismatch {
                name: "projects/p/topics/t".to_string(),
                expected: ResourceKind::Subscription,
            })
            .to_string(),
            "resource projects/p/topics/t is not a subscription"
        );
    }
}
