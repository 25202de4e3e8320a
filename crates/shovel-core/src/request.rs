use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::resource::{ResourceKind, ResourceName};
use crate::types::{RelayJobSpec, RelayMode};

/// Inbound shovel request as posted by clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShovelRequest {
    /// Maximum number of messages to move.
    #[serde(skip_serializing_if = "is_zero")]
    pub num_messages: i64,
    /// Drain the whole subscription instead of a fixed count.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub all_messages: bool,
    pub source_subscription: String,
    pub target_topic: String,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

impl ShovelRequest {
    /// Checks required fields and the count/mode combination.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source_subscription.trim().is_empty() {
            return Err(ValidationError::MissingSource);
        }
        if self.target_topic.trim().is_empty() {
            return Err(ValidationError::MissingTarget);
        }
        if !self.all_messages && self.num_messages <= 0 {
            return Err(ValidationError::NonPositiveCount);
        }
        if self.all_messages && self.num_messages > 0 {
            return Err(ValidationError::ConflictingMode);
        }
        Ok(())
    }

    /// Validates the request and converts it into a job spec.
    pub fn into_spec(self) -> Result<RelayJobSpec, ValidationError> {
        self.validate()?;
        let mode = if self.all_messages {
            RelayMode::Unbounded
        } else {
            u64::try_from(self.num_messages)
                .ok()
                .and_then(RelayMode::bounded)
                .ok_or(ValidationError::NonPositiveCount)?
        };
        Ok(RelayJobSpec {
            mode,
            source: ResourceName::parse(&self.source_subscription, ResourceKind::Subscription)?,
            sink: ResourceName::parse(&self.target_topic, ResourceKind::Topic)?,
        })
    }
}
