use std::collections::HashMap;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::resource::ResourceName;

/// String attributes carried alongside a message payload.
pub type Attributes = HashMap<String, String>;

/// Message content relayed from a subscription to a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub data: Vec<u8>,
    pub attributes: Attributes,
}

impl Message {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// How many messages a relay job should move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "count")]
pub enum RelayMode {
    /// Stop after exactly this many admissions.
    Bounded(NonZeroU64),
    /// Drain the subscription.
    Unbounded,
}

impl RelayMode {
    /// Returns `None` for a zero count.
    pub fn bounded(count: u64) -> Option<Self> {
        NonZeroU64::new(count).map(RelayMode::Bounded)
    }

    pub fn target(self) -> Option<u64> {
        match self {
            RelayMode::Bounded(count) => Some(count.get()),
            RelayMode::Unbounded => None,
        }
    }

    pub fn is_unbounded(self) -> bool {
        matches!(self, RelayMode::Unbounded)
    }
}

/// Validated description of one relay job. Immutable once the job starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayJobSpec {
    pub mode: RelayMode,
    pub source: ResourceName,
    pub sink: ResourceName,
}

/// Final counters of a finished relay job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResult {
    /// Messages admitted against the target.
    pub accepted: u64,
    /// Admitted messages relayed and acknowledged.
    pub published: u64,
    /// Admitted messages whose relay failed and were nacked.
    pub failed: u64,
}

impl RelayResult {
    /// Admitted messages left unresolved when the job finished.
    pub fn abandoned(&self) -> u64 {
        self.accepted
            .saturating_sub(self.published)
            .saturating_sub(self.failed)
    }
}
