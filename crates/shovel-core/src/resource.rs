use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ResourceNameError;

/// Collection segment of a fully qualified resource name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Subscription,
    Topic,
}

impl ResourceKind {
    /// Path segment used for this kind, e.g. `subscriptions`.
    pub fn collection(self) -> &'static str {
        match self {
            ResourceKind::Subscription => "subscriptions",
            ResourceKind::Topic => "topics",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Subscription => f.write_str("subscription"),
            ResourceKind::Topic => f.write_str("topic"),
        }
    }
}

/// Locator of a subscription or topic.
///
/// Accepts either the fully qualified `projects/{project}/{kind}/{name}`
/// form or a bare short name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceName {
    raw: String,
    project: String,
    short_name: String,
}

impl ResourceName {
    /// Parses `raw`, rejecting a fully qualified name of the wrong kind.
    pub fn parse(raw: &str, expected: ResourceKind) -> Result<Self, ResourceNameError> {
        let raw = raw.trim();
        let segments = split_segments(raw);
        if segments.is_empty() {
            return Err(ResourceNameError::Empty);
        }
        if segments.len() >= 4 && segments[0] == "projects" && segments[2] != expected.collection()
        {
            return Err(ResourceNameError::KindMismatch {
                name: raw.to_string(),
                expected,
            });
        }
        Ok(Self::from_segments(raw, &segments))
    }

    fn from_segments(raw: &str, segments: &[&str]) -> Self {
        let project = segments
            .iter()
            .position(|s| *s == "projects")
            .and_then(|idx| segments.get(idx + 1))
            .map(|s| s.to_string())
            .unwrap_or_default();
        let short_name = if segments.len() >= 4 {
            segments[3].to_string()
        } else {
            raw.to_string()
        };
        Self {
            raw: raw.to_string(),
            project,
            short_name,
        }
    }

    /// Project id, or an empty string when the name is not project scoped.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Trailing resource id used for broker lookups.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// The locator exactly as supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn split_segments(name: &str) -> Vec<&str> {
    name.split('/').filter(|s| !s.is_empty()).collect()
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<ResourceName> for String {
    fn from(value: ResourceName) -> Self {
        value.raw
    }
}

impl TryFrom<String> for ResourceName {
    type Error = ResourceNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let segments = split_segments(&value);
        if segments.is_empty() {
            return Err(ResourceNameError::Empty);
        }
        Ok(Self::from_segments(&value, &segments))
    }
}
