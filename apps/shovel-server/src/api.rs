use serde::{Deserialize, Serialize};
use shovel_relay::{GovernorPhase, JobReport, RelayCounters};

pub const ACCEPTED_MESSAGE: &str = "Message shoveling started asynchronously";
pub const METHOD_NOT_ALLOWED_MESSAGE: &str = "Only POST requests are allowed";
/// Largest batch `/generate` publishes in one request.
pub const MAX_GENERATE_COUNT: u32 = 100_000;

/// Body of every `/shovel` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShovelResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ShovelResponse {
    pub fn accepted(request_id: String) -> Self {
        Self {
            status: "accepted".to_string(),
            message: ACCEPTED_MESSAGE.to_string(),
            request_id: Some(request_id),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            request_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Draining,
    Completed,
    Failed,
}

impl From<GovernorPhase> for JobState {
    fn from(phase: GovernorPhase) -> Self {
        match phase {
            GovernorPhase::Running => JobState::Running,
            GovernorPhase::Draining => JobState::Draining,
            GovernorPhase::Done => JobState::Completed,
        }
    }
}

/// Live view of a job served on `/jobs/{requestId}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub request_id: String,
    pub source_subscription: String,
    pub target_topic: String,
    pub state: JobState,
    pub progress: RelayCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<JobReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub target_topic: String,
    #[serde(default = "default_generate_count")]
    pub count: u32,
}

fn default_generate_count() -> u32 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub batch_id: String,
    pub requested: u32,
    pub published: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsQuery {
    pub job: Option<String>,
    pub limit: Option<usize>,
}
