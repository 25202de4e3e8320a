use serde::Serialize;
use shovel_core::RelayResult;
use tracing::info;

use crate::governor::{DeadlineGovernor, GovernorPhase, Termination};
use crate::state::RelayState;

/// Final outcome of a relay job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job_id: String,
    pub result: RelayResult,
    /// Admitted messages left unacknowledged when the job finished.
    pub abandoned: u64,
    pub termination: Termination,
}

/// Reads the final counters of a finished job.
///
/// Returns `None` while the governor has not reached `Done`, since counters
/// can still move before that.
pub fn aggregate(
    job_id: &str,
    state: &RelayState,
    governor: &DeadlineGovernor,
) -> Option<JobReport> {
    if governor.phase() != GovernorPhase::Done {
        return None;
    }
    let result = RelayResult::from(state.snapshot());
    let termination = governor
        .termination()
        .unwrap_or(Termination::SourceExhausted);
    let report = JobReport {
        job_id: job_id.to_string(),
        abandoned: result.abandoned(),
        result,
        termination,
    };
    info!(
        job = %report.job_id,
        accepted = report.result.accepted,
        published = report.result.published,
        failed = report.result.failed,
        abandoned = report.abandoned,
        termination = ?report.termination,
        "relay job finished"
    );
    Some(report)
}
