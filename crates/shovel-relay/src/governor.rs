use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use shovel_transport::SourceError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Lifecycle phase of a relay job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorPhase {
    /// Consuming and admitting.
    Running,
    /// No new admissions; in-flight relays are settling.
    Draining,
    /// Counters are final.
    Done,
}

impl GovernorPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => GovernorPhase::Running,
            1 => GovernorPhase::Draining,
            _ => GovernorPhase::Done,
        }
    }
}

/// What moved the job out of `Running`. The first cause wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum Termination {
    TargetReached,
    CeilingReached,
    Timeout,
    SourceExhausted,
    SourceFailed(String),
}

/// Owns a job's cancellation scope and its `Running -> Draining -> Done`
/// state machine.
#[derive(Debug)]
pub struct DeadlineGovernor {
    job: Arc<str>,
    phase: AtomicU8,
    cause: Mutex<Option<Termination>>,
    drain_started: Mutex<Option<Instant>>,
    drain: CancellationToken,
    abandon: CancellationToken,
    timeout: Duration,
    grace: Duration,
}

impl DeadlineGovernor {
    pub fn new(job: Arc<str>, timeout: Duration, grace: Duration) -> Self {
        Self {
            job,
            phase: AtomicU8::new(GovernorPhase::Running as u8),
            cause: Mutex::new(None),
            drain_started: Mutex::new(None),
            drain: CancellationToken::new(),
            abandon: CancellationToken::new(),
            timeout,
            grace,
        }
    }

    pub fn phase(&self) -> GovernorPhase {
        GovernorPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Cause recorded when draining began, if it has.
    pub fn termination(&self) -> Option<Termination> {
        self.cause.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Token set once when the job starts draining.
    pub fn drain_token(&self) -> CancellationToken {
        self.drain.clone()
    }

    /// Token set once when the grace period ends; unsettled relays observe it.
    pub fn abandon_token(&self) -> CancellationToken {
        self.abandon.clone()
    }

    /// Moves `Running -> Draining` and signals cancellation.
    ///
    /// Idempotent: returns `false` and keeps the first cause when the job is
    /// already draining.
    pub fn begin_drain(&self, cause: Termination) -> bool {
        let moved = self
            .phase
            .compare_exchange(
                GovernorPhase::Running as u8,
                GovernorPhase::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if moved {
            info!(job = %self.job, cause = ?cause, "job draining");
            *self.drain_started.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
            *self.cause.lock().unwrap_or_else(|e| e.into_inner()) = Some(cause);
        }
        self.drain.cancel();
        moved
    }

    /// Grace deadline, counted from the moment draining began.
    fn grace_deadline(&self) -> Instant {
        let started = *self.drain_started.lock().unwrap_or_else(|e| e.into_inner());
        started.unwrap_or_else(Instant::now) + self.grace
    }

    /// Drives the job from `Running` to `Done`.
    ///
    /// Runs the consumption loop until it returns, the job timeout fires, or
    /// another task starts the drain. From then on the loop and in-flight
    /// relays share one grace deadline; whatever is still pending when it
    /// passes is abandoned.
    pub async fn supervise<F>(&self, consume: F, relays: &TaskTracker)
    where
        F: Future<Output = Result<(), SourceError>>,
    {
        tokio::pin!(consume);
        let finished = tokio::select! {
            result = &mut consume => Some(result),
            _ = tokio::time::sleep(self.timeout) => {
                warn!(job = %self.job, timeout = ?self.timeout, "job timeout reached");
                self.begin_drain(Termination::Timeout);
                None
            }
            _ = self.drain.cancelled() => None,
        };

        let grace_deadline = match finished {
            Some(result) => {
                self.record_loop_end(result);
                self.grace_deadline()
            }
            None => {
                let deadline = self.grace_deadline();
                match tokio::time::timeout_at(deadline, &mut consume).await {
                    Ok(result) => self.record_loop_end(result),
                    Err(_) => warn!(job = %self.job, "consumption loop ignored cancellation"),
                }
                deadline
            }
        };

        relays.close();
        if tokio::time::timeout_at(grace_deadline, relays.wait())
            .await
            .is_err()
        {
            warn!(
                job = %self.job,
                pending = relays.len(),
                "grace period elapsed, abandoning unsettled relays"
            );
        }
        self.abandon.cancel();
        relays.wait().await;
        self.phase
            .store(GovernorPhase::Done as u8, Ordering::Release);
    }

    fn record_loop_end(&self, result: Result<(), SourceError>) {
        match result {
            Ok(()) => {
                self.begin_drain(Termination::SourceExhausted);
            }
            Err(err) => {
                warn!(job = %self.job, error = %err, "consumption loop failed");
                self.begin_drain(Termination::SourceFailed(err.to_string()));
            }
        }
    }
}
