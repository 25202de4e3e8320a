use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shovel_core::RelayJobSpec;
use shovel_transport::{
    Broker, BrokerError, DeliveryHandler, InFlightMessage, MessageSink, MessageSource, SinkError,
};
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::admission::{Admission, AdmissionController, RejectReason};
use crate::aggregate::{aggregate, JobReport};
use crate::bridge::RelayBridge;
use crate::config::RelayRuntimeConfig;
use crate::governor::{DeadlineGovernor, GovernorPhase, Termination};
use crate::state::{RelayCounters, RelayState};

/// Failures that stop a job before it admits anything.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] BrokerError),
    #[error("topic {0} does not exist")]
    SinkNotFound(String),
    #[error("could not verify topic: {0}")]
    SinkCheck(#[source] SinkError),
    #[error("job {0} was already started")]
    AlreadyStarted(String),
    #[error("job {0} ended before its counters were final")]
    Unfinished(String),
}

/// One relay invocation: a spec, its counters, and its governor.
///
/// A job runs at most once. Progress can be observed from other tasks while
/// [`RelayJob::run`] is in progress.
#[derive(Debug)]
pub struct RelayJob {
    id: Arc<str>,
    spec: RelayJobSpec,
    config: RelayRuntimeConfig,
    state: Arc<RelayState>,
    governor: Arc<DeadlineGovernor>,
    started: AtomicBool,
}

impl RelayJob {
    pub fn new(id: impl Into<String>, spec: RelayJobSpec, config: RelayRuntimeConfig) -> Self {
        let id: Arc<str> = Arc::from(id.into());
        let governor = DeadlineGovernor::new(
            Arc::clone(&id),
            config.job_timeout(spec.mode),
            config.grace_period,
        );
        Self {
            id,
            spec,
            config,
            state: Arc::new(RelayState::new()),
            governor: Arc::new(governor),
            started: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &RelayJobSpec {
        &self.spec
    }

    /// Current counters; final once [`RelayJob::phase`] is `Done`.
    pub fn progress(&self) -> RelayCounters {
        self.state.snapshot()
    }

    pub fn phase(&self) -> GovernorPhase {
        self.governor.phase()
    }

    pub fn termination(&self) -> Option<Termination> {
        self.governor.termination()
    }

    /// Resolves the source and sink names through `broker` and runs the job.
    pub async fn run_with_broker(&self, broker: &dyn Broker) -> Result<JobReport, RelayError> {
        let source = broker.source(&self.spec.source).map_err(|err| {
            warn!(job = %self.id, error = %err, "source lookup failed");
            RelayError::from(err)
        })?;
        let sink = broker.sink(&self.spec.sink);
        self.run(source, sink).await
    }

    /// Relays from `source` to `sink` until the job terminates.
    ///
    /// Fails only on precondition errors. Anything that goes wrong after
    /// the first admission is reported through the returned counters and
    /// termination reason.
    pub async fn run(
        &self,
        source: Arc<dyn MessageSource>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<JobReport, RelayError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(RelayError::AlreadyStarted(self.id.to_string()));
        }
        match sink.exists().await {
            Ok(true) => {}
            Ok(false) => {
                warn!(job = %self.id, topic = %self.spec.sink, "target topic does not exist");
                return Err(RelayError::SinkNotFound(self.spec.sink.to_string()));
            }
            Err(err) => {
                warn!(job = %self.id, error = %err, "target topic check failed");
                return Err(RelayError::SinkCheck(err));
            }
        }

        info!(
            job = %self.id,
            source = %self.spec.source,
            sink = %self.spec.sink,
            mode = ?self.spec.mode,
            "relay job started"
        );

        let relays = TaskTracker::new();
        let limit = self.config.admission_limit(self.spec.mode);
        let handler = Arc::new(JobDeliveryHandler {
            job: Arc::clone(&self.id),
            admission: AdmissionController::new(
                Arc::clone(&self.state),
                self.spec.mode,
                limit,
                self.governor.drain_token(),
            ),
            bridge: RelayBridge::new(
                Arc::clone(&self.id),
                Arc::clone(&self.state),
                sink,
                self.config.publish_timeout,
                self.governor.abandon_token(),
            ),
            governor: Arc::clone(&self.governor),
            relays: relays.clone(),
            limit_cause: if self.spec.mode.is_unbounded() {
                Termination::CeilingReached
            } else {
                Termination::TargetReached
            },
        });

        let consume = source.consume(
            handler,
            self.config.receive_settings(),
            self.governor.drain_token(),
        );
        self.governor.supervise(consume, &relays).await;

        aggregate(&self.id, &self.state, &self.governor)
            .ok_or_else(|| RelayError::Unfinished(self.id.to_string()))
    }
}

struct JobDeliveryHandler {
    job: Arc<str>,
    admission: AdmissionController,
    bridge: RelayBridge,
    governor: Arc<DeadlineGovernor>,
    relays: TaskTracker,
    limit_cause: Termination,
}

impl DeliveryHandler for JobDeliveryHandler {
    fn on_message(&self, message: InFlightMessage) {
        // Keeps the drain from finishing between admission and spawn.
        let _pending = self.relays.token();

        match self.admission.try_admit() {
            Admission::Accepted { slot, last_slot } => {
                debug!(job = %self.job, slot, "message admitted");
                let bridge = self.bridge.clone();
                self.relays.spawn(async move {
                    bridge.relay(message).await;
                });
                if last_slot {
                    self.governor.begin_drain(self.limit_cause.clone());
                }
            }
            Admission::Rejected(reason) => {
                debug!(job = %self.job, reason = ?reason, "message rejected");
                message.nack();
                match reason {
                    RejectReason::TargetReached => {
                        self.governor.begin_drain(Termination::TargetReached);
                    }
                    RejectReason::CeilingReached => {
                        self.governor.begin_drain(Termination::CeilingReached);
                    }
                    RejectReason::Draining => {}
                }
            }
        }
    }
}
