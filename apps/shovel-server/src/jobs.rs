use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use lru::LruCache;
use shovel_core::RelayJobSpec;
use shovel_relay::{JobReport, RelayJob, RelayRuntimeConfig};
use shovel_transport::Broker;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::api::{JobState, JobStatusResponse};

struct TrackedJob {
    job: Arc<RelayJob>,
    outcome: Mutex<Option<Result<JobReport, String>>>,
}

/// Finished jobs retained for lookup unless configured otherwise.
pub const DEFAULT_FINISHED_RETENTION: usize = 1000;

/// Running jobs are always kept; finished ones are evicted oldest-first.
struct JobTable {
    running: HashMap<String, Arc<TrackedJob>>,
    finished: LruCache<String, Arc<TrackedJob>>,
}

impl JobTable {
    fn new(retention: NonZeroUsize) -> Self {
        Self {
            running: HashMap::new(),
            finished: LruCache::new(retention),
        }
    }

    fn get(&self, request_id: &str) -> Option<Arc<TrackedJob>> {
        self.running
            .get(request_id)
            .or_else(|| self.finished.peek(request_id))
            .cloned()
    }

    fn finish(&mut self, request_id: &str) {
        if let Some(tracked) = self.running.remove(request_id) {
            if let Some((evicted, _)) = self.finished.push(request_id.to_string(), tracked) {
                if evicted != request_id {
                    debug!(job = %evicted, "finished job evicted");
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.running.len() + self.finished.len()
    }
}

/// Starts relay jobs in the background and keeps their status for lookup.
///
/// Every running job stays visible; at most `retention` finished jobs do.
#[derive(Clone)]
pub struct JobRegistry {
    broker: Arc<dyn Broker>,
    config: RelayRuntimeConfig,
    seq: Arc<AtomicU64>,
    jobs: Arc<Mutex<JobTable>>,
    tasks: TaskTracker,
}

impl JobRegistry {
    pub fn new(broker: Arc<dyn Broker>, config: RelayRuntimeConfig) -> Self {
        let retention = NonZeroUsize::new(DEFAULT_FINISHED_RETENTION).unwrap_or(NonZeroUsize::MIN);
        Self::with_retention(broker, config, retention)
    }

    pub fn with_retention(
        broker: Arc<dyn Broker>,
        config: RelayRuntimeConfig,
        retention: NonZeroUsize,
    ) -> Self {
        Self {
            broker,
            config,
            seq: Arc::new(AtomicU64::new(0)),
            jobs: Arc::new(Mutex::new(JobTable::new(retention))),
            tasks: TaskTracker::new(),
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Spawns a job for `spec` and returns its request id immediately.
    pub fn start(&self, spec: RelayJobSpec) -> String {
        let request_id = self.next_request_id();
        let tracked = Arc::new(TrackedJob {
            job: Arc::new(RelayJob::new(
                request_id.clone(),
                spec,
                self.config.clone(),
            )),
            outcome: Mutex::new(None),
        });
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .running
            .insert(request_id.clone(), Arc::clone(&tracked));

        let broker = Arc::clone(&self.broker);
        let jobs = Arc::clone(&self.jobs);
        self.tasks.spawn(async move {
            let outcome = tracked.job.run_with_broker(broker.as_ref()).await;
            if let Err(err) = &outcome {
                error!(job = %tracked.job.id(), error = %err, "relay job aborted");
            }
            *tracked.outcome.lock().unwrap_or_else(|e| e.into_inner()) =
                Some(outcome.map_err(|err| err.to_string()));
            jobs.lock()
                .unwrap_or_else(|e| e.into_inner())
                .finish(tracked.job.id());
        });
        info!(job = %request_id, "relay job queued");
        request_id
    }

    pub fn status(&self, request_id: &str) -> Option<JobStatusResponse> {
        let tracked = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(request_id)?;
        let job = &tracked.job;
        let outcome = tracked
            .outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let (state, report, error) = match outcome {
            Some(Ok(report)) => (JobState::Completed, Some(report), None),
            Some(Err(err)) => (JobState::Failed, None, Some(err)),
            None => (JobState::from(job.phase()), None, None),
        };
        Some(JobStatusResponse {
            request_id: request_id.to_string(),
            source_subscription: job.spec().source.to_string(),
            target_topic: job.spec().sink.to_string(),
            state,
            progress: job.progress(),
            report,
            error,
        })
    }

    /// Running jobs plus retained finished ones.
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until every job started so far has finished.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    fn next_request_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("shovel-{millis}-{seq}")
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use super::JobRegistry;
    use crate::api::JobState;
    use shovel_core::{Message, RelayJobSpec, RelayMode, ResourceKind, ResourceName};
    use shovel_relay::RelayRuntimeConfig;
    use shovel_transport::memory::InMemoryBroker;

    fn spec(count: u64, source: &str, sink: &str) -> RelayJobSpec {
        RelayJobSpec {
            mode: RelayMode::bounded(count).expect("non-zero"),
            source: ResourceName::parse(source, ResourceKind::Subscription).expect("source"),
            sink: ResourceName::parse(sink, ResourceKind::Topic).expect("sink"),
        }
    }

    fn registry(broker: Arc<InMemoryBroker>) -> JobRegistry {
        JobRegistry::new(
            broker,
            RelayRuntimeConfig {
                grace_period: Duration::from_millis(100),
                bounded_timeout: Duration::from_secs(5),
                ..RelayRuntimeConfig::default()
            },
        )
    }

    #[test]
    fn request_ids_are_unique_and_prefixed() {
        let registry = registry(Arc::new(InMemoryBroker::new()));
        let a = registry.next_request_id();
        let b = registry.next_request_id();
        assert!(a.starts_with("shovel-"));
        assert!(a.ends_with("-1"));
        assert!(b.ends_with("-2"));
        assert_ne!(a, b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn finished_job_reports_result() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_topic("in");
        broker.create_topic("out");
        let sub = broker.create_subscription("in-sub", "in").expect("subscription");
        for i in 0..3 {
            sub.enqueue(Message::new(format!("m{i}")));
        }
        let registry = registry(Arc::clone(&broker));

        let id = registry.start(spec(3, "in-sub", "out"));
        registry.wait_idle().await;

        let status = registry.status(&id).expect("known job");
        assert_eq!(status.state, JobState::Completed);
        let report = status.report.expect("report");
        assert_eq!(report.result.accepted, 3);
        assert_eq!(report.result.published, 3);
        assert_eq!(status.progress.published, 3);
        assert!(registry.status("shovel-0-0").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn precondition_failure_is_recorded() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_topic("in");
        broker.create_subscription("in-sub", "in").expect("subscription");
        let registry = registry(Arc::clone(&broker));

        let id = registry.start(spec(1, "in-sub", "projects/p/topics/missing"));
        registry.wait_idle().await;

        let status = registry.status(&id).expect("known job");
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(
            status.error.as_deref(),
            Some("topic projects/p/topics/missing does not exist")
        );
        assert_eq!(status.progress.accepted, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oldest_finished_jobs_are_evicted() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_topic("in");
        broker.create_subscription("in-sub", "in").expect("subscription");
        let registry = JobRegistry::with_retention(
            broker.clone(),
            RelayRuntimeConfig::default(),
            NonZeroUsize::new(2).expect("non-zero"),
        );

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(registry.start(spec(1, "in-sub", "missing")));
            registry.wait_idle().await;
        }

        assert!(registry.status(&ids[0]).is_none());
        assert!(registry.status(&ids[1]).is_some());
        assert!(registry.status(&ids[2]).is_some());
        assert_eq!(registry.len(), 2);
    }
}
