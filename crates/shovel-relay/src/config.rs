use std::time::Duration;

use shovel_core::RelayMode;
use shovel_transport::ReceiveSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRuntimeConfig {
    /// Maximum concurrent delivery-handler invocations on the source.
    pub max_concurrency: usize,
    /// Maximum delivered-but-unsettled messages on the source.
    pub max_outstanding: usize,
    /// Admission ceiling for unbounded jobs.
    pub unbounded_ceiling: u64,
    /// Wall-clock limit for bounded jobs.
    pub bounded_timeout: Duration,
    /// Wall-clock limit for unbounded jobs.
    pub unbounded_timeout: Duration,
    /// Time in-flight relays get to settle once the job starts draining.
    pub grace_period: Duration,
    /// Upper bound on a single publish confirmation wait.
    pub publish_timeout: Duration,
}

impl Default for RelayRuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_outstanding: 100,
            unbounded_ceiling: 10_000,
            bounded_timeout: Duration::from_secs(5 * 60),
            unbounded_timeout: Duration::from_secs(10 * 60),
            grace_period: Duration::from_secs(2),
            publish_timeout: Duration::from_secs(60),
        }
    }
}

impl RelayRuntimeConfig {
    /// Returns source flow-control settings derived from runtime config.
    pub fn receive_settings(&self) -> ReceiveSettings {
        ReceiveSettings {
            max_concurrency: self.max_concurrency,
            max_outstanding: self.max_outstanding,
        }
    }

    /// Wall-clock limit for a job running in `mode`.
    pub fn job_timeout(&self, mode: RelayMode) -> Duration {
        match mode {
            RelayMode::Bounded(_) => self.bounded_timeout,
            RelayMode::Unbounded => self.unbounded_timeout,
        }
    }

    /// Highest admission count a job running in `mode` may reach.
    pub fn admission_limit(&self, mode: RelayMode) -> u64 {
        mode.target().unwrap_or(self.unbounded_ceiling)
    }
}
