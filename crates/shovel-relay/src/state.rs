use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use shovel_core::RelayResult;

/// Snapshot of a job's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayCounters {
    /// Messages admitted against the target.
    pub accepted: u64,
    /// Admitted messages relayed and acked.
    pub published: u64,
    /// Admitted messages whose relay failed and were nacked.
    pub failed: u64,
}

impl RelayCounters {
    /// Admitted messages whose relay has not settled yet.
    pub fn in_flight(&self) -> u64 {
        self.accepted - self.published - self.failed
    }
}

impl From<RelayCounters> for RelayResult {
    fn from(value: RelayCounters) -> Self {
        RelayResult {
            accepted: value.accepted,
            published: value.published,
            failed: value.failed,
        }
    }
}

/// Job-scoped relay counters shared by admission and relay tasks.
///
/// All three counters live behind one lock so a snapshot is never torn and
/// `accepted >= published + failed` holds at every instant.
#[derive(Debug, Default)]
pub struct RelayState {
    counters: Mutex<RelayCounters>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RelayCounters {
        *self.lock()
    }

    /// Increments `accepted` if it is below `limit`, returning the new count.
    pub(crate) fn reserve_slot(&self, limit: u64) -> Option<u64> {
        let mut counters = self.lock();
        if counters.accepted >= limit {
            return None;
        }
        counters.accepted += 1;
        Some(counters.accepted)
    }

    pub(crate) fn record_published(&self) {
        let mut counters = self.lock();
        debug_assert!(counters.in_flight() > 0);
        counters.published += 1;
    }

    pub(crate) fn record_failed(&self) {
        let mut counters = self.lock();
        debug_assert!(counters.in_flight() > 0);
        counters.failed += 1;
    }

    fn lock(&self) -> MutexGuard<'_, RelayCounters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}
