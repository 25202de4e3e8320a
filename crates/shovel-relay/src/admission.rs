use std::sync::Arc;

use shovel_core::RelayMode;
use tokio_util::sync::CancellationToken;

use crate::state::RelayState;

/// Why a delivery was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A bounded job already admitted its full target.
    TargetReached,
    /// An unbounded job hit its operational ceiling.
    CeilingReached,
    /// The job stopped admitting.
    Draining,
}

/// Admission decision for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Relay may proceed. `last_slot` is set on the admission that filled
    /// the limit.
    Accepted { slot: u64, last_slot: bool },
    /// The caller must nack the delivery.
    Rejected(RejectReason),
}

/// Gate deciding whether a delivery counts toward the job target.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    state: Arc<RelayState>,
    mode: RelayMode,
    limit: u64,
    drain: CancellationToken,
}

impl AdmissionController {
    /// `limit` is the bounded target, or the ceiling for unbounded jobs.
    pub fn new(
        state: Arc<RelayState>,
        mode: RelayMode,
        limit: u64,
        drain: CancellationToken,
    ) -> Self {
        Self {
            state,
            mode,
            limit,
            drain,
        }
    }

    /// Atomically checks the limit and claims one slot.
    pub fn try_admit(&self) -> Admission {
        if self.drain.is_cancelled() {
            return Admission::Rejected(RejectReason::Draining);
        }
        match self.state.reserve_slot(self.limit) {
            Some(slot) => Admission::Accepted {
                slot,
                last_slot: slot == self.limit,
            },
            None if self.mode.is_unbounded() => Admission::Rejected(RejectReason::CeilingReached),
            None => Admission::Rejected(RejectReason::TargetReached),
        }
    }
}
