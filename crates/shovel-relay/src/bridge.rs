use std::sync::Arc;
use std::time::Duration;

use shovel_transport::{AckHandle, InFlightMessage, MessageId, MessageSink, SinkError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::state::RelayState;

/// How one admitted message was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Forward confirmed; the original was acked.
    Published(MessageId),
    /// Forward refused or timed out; the original was nacked.
    Failed(String),
    /// The job finished first; the original was left unsettled.
    Abandoned,
}

/// Forwards admitted messages to the sink and settles the originals.
#[derive(Clone)]
pub struct RelayBridge {
    job: Arc<str>,
    state: Arc<RelayState>,
    sink: Arc<dyn MessageSink>,
    publish_timeout: Duration,
    abandon: CancellationToken,
}

impl RelayBridge {
    pub fn new(
        job: Arc<str>,
        state: Arc<RelayState>,
        sink: Arc<dyn MessageSink>,
        publish_timeout: Duration,
        abandon: CancellationToken,
    ) -> Self {
        Self {
            job,
            state,
            sink,
            publish_timeout,
            abandon,
        }
    }

    /// Relays one admitted message.
    ///
    /// The ack or nack is issued only after the forward outcome is known. A
    /// failed forward consumes its admission slot for good.
    pub async fn relay(&self, message: InFlightMessage) -> BridgeOutcome {
        let (content, ack) = message.into_parts();
        let forward = tokio::time::timeout(self.publish_timeout, self.sink.publish(content));

        let result = tokio::select! {
            biased;
            _ = self.abandon.cancelled() => {
                drop(ack);
                debug!(job = %self.job, "relay abandoned before publish settled");
                return BridgeOutcome::Abandoned;
            }
            result = forward => result,
        };

        match result {
            Ok(Ok(id)) => {
                ack.ack();
                self.state.record_published();
                debug!(job = %self.job, message_id = %id, "relayed message");
                BridgeOutcome::Published(id)
            }
            Ok(Err(err)) => self.fail(ack, err),
            Err(_) => self.fail(
                ack,
                SinkError::Rejected(format!(
                    "no publish confirmation within {:?}",
                    self.publish_timeout
                )),
            ),
        }
    }

    fn fail(&self, ack: Box<dyn AckHandle>, err: SinkError) -> BridgeOutcome {
        ack.nack();
        self.state.record_failed();
        warn!(job = %self.job, error = %err, "relay failed, message nacked");
        BridgeOutcome::Failed(err.to_string())
    }
}
