use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use shovel_core::{Message, ResourceName};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broker::{Broker, BrokerError};
use crate::sink::{MessageId, MessageSink, SinkError};
use crate::source::{
    AckHandle, DeliveryHandler, InFlightMessage, MessageSource, ReceiveSettings, SourceError,
};

/// Coarse per-subscription delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub delivered: u64,
    pub acked: u64,
    pub nacked: u64,
    pub abandoned: u64,
    pub backlog: usize,
}

#[derive(Debug, Default)]
struct SubscriptionStatsInner {
    delivered: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug)]
struct SubscriptionInner {
    name: String,
    backlog: Mutex<VecDeque<Message>>,
    notify: Notify,
    fault: Mutex<Option<String>>,
    stats: SubscriptionStatsInner,
}

impl SubscriptionInner {
    fn backlog(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.backlog.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_fault(&self) -> Option<String> {
        self.fault.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Puts a message back at the front and releases its outstanding slot
    /// under the backlog lock, so the exhaustion check never misses it.
    fn requeue(&self, message: Message, permit: Option<OwnedSemaphorePermit>) {
        let mut backlog = self.backlog();
        backlog.push_front(message);
        drop(permit);
        drop(backlog);
        self.notify.notify_waiters();
    }

    fn release(&self, permit: Option<OwnedSemaphorePermit>) {
        let backlog = self.backlog();
        drop(permit);
        drop(backlog);
        self.notify.notify_waiters();
    }
}

/// In-memory subscription with redelivery of nacked and abandoned messages.
#[derive(Debug, Clone)]
pub struct InMemorySubscription {
    inner: Arc<SubscriptionInner>,
}

impl InMemorySubscription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                name: name.into(),
                backlog: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                fault: Mutex::new(None),
                stats: SubscriptionStatsInner::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queues a message for delivery.
    pub fn enqueue(&self, message: Message) {
        self.inner.backlog().push_back(message);
        self.inner.notify.notify_waiters();
    }

    /// Number of messages waiting for (re)delivery.
    pub fn backlog_len(&self) -> usize {
        self.inner.backlog().len()
    }

    /// Makes the running (or next) consumption loop fail with `reason`.
    pub fn inject_delivery_failure(&self, reason: impl Into<String>) {
        *self.inner.fault.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
        self.inner.notify.notify_waiters();
    }

    pub fn stats(&self) -> SubscriptionStats {
        let stats = &self.inner.stats;
        SubscriptionStats {
            delivered: stats.delivered.load(Ordering::Relaxed),
            acked: stats.acked.load(Ordering::Relaxed),
            nacked: stats.nacked.load(Ordering::Relaxed),
            abandoned: stats.abandoned.load(Ordering::Relaxed),
            backlog: self.backlog_len(),
        }
    }
}

struct MemoryAckHandle {
    inner: Arc<SubscriptionInner>,
    message: Option<Message>,
    permit: Option<OwnedSemaphorePermit>,
}

impl AckHandle for MemoryAckHandle {
    fn ack(mut self: Box<Self>) {
        self.message = None;
        self.inner.stats.acked.fetch_add(1, Ordering::Relaxed);
        self.inner.release(self.permit.take());
    }

    fn nack(mut self: Box<Self>) {
        if let Some(message) = self.message.take() {
            self.inner.stats.nacked.fetch_add(1, Ordering::Relaxed);
            self.inner.requeue(message, self.permit.take());
        }
    }
}

impl Drop for MemoryAckHandle {
    fn drop(&mut self) {
        // Unsettled: behave like an expired ack deadline.
        if let Some(message) = self.message.take() {
            self.inner.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            self.inner.requeue(message, self.permit.take());
        }
    }
}

#[async_trait]
impl MessageSource for InMemorySubscription {
    async fn consume(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        settings: ReceiveSettings,
        cancel: CancellationToken,
    ) -> Result<(), SourceError> {
        let max_outstanding = settings.max_outstanding.max(1);
        let outstanding = Arc::new(Semaphore::new(max_outstanding));
        let concurrency = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
        let inner = &self.inner;

        loop {
            if let Some(reason) = inner.take_fault() {
                return Err(SourceError::Delivery(reason));
            }

            let slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                permit = Arc::clone(&outstanding).acquire_owned() => permit,
            };
            let Ok(slot) = slot else {
                return Ok(());
            };

            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut backlog = inner.backlog();
                let next = backlog.pop_front();
                if next.is_none() {
                    drop(slot);
                    if outstanding.available_permits() == max_outstanding {
                        debug!(subscription = %inner.name, "subscription drained");
                        return Ok(());
                    }
                    None
                } else {
                    next.map(|message| (message, slot))
                }
            };

            let Some((message, slot)) = next else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    _ = &mut notified => {}
                }
                continue;
            };

            let worker = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    inner.requeue(message, Some(slot));
                    return Ok(());
                }
                permit = Arc::clone(&concurrency).acquire_owned() => permit,
            };
            let Ok(worker) = worker else {
                inner.requeue(message, Some(slot));
                return Ok(());
            };

            inner.stats.delivered.fetch_add(1, Ordering::Relaxed);
            let handle = MemoryAckHandle {
                inner: Arc::clone(inner),
                message: Some(message.clone()),
                permit: Some(slot),
            };
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                handler.on_message(InFlightMessage::new(message, Box::new(handle)));
                drop(worker);
            });
        }
    }
}

/// Failure injected into a specific publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFault {
    /// The call resolves with [`SinkError::Rejected`].
    Fail,
    /// The call never resolves.
    Stall,
}

/// Published messages a topic keeps for inspection unless told otherwise.
pub const DEFAULT_TOPIC_RETENTION: usize = 1024;

/// In-memory topic fanning published messages out to its subscriptions.
///
/// Only the most recent `retention` published messages are kept.
#[derive(Debug)]
pub struct InMemoryTopic {
    name: String,
    subscriptions: RwLock<Vec<InMemorySubscription>>,
    retention: usize,
    published: Mutex<VecDeque<Message>>,
    published_count: AtomicU64,
    publish_calls: AtomicU64,
    faults: Mutex<HashMap<u64, PublishFault>>,
    reject_all: AtomicBool,
}

impl InMemoryTopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_retention(name, DEFAULT_TOPIC_RETENTION)
    }

    /// Topic keeping at most `retention` published messages; `0` keeps none.
    pub fn with_retention(name: impl Into<String>, retention: usize) -> Self {
        Self {
            name: name.into(),
            subscriptions: RwLock::new(Vec::new()),
            retention,
            published: Mutex::new(VecDeque::new()),
            published_count: AtomicU64::new(0),
            publish_calls: AtomicU64::new(0),
            faults: Mutex::new(HashMap::new()),
            reject_all: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Routes future publishes to `subscription` as well.
    pub fn attach(&self, subscription: InMemorySubscription) {
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(subscription);
    }

    /// Injects `fault` into the `call`-th publish (1-based) on this topic.
    pub fn set_publish_fault(&self, call: u64, fault: PublishFault) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(call, fault);
    }

    /// If enabled, every publish is rejected.
    pub fn set_reject_all(&self, reject_all: bool) {
        self.reject_all.store(reject_all, Ordering::Relaxed);
    }

    /// Total publish calls received, including failed ones.
    pub fn publish_calls(&self) -> u64 {
        self.publish_calls.load(Ordering::Relaxed)
    }

    /// Most recent accepted messages, oldest first.
    pub fn published(&self) -> Vec<Message> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Messages accepted over the topic's lifetime.
    pub fn published_count(&self) -> u64 {
        self.published_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageSink for InMemoryTopic {
    async fn exists(&self) -> Result<bool, SinkError> {
        Ok(true)
    }

    async fn publish(&self, message: Message) -> Result<MessageId, SinkError> {
        let call = self.publish_calls.fetch_add(1, Ordering::Relaxed) + 1;
        let fault = self
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&call)
            .copied();
        match fault {
            Some(PublishFault::Stall) => std::future::pending::<()>().await,
            Some(PublishFault::Fail) => {
                return Err(SinkError::Rejected(format!("injected failure on call {call}")));
            }
            None => {}
        }
        if self.reject_all.load(Ordering::Relaxed) {
            return Err(SinkError::Rejected("topic rejects all publishes".to_string()));
        }

        for subscription in self
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            subscription.enqueue(message.clone());
        }
        let id = self.published_count.fetch_add(1, Ordering::Relaxed) + 1;
        if self.retention > 0 {
            let mut published = self.published.lock().unwrap_or_else(|e| e.into_inner());
            if published.len() == self.retention {
                published.pop_front();
            }
            published.push_back(message);
        }
        Ok(format!("{}-{id}", self.name))
    }
}

/// Topic handle returned for names the broker does not know.
#[derive(Debug)]
struct MissingTopic {
    name: String,
}

#[async_trait]
impl MessageSink for MissingTopic {
    async fn exists(&self) -> Result<bool, SinkError> {
        Ok(false)
    }

    async fn publish(&self, _message: Message) -> Result<MessageId, SinkError> {
        Err(SinkError::NotFound(self.name.clone()))
    }
}

/// In-memory broker keyed by resource short names.
#[derive(Debug)]
pub struct InMemoryBroker {
    topics: RwLock<HashMap<String, Arc<InMemoryTopic>>>,
    subscriptions: RwLock<HashMap<String, InMemorySubscription>>,
    topic_retention: usize,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_topic_retention(DEFAULT_TOPIC_RETENTION)
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker whose topics keep at most `retention` published messages each.
    pub fn with_topic_retention(retention: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            topic_retention: retention,
        }
    }

    /// Creates a topic, or returns the existing one with the same name.
    pub fn create_topic(&self, name: &str) -> Arc<InMemoryTopic> {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            topics
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(InMemoryTopic::with_retention(name, self.topic_retention))
                }),
        )
    }

    /// Creates a subscription attached to an existing topic.
    pub fn create_subscription(
        &self,
        name: &str,
        topic: &str,
    ) -> Result<InMemorySubscription, BrokerError> {
        let topic = self
            .topic(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if subscriptions.contains_key(name) {
            return Err(BrokerError::AlreadyExists(name.to_string()));
        }
        let subscription = InMemorySubscription::new(name);
        topic.attach(subscription.clone());
        subscriptions.insert(name.to_string(), subscription.clone());
        Ok(subscription)
    }

    pub fn topic(&self, name: &str) -> Option<Arc<InMemoryTopic>> {
        self.topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn subscription(&self, name: &str) -> Option<InMemorySubscription> {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}

impl Broker for InMemoryBroker {
    fn source(&self, name: &ResourceName) -> Result<Arc<dyn MessageSource>, BrokerError> {
        self.subscription(name.short_name())
            .map(|sub| Arc::new(sub) as Arc<dyn MessageSource>)
            .ok_or_else(|| BrokerError::UnknownSubscription(name.to_string()))
    }

    fn sink(&self, name: &ResourceName) -> Arc<dyn MessageSink> {
        match self.topic(name.short_name()) {
            Some(topic) => topic as Arc<dyn MessageSink>,
            None => Arc::new(MissingTopic {
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{InMemoryBroker, InMemorySubscription, InMemoryTopic, PublishFault};
    use crate::broker::{Broker, BrokerError};
    use crate::sink::{MessageSink, SinkError};
    use crate::source::{InFlightMessage, MessageSource, ReceiveSettings, SourceError};
    use shovel_core::{Message, ResourceKind, ResourceName};
    use tokio_util::sync::CancellationToken;

    fn seeded(count: usize) -> InMemorySubscription {
        let sub = InMemorySubscription::new("sub");
        for i in 0..count {
            sub.enqueue(Message::new(format!("m{i}").into_bytes()));
        }
        sub
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn consume_ends_when_all_messages_are_acked() {
        let sub = seeded(5);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = Arc::clone(&seen);
        let handler = Arc::new(move |m: InFlightMessage| {
            seen_in_handler.fetch_add(1, Ordering::SeqCst);
            m.ack();
        });

        tokio::time::timeout(
            Duration::from_secs(2),
            sub.consume(handler, ReceiveSettings::default(), CancellationToken::new()),
        )
        .await
        .expect("consume should finish on its own")
        .expect("consume should succeed");

        let stats = sub.stats();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(stats.delivered, 5);
        assert_eq!(stats.acked, 5);
        assert_eq!(stats.backlog, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nacked_messages_are_redelivered() {
        let sub = seeded(1);
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_in_handler = Arc::clone(&attempts);
        let handler = Arc::new(move |m: InFlightMessage| {
            if attempts_in_handler.fetch_add(1, Ordering::SeqCst) == 0 {
                m.nack();
            } else {
                m.ack();
            }
        });

        tokio::time::timeout(
            Duration::from_secs(2),
            sub.consume(handler, ReceiveSettings::default(), CancellationToken::new()),
        )
        .await
        .expect("consume should finish")
        .expect("consume should succeed");

        let stats = sub.stats();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(stats.nacked, 1);
        assert_eq!(stats.acked, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_handles_count_as_abandoned() {
        let sub = seeded(2);
        let held = Arc::new(Mutex::new(Vec::new()));
        let held_in_handler = Arc::clone(&held);
        let handler = Arc::new(move |m: InFlightMessage| {
            held_in_handler
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(m);
        });
        let cancel = CancellationToken::new();
        let consume = {
            let sub = sub.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                sub.consume(handler, ReceiveSettings::default(), cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sub.stats().delivered, 2);
        cancel.cancel();
        consume
            .await
            .expect("consume task should join")
            .expect("cancelled consume is not an error");

        held.lock().unwrap_or_else(|e| e.into_inner()).clear();
        let stats = sub.stats();
        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.backlog, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn injected_failure_stops_consume() {
        let sub = seeded(1);
        let held = Arc::new(Mutex::new(Vec::new()));
        let held_in_handler = Arc::clone(&held);
        let handler = Arc::new(move |m: InFlightMessage| {
            held_in_handler
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(m);
        });
        let consume = {
            let sub = sub.clone();
            tokio::spawn(async move {
                sub.consume(handler, ReceiveSettings::default(), CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        sub.inject_delivery_failure("stream reset");

        let err = tokio::time::timeout(Duration::from_secs(2), consume)
            .await
            .expect("consume should stop")
            .expect("consume task should join")
            .expect_err("fault should surface");
        assert_eq!(err, SourceError::Delivery("stream reset".to_string()));
        assert_eq!(held.lock().unwrap_or_else(|e| e.into_inner()).len(), 1);
    }

    #[tokio::test]
    async fn topic_faults_apply_to_specific_calls() {
        let topic = InMemoryTopic::new("t");
        topic.set_publish_fault(2, PublishFault::Fail);

        assert!(topic.publish(Message::new(vec![1])).await.is_ok());
        assert!(matches!(
            topic.publish(Message::new(vec![2])).await,
            Err(SinkError::Rejected(_))
        ));
        assert!(topic.publish(Message::new(vec![3])).await.is_ok());
        assert_eq!(topic.publish_calls(), 3);
        assert_eq!(topic.published().len(), 2);

        topic.set_publish_fault(4, PublishFault::Stall);
        let stalled =
            tokio::time::timeout(Duration::from_millis(50), topic.publish(Message::new(vec![4])))
                .await;
        assert!(stalled.is_err());
    }

    #[tokio::test]
    async fn topic_keeps_only_recent_messages() {
        let topic = InMemoryTopic::with_retention("t", 2);
        for i in 0..5u8 {
            let id = topic.publish(Message::new(vec![i])).await.expect("publish");
            assert_eq!(id, format!("t-{}", i + 1));
        }

        let kept: Vec<Vec<u8>> = topic.published().into_iter().map(|m| m.data).collect();
        assert_eq!(kept, vec![vec![3], vec![4]]);
        assert_eq!(topic.published_count(), 5);

        let broker = InMemoryBroker::with_topic_retention(0);
        let silent = broker.create_topic("silent");
        silent.publish(Message::new(vec![9])).await.expect("publish");
        assert!(silent.published().is_empty());
        assert_eq!(silent.published_count(), 1);
    }

    #[tokio::test]
    async fn broker_resolves_known_names_only() {
        let broker = InMemoryBroker::new();
        let topic = broker.create_topic("target");
        broker
            .create_subscription("source", "target")
            .expect("subscription should be created");
        assert_eq!(
            broker.create_subscription("other", "missing").err(),
            Some(BrokerError::UnknownTopic("missing".to_string()))
        );

        let sub_name = ResourceName::parse("projects/p/subscriptions/source", ResourceKind::Subscription)
            .expect("parse");
        assert!(broker.source(&sub_name).is_ok());
        let missing_sub = ResourceName::parse("nope", ResourceKind::Subscription).expect("parse");
        assert!(broker.source(&missing_sub).is_err());

        let topic_name = ResourceName::parse("projects/p/topics/target", ResourceKind::Topic)
            .expect("parse");
        assert!(broker.sink(&topic_name).exists().await.expect("exists"));
        let missing_topic = ResourceName::parse("ghost", ResourceKind::Topic).expect("parse");
        assert!(!broker.sink(&missing_topic).exists().await.expect("exists"));

        broker
            .sink(&topic_name)
            .publish(Message::new(b"fanout".to_vec()))
            .await
            .expect("publish");
        assert_eq!(topic.published().len(), 1);
        let sub = broker.subscription("source").expect("subscription exists");
        assert_eq!(sub.backlog_len(), 1);
    }
}
