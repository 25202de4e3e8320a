use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use rand::Rng;
use serde_json::json;
use shovel_core::Message;
use shovel_transport::{MessageSink, SinkError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::api::GenerateResponse;

const GENERATOR_SOURCE: &str = "shovel-generator";
const GENERATOR_WORKERS: u32 = 10;

/// Builds one synthetic JSON test message.
pub fn test_message(number: u32, batch_id: &str, project: &str) -> Message {
    let now = SystemTime::now();
    let timestamp = humantime_serde::re::humantime::format_rfc3339_millis(now).to_string();
    let millis = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let body = json!({
        "messageId": format!("test-msg-{number}-{millis}"),
        "timestamp": timestamp,
        "data": format!("Test message {number} generated by {GENERATOR_SOURCE}"),
        "source": GENERATOR_SOURCE,
        "version": "1.0",
        "metadata": {
            "batchId": batch_id,
            "projectId": project,
            "environment": "testing",
            "messageNumber": number,
            "generatedAt": timestamp,
            "randomValue": rand::thread_rng().gen_range(0..10_000),
        },
    });
    Message::new(body.to_string())
        .with_attribute("source", GENERATOR_SOURCE)
        .with_attribute("batchId", batch_id)
}

/// Publishes `count` test messages to `sink` from a small worker pool.
///
/// Individual publish failures are logged and counted, not returned.
pub async fn publish_batch(
    sink: Arc<dyn MessageSink>,
    project: &str,
    count: u32,
) -> GenerateResponse {
    let batch_id = uuid::Uuid::new_v4().to_string();
    let next = Arc::new(AtomicU32::new(1));
    let published = Arc::new(AtomicU32::new(0));
    let mut workers = JoinSet::new();

    for _ in 0..GENERATOR_WORKERS.min(count.max(1)) {
        let sink = Arc::clone(&sink);
        let next = Arc::clone(&next);
        let published = Arc::clone(&published);
        let batch_id = batch_id.clone();
        let project = project.to_string();
        workers.spawn(async move {
            loop {
                let number = next.fetch_add(1, Ordering::Relaxed);
                if number > count {
                    break;
                }
                match sink.publish(test_message(number, &batch_id, &project)).await {
                    Ok(id) => {
                        published.fetch_add(1, Ordering::Relaxed);
                        debug!(message_id = %id, number, "test message published");
                    }
                    Err(SinkError::NotFound(topic)) => {
                        warn!(topic = %topic, "generator target disappeared");
                        break;
                    }
                    Err(err) => warn!(number, error = %err, "failed to publish test message"),
                }
            }
        });
    }
    while workers.join_next().await.is_some() {}

    let published = published.load(Ordering::Relaxed);
    info!(batch = %batch_id, requested = count, published, "test batch published");
    GenerateResponse {
        batch_id,
        requested: count,
        published,
    }
}
