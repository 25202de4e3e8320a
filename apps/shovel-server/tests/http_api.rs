use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use shovel_core::Message;
use shovel_relay::RelayRuntimeConfig;
use shovel_server::api::{ShovelResponse, ACCEPTED_MESSAGE};
use shovel_server::{build_router, AppState, JobRegistry, LogBuffer};
use shovel_transport::memory::InMemoryBroker;
use tower::ServiceExt;

struct Harness {
    broker: Arc<InMemoryBroker>,
    router: Router,
}

fn harness() -> Harness {
    let broker = Arc::new(InMemoryBroker::new());
    broker.create_topic("orders");
    broker.create_topic("orders-replay");
    broker
        .create_subscription("orders-dlq", "orders")
        .expect("subscription");
    let jobs = JobRegistry::new(
        broker.clone(),
        RelayRuntimeConfig {
            bounded_timeout: Duration::from_secs(5),
            unbounded_timeout: Duration::from_secs(5),
            grace_period: Duration::from_millis(200),
            ..RelayRuntimeConfig::default()
        },
    );
    let router = build_router(AppState {
        jobs,
        logs: Arc::new(LogBuffer::new(64)),
    });
    Harness { broker, router }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn wait_for_completion(router: &Router, request_id: &str) -> Value {
    for _ in 0..100 {
        let (status, body) = send(router, Method::GET, &format!("/jobs/{request_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        if body["state"] == "completed" || body["state"] == "failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {request_id} did not finish");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shovel_request_is_accepted_and_completes() {
    let h = harness();
    let subscription = h.broker.subscription("orders-dlq").expect("subscription");
    for i in 0..4 {
        subscription.enqueue(Message::new(format!("order-{i}")).with_attribute("seq", i.to_string()));
    }

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/shovel",
        Some(json!({
            "numMessages": 3,
            "sourceSubscription": "projects/acme/subscriptions/orders-dlq",
            "targetTopic": "projects/acme/topics/orders-replay",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let response: ShovelResponse = serde_json::from_value(body).unwrap();
    assert_eq!(response.status, "accepted");
    assert_eq!(response.message, ACCEPTED_MESSAGE);
    let request_id = response.request_id.expect("request id");
    assert!(request_id.starts_with("shovel-"));

    let job = wait_for_completion(&h.router, &request_id).await;
    assert_eq!(job["state"], "completed");
    assert_eq!(job["report"]["result"]["accepted"], 3);
    assert_eq!(job["report"]["result"]["published"], 3);
    assert_eq!(job["report"]["termination"]["reason"], "target_reached");
    assert_eq!(job["targetTopic"], "projects/acme/topics/orders-replay");

    let replay = h.broker.topic("orders-replay").expect("topic");
    assert_eq!(replay.published().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn root_path_accepts_drain_requests() {
    let h = harness();
    let subscription = h.broker.subscription("orders-dlq").expect("subscription");
    for i in 0..5 {
        subscription.enqueue(Message::new(format!("order-{i}")));
    }

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/",
        Some(json!({
            "allMessages": true,
            "sourceSubscription": "orders-dlq",
            "targetTopic": "orders-replay",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let request_id = body["requestId"].as_str().expect("request id").to_string();
    let job = wait_for_completion(&h.router, &request_id).await;
    assert_eq!(job["report"]["result"]["published"], 5);
    assert_eq!(job["report"]["termination"]["reason"], "source_exhausted");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn validation_errors_are_reported() {
    let h = harness();
    let cases = vec![
        (
            json!({"numMessages": 1, "targetTopic": "orders-replay"}),
            "sourceSubscription is required",
        ),
        (
            json!({"numMessages": 1, "sourceSubscription": "orders-dlq"}),
            "targetTopic is required",
        ),
        (
            json!({"sourceSubscription": "orders-dlq", "targetTopic": "orders-replay"}),
            "numMessages must be greater than 0 when allMessages is false",
        ),
        (
            json!({
                "numMessages": 2,
                "allMessages": true,
                "sourceSubscription": "orders-dlq",
                "targetTopic": "orders-replay",
            }),
            "cannot specify both allMessages=true and numMessages > 0",
        ),
    ];

    for (payload, expected) in cases {
        let (status, body) = send(&h.router, Method::POST, "/shovel", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], expected);
    }
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let h = harness();
    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/shovel")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: ShovelResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(body.message.starts_with("Invalid JSON payload: "));
}

#[tokio::test]
async fn non_post_methods_are_rejected() {
    let h = harness();
    for method in [Method::GET, Method::PUT, Method::DELETE] {
        let (status, body) = send(&h.router, method, "/shovel", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["message"], "Only POST requests are allowed");
    }
}

#[tokio::test]
async fn preflight_carries_cors_headers() {
    let h = harness();
    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/shovel")
                .header("origin", "https://console.example.com")
                .header("access-control-request-method", "POST")
                .header("access-control-request-headers", "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(headers["access-control-allow-origin"], "*");
    let methods = headers["access-control-allow-methods"].to_str().unwrap();
    assert!(methods.contains("POST"));
    assert!(methods.contains("OPTIONS"));
    let allowed = headers["access-control-allow-headers"].to_str().unwrap();
    assert!(allowed.eq_ignore_ascii_case("content-type"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_target_topic_marks_job_failed() {
    let h = harness();
    let (status, body) = send(
        &h.router,
        Method::POST,
        "/shovel",
        Some(json!({
            "numMessages": 1,
            "sourceSubscription": "orders-dlq",
            "targetTopic": "projects/acme/topics/nowhere",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let request_id = body["requestId"].as_str().expect("request id").to_string();
    let job = wait_for_completion(&h.router, &request_id).await;
    assert_eq!(job["state"], "failed");
    assert_eq!(job["error"], "topic projects/acme/topics/nowhere does not exist");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generated_messages_land_in_subscription() {
    let h = harness();

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/generate",
        Some(json!({"targetTopic": "projects/acme/topics/orders", "count": 12})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requested"], 12);
    assert_eq!(body["published"], 12);
    let subscription = h.broker.subscription("orders-dlq").expect("subscription");
    assert_eq!(subscription.backlog_len(), 12);

    let (status, _) = send(
        &h.router,
        Method::POST,
        "/generate",
        Some(json!({"targetTopic": "ghost", "count": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/generate",
        Some(json!({"targetTopic": "orders", "count": 100_001})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "count must not exceed 100000");
    assert_eq!(subscription.backlog_len(), 12);
}
