use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use shovel_core::{ResourceKind, ResourceName, ShovelRequest};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::{
    GenerateRequest, LogsQuery, ShovelResponse, MAX_GENERATE_COUNT, METHOD_NOT_ALLOWED_MESSAGE,
};
use crate::generator::publish_batch;
use crate::jobs::JobRegistry;
use crate::logger::LogBuffer;

#[derive(Clone)]
pub struct AppState {
    pub jobs: JobRegistry,
    pub logs: Arc<LogBuffer>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", shovel_route())
        .route("/shovel", shovel_route())
        .route("/jobs/:request_id", get(job_status))
        .route("/generate", post(generate))
        .route("/logs", get(logs))
        .route("/health", get(health))
        .route("/healthz", get(health))
        .layer(cors_layer())
        .layer(middleware::from_fn(options_no_content))
        .with_state(state)
}

fn shovel_route() -> MethodRouter<AppState> {
    post(shovel).options(preflight).fallback(method_not_allowed)
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Answers every `OPTIONS` with 204, including preflights the CORS layer
/// short-circuits.
async fn options_no_content(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_options && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Binds `addr` and serves until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "shovel server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ShovelResponse::error(message))).into_response()
}

async fn shovel(State(state): State<AppState>, body: Bytes) -> Response {
    let request: ShovelRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "rejected malformed shovel request");
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid JSON payload: {err}"),
            );
        }
    };
    let spec = match request.into_spec() {
        Ok(spec) => spec,
        Err(err) => {
            warn!(error = %err, "rejected invalid shovel request");
            return error_response(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    let request_id = state.jobs.start(spec);
    (
        StatusCode::ACCEPTED,
        Json(ShovelResponse::accepted(request_id)),
    )
        .into_response()
}

async fn method_not_allowed() -> Response {
    let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED_MESSAGE);
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("POST, OPTIONS"));
    response
}

async fn job_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Response {
    match state.jobs.status(&request_id) {
        Some(status) => Json(status).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("job {request_id} not found"),
        ),
    }
}

async fn generate(State(state): State<AppState>, body: Bytes) -> Response {
    let request: GenerateRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid JSON payload: {err}"),
            );
        }
    };
    if request.count > MAX_GENERATE_COUNT {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("count must not exceed {MAX_GENERATE_COUNT}"),
        );
    }
    let topic = match ResourceName::parse(&request.target_topic, ResourceKind::Topic) {
        Ok(topic) => topic,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let sink = state.jobs.broker().sink(&topic);
    match sink.exists().await {
        Ok(true) => {}
        Ok(false) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("topic {topic} does not exist"),
            );
        }
        Err(err) => return error_response(StatusCode::BAD_GATEWAY, err.to_string()),
    }

    let response = publish_batch(sink, topic.project(), request.count).await;
    Json(response).into_response()
}

async fn logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let limit = query.limit.unwrap_or(200).min(1000);
    Json(state.logs.recent(query.job.as_deref(), limit)).into_response()
}

async fn health() -> &'static str {
    "ok"
}
