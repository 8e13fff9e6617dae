//! Admin API for session management and batch dispatch
//!
//! Endpoints:
//! - GET    /health: pool health summary (unauthenticated)
//! - GET    /metrics: Prometheus exposition (unauthenticated)
//! - GET    /admin/resources: list sessions with status and stats
//! - POST   /admin/resources: register a session and persist it
//! - GET    /admin/resources/{id}: one session's snapshot
//! - DELETE /admin/resources/{id}: evict a session and drop it from the store
//! - POST   /admin/resources/{id}/reactivate: return a suspended session to service
//! - GET    /admin/pool: pool status summary
//! - POST   /admin/dispatch: run a batch of HTTP requests over the pool
//!
//! When an admin token is configured every `/admin` route requires
//! `Authorization: Bearer <token>`. Session headers are never returned.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use common::Secret;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use session_pool::{Dispatcher, Outcome, ResourcePool};
use tracing::{error, info, warn};

use crate::error::Error;
use crate::http_operation::{HttpRequestOperation, HttpResponse, RequestTarget};
use crate::session::{self, SessionState};
use crate::session_store::{SessionRecord, SessionStore};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AdminState {
    dispatcher: Arc<Dispatcher<SessionState>>,
    operation: Arc<HttpRequestOperation>,
    store: Arc<SessionStore>,
    prometheus: PrometheusHandle,
    token: Option<Arc<Secret<String>>>,
    started_at: Instant,
}

impl AdminState {
    pub fn new(
        dispatcher: Arc<Dispatcher<SessionState>>,
        operation: Arc<HttpRequestOperation>,
        store: Arc<SessionStore>,
        prometheus: PrometheusHandle,
        token: Option<Secret<String>>,
    ) -> Self {
        Self {
            dispatcher,
            operation,
            store,
            prometheus,
            token: token.map(Arc::new),
            started_at: Instant::now(),
        }
    }

    fn pool(&self) -> &ResourcePool<SessionState> {
        self.dispatcher.pool()
    }
}

/// Build the router with all routes and shared state.
///
/// A concurrency limit layer bounds in-flight requests at `max_connections`.
pub fn build_router(state: AdminState, max_connections: usize) -> Router {
    let admin = Router::new()
        .route("/admin/resources", get(list_resources).post(add_resource))
        .route(
            "/admin/resources/{id}",
            get(get_resource).delete(delete_resource),
        )
        .route("/admin/resources/{id}/reactivate", post(reactivate_resource))
        .route("/admin/pool", get(pool_status))
        .route("/admin/dispatch", post(dispatch_batch))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(admin)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    json_response(status, json!({ "error": message.into() }))
}

/// Reject admin requests without the configured bearer token.
async fn require_token(State(state): State<AdminState>, request: Request, next: Next) -> Response {
    let Some(expected) = &state.token else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| expected.matches(token));

    if authorized {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "rejected admin request without valid token");
        error_response(StatusCode::UNAUTHORIZED, "missing or invalid bearer token")
    }
}

/// GET /health: pool health with uptime.
///
/// Returns 503 only when no session is active.
async fn health_handler(State(state): State<AdminState>) -> Response {
    let mut body = state.pool().health().await;
    let unhealthy = body["status"] == "unhealthy";
    body["uptime_seconds"] = json!(state.started_at.elapsed().as_secs());

    let status = if unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    json_response(status, body)
}

/// GET /metrics: Prometheus text exposition format.
async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

/// GET /admin/resources
async fn list_resources(State(state): State<AdminState>) -> Response {
    let resources = state.pool().snapshots().await;
    json_response(StatusCode::OK, json!({ "resources": resources }))
}

/// Request body for registering a session.
#[derive(Deserialize)]
struct AddResourceRequest {
    id: String,
    #[serde(flatten)]
    record: SessionRecord,
}

/// POST /admin/resources: register in the pool, then persist.
///
/// If persisting fails the session is evicted again so pool and store agree.
async fn add_resource(
    State(state): State<AdminState>,
    body: Result<axum::Json<AddResourceRequest>, JsonRejection>,
) -> Response {
    let axum::Json(body) = match body {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.body_text()),
    };

    match session::register(state.pool(), &body.id, &body.record).await {
        Ok(()) => {}
        Err(Error::Pool(session_pool::Error::DuplicateResource(id))) => {
            return error_response(
                StatusCode::CONFLICT,
                format!("resource already registered: {id}"),
            );
        }
        Err(e @ Error::InvalidSession { .. }) => {
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
        Err(e) => {
            error!(session_id = %body.id, error = %e, "session registration failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    }

    if let Err(e) = state.store.add(body.id.clone(), body.record).await {
        error!(session_id = %body.id, error = %e, "failed to persist session, rolling back");
        if let Err(evict_err) = state.pool().evict(&body.id).await {
            warn!(session_id = %body.id, error = %evict_err, "rollback eviction failed");
        }
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to persist session: {e}"),
        );
    }

    match state.pool().snapshot(&body.id).await {
        Ok(snapshot) => json_response(StatusCode::CREATED, json!(snapshot)),
        // Evicted concurrently between register and snapshot
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// GET /admin/resources/{id}
async fn get_resource(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    match state.pool().snapshot(&id).await {
        Ok(snapshot) => json_response(StatusCode::OK, json!(snapshot)),
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// DELETE /admin/resources/{id}: evict from the pool and the store.
async fn delete_resource(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    if let Err(e) = state.pool().evict(&id).await {
        return error_response(StatusCode::NOT_FOUND, e.to_string());
    }

    if let Err(e) = state.store.remove(&id).await {
        warn!(session_id = %id, error = %e, "session file update failed (already evicted from pool)");
    }

    info!(session_id = %id, "session removed");
    json_response(
        StatusCode::OK,
        json!({ "resource_id": id, "status": "removed" }),
    )
}

/// POST /admin/resources/{id}/reactivate
async fn reactivate_resource(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = state.pool().reactivate(&id).await {
        return error_response(StatusCode::NOT_FOUND, e.to_string());
    }
    match state.pool().snapshot(&id).await {
        Ok(snapshot) => json_response(StatusCode::OK, json!(snapshot)),
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// GET /admin/pool
async fn pool_status(State(state): State<AdminState>) -> Response {
    let health = state.pool().health().await;
    let parallelism = state.dispatcher.parallelism();
    let mut body = health;
    body["parallelism"] = json!(parallelism);
    json_response(StatusCode::OK, body)
}

/// Request body for a dispatch batch.
#[derive(Deserialize)]
struct DispatchRequest {
    targets: Vec<RequestTarget>,
}

/// POST /admin/dispatch: run one request per target across the pool.
///
/// Job failures are reported per outcome and never fail the batch. The batch
/// itself fails with 503 only when no session is active at snapshot time.
async fn dispatch_batch(
    State(state): State<AdminState>,
    body: Result<axum::Json<DispatchRequest>, JsonRejection>,
) -> Response {
    let axum::Json(body) = match body {
        Ok(b) => b,
        Err(e) => {
            crate::metrics::record_batch("rejected", 0);
            return error_response(StatusCode::BAD_REQUEST, e.body_text());
        }
    };

    if body.targets.is_empty() {
        crate::metrics::record_batch("rejected", 0);
        return error_response(StatusCode::BAD_REQUEST, "targets must not be empty");
    }
    for (i, target) in body.targets.iter().enumerate() {
        if let Err(reason) = target.validate() {
            crate::metrics::record_batch("rejected", body.targets.len());
            return error_response(StatusCode::BAD_REQUEST, format!("target {i}: {reason}"));
        }
    }

    let batch_id = format!("batch_{}", uuid::Uuid::new_v4().as_simple());
    let total = body.targets.len();
    let started = Instant::now();

    let outcomes = match state
        .dispatcher
        .dispatch(state.operation.clone(), body.targets)
        .await
    {
        Ok(outcomes) => outcomes,
        Err(session_pool::Error::NoResourceAvailable) => {
            crate::metrics::record_batch("no_resource", total);
            warn!(batch_id = %batch_id, targets = total, "batch refused, no active sessions");
            return json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "error": "no resource available for dispatch",
                    "batch_id": batch_id,
                    "pool": state.pool().health().await,
                }),
            );
        }
        Err(e) => {
            crate::metrics::record_batch("error", total);
            error!(batch_id = %batch_id, error = %e, "batch dispatch failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    crate::metrics::record_batch("dispatched", total);
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    let failed = outcomes.len() - succeeded;
    info!(
        batch_id = %batch_id,
        targets = total,
        succeeded,
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "batch complete"
    );

    json_response(
        StatusCode::OK,
        json!({
            "batch_id": batch_id,
            "total": total,
            "succeeded": succeeded,
            "failed": failed,
            "outcomes": outcomes.iter().map(outcome_json).collect::<Vec<_>>(),
        }),
    )
}

fn outcome_json(outcome: &Outcome<RequestTarget, HttpResponse>) -> serde_json::Value {
    match &outcome.result {
        Ok(response) => json!({
            "resource_id": outcome.resource_id,
            "target": outcome.target,
            "status": outcome.status(),
            "response": response,
        }),
        Err(failure) => json!({
            "resource_id": outcome.resource_id,
            "target": outcome.target,
            "status": outcome.status(),
            "error": {
                "kind": failure.kind(),
                "message": failure.to_string(),
            },
        }),
    }
}
