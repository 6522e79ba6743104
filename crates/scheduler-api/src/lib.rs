//! HTTP ingress over the `Scheduler` facade: admission, tenant registration
//! and status, health, and both Prometheus and JSON metrics surfaces.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use once_cell::sync::Lazy;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};

use scheduler_backend::SimBackend;
use scheduler_common::config::SchedulerConfig;
use scheduler_common::SchedulerError;
use scheduler_core::{AdmitParams, AdmitResult, Scheduler, SystemClock, TenantConfig};

#[derive(Clone)]
pub struct AppState {
    scheduler: Arc<Scheduler>,
}

static ENCODER: Lazy<TextEncoder> = Lazy::new(TextEncoder::new);

/// Bootstraps the default tenants (`tenant_a`/`tenant_b`/`tenant_c`), the
/// reference simulated backend, and the dispatcher thread, then returns the
/// routed app. Mirrors the reference workspace's `app()` wiring its mock
/// backend and scheduler at construction time.
pub fn app() -> Router {
    let config = SchedulerConfig::load();
    let backend = Arc::new(
        SimBackend::new(
            config.prefill_throughput_tps,
            config.decode_throughput_tps,
            config.decode_batch_saturation,
            config.max_kv_cache_tokens,
        )
        .expect("backend configuration must be valid"),
    );
    let clock = Arc::new(SystemClock::new());
    let scheduler = Arc::new(Scheduler::new(config, backend, clock));

    for (tenant_id, rate_limit, burst_cap) in [("tenant_a", 500.0, 5000), ("tenant_b", 300.0, 3000), ("tenant_c", 1000.0, 10000)] {
        scheduler
            .register_tenant(TenantConfig::new(tenant_id, rate_limit, burst_cap).unwrap())
            .expect("default tenant bootstrap must not collide");
    }

    scheduler_obs::init();
    let polling_handle = scheduler.clone();
    scheduler_obs::spawn_metrics_polling(polling_handle, std::time::Duration::from_secs(2));

    let on_fatal: Arc<dyn Fn(&SchedulerError) + Send + Sync> = Arc::new(|err| {
        tracing::error!(%err, "dispatcher halted on a fatal backend error");
    });
    scheduler.start_dispatcher(on_fatal);

    let state = AppState { scheduler };

    Router::new()
        .route("/admit", post(admit))
        .route("/tenants/register", post(register_tenant))
        .route("/tenants/:tenant_id/status", get(tenant_status))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/metrics/snapshot", get(metrics_snapshot))
        .route("/openapi.json", get(openapi))
        .with_state(state)
}

#[derive(Deserialize)]
struct AdmitRequest {
    tenant_id: String,
    prompt_tokens: u64,
    output_tokens_expected: Option<u64>,
    priority_bid: Option<u64>,
}

async fn admit(State(state): State<AppState>, Json(req): Json<AdmitRequest>) -> impl IntoResponse {
    let result = state.scheduler.admit(AdmitParams {
        request_id: None,
        tenant_id: req.tenant_id,
        prompt_tokens: req.prompt_tokens,
        output_tokens_expected: req.output_tokens_expected,
        priority_bid: req.priority_bid,
    });

    let status = match &result {
        AdmitResult::Queued { .. } => StatusCode::OK,
        AdmitResult::Rejected { .. } => StatusCode::OK,
        AdmitResult::UnknownTenant => StatusCode::NOT_FOUND,
        AdmitResult::InvalidRequest { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(AdmitResponse::from(result)))
}

#[derive(Serialize)]
#[serde(tag = "status")]
enum AdmitResponse {
    #[serde(rename = "queued")]
    Queued { request_id: String, queue_position: usize, estimated_wait_ms: u64 },
    #[serde(rename = "rejected")]
    Rejected { request_id: String, reason: String },
    #[serde(rename = "unknown_tenant")]
    UnknownTenant,
    #[serde(rename = "invalid_request")]
    InvalidRequest { reason: String },
}

impl From<AdmitResult> for AdmitResponse {
    fn from(result: AdmitResult) -> Self {
        match result {
            AdmitResult::Queued { request_id, queue_position, estimated_wait_ms } => {
                AdmitResponse::Queued { request_id, queue_position, estimated_wait_ms }
            }
            AdmitResult::Rejected { request_id, reason } => AdmitResponse::Rejected { request_id, reason },
            AdmitResult::UnknownTenant => AdmitResponse::UnknownTenant,
            AdmitResult::InvalidRequest { reason } => AdmitResponse::InvalidRequest { reason },
        }
    }
}

#[derive(Deserialize)]
struct RegisterTenantRequest {
    tenant_id: String,
    rate_limit: f64,
    burst_cap: u64,
}

async fn register_tenant(State(state): State<AppState>, Json(req): Json<RegisterTenantRequest>) -> impl IntoResponse {
    let config = match TenantConfig::new(req.tenant_id, req.rate_limit, req.burst_cap) {
        Ok(config) => config,
        Err(err) => return (StatusCode::UNPROCESSABLE_ENTITY, Json(serde_json::json!({ "error": err.to_string() }))),
    };
    match state.scheduler.register_tenant(config) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "registered" }))),
        Err(SchedulerError::AlreadyExists(tenant_id)) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": format!("tenant already registered: {tenant_id}") })),
        ),
        Err(err) => (StatusCode::UNPROCESSABLE_ENTITY, Json(serde_json::json!({ "error": err.to_string() }))),
    }
}

async fn tenant_status(State(state): State<AppState>, Path(tenant_id): Path<String>) -> impl IntoResponse {
    match state.scheduler.tenant_status(&tenant_id) {
        Some(status) => (StatusCode::OK, Json(serde_json::to_value(status).unwrap_or_default())).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.scheduler.health();
    Json(serde_json::json!({
        "queue_size": report.queue_size,
        "total_requests": report.total_requests,
        "accepted": report.accepted,
        "rejected": report.rejected,
        "rejection_rate": report.rejection_rate,
        "kv_cache_used": report.backend_stats.kv_cache_used,
        "kv_cache_capacity": report.backend_stats.kv_cache_capacity,
        "batches_processed": report.backend_stats.batches_processed,
    }))
}

async fn metrics() -> impl IntoResponse {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    ENCODER.encode(&metric_families, &mut buffer).unwrap();
    ([("content-type", ENCODER.format_type().to_string())], buffer)
}

async fn metrics_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.scheduler.metrics_snapshot();
    Json(serde_json::json!({
        "total_output_tokens": snapshot.total_output_tokens,
        "throughput_tps": snapshot.throughput_tps,
        "gpu_utilization": snapshot.gpu_utilization,
        "cost_per_token_usd": snapshot.cost_per_token_usd,
        "cost_per_million_tokens_usd": snapshot.cost_per_million_tokens_usd,
        "jains_fairness_index": snapshot.jains_fairness_index,
    }))
}

async fn openapi() -> impl IntoResponse {
    Json(serde_json::json!({
        "openapi": "3.0.0",
        "info": { "title": "Admission Scheduler API", "version": "0.1.0" },
        "paths": {
            "/admit": { "post": { "summary": "Submit a request for admission" } },
            "/tenants/register": { "post": { "summary": "Register a tenant's rate-limit policy" } },
            "/tenants/{tenant_id}/status": { "get": { "summary": "Token bucket status for a tenant" } },
            "/health": { "get": { "summary": "Queue depth, admission, and backend counters" } },
            "/metrics": { "get": { "summary": "Prometheus text exposition" } },
            "/metrics/snapshot": { "get": { "summary": "Throughput, utilization, cost, and fairness as JSON" } }
        }
    }))
}
