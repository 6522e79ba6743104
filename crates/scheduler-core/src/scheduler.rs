use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use scheduler_backend::{BackendStats, InferenceBackend};
use scheduler_common::{config::SchedulerConfig, Result, SchedulerError};

use crate::clock::Clock;
use crate::dispatcher::{Dispatcher, DispatcherHandle};
use crate::governor::HomeostaticGovernor;
use crate::metrics::MetricsAggregator;
use crate::metrics::MetricsSnapshot;
use crate::queue::{PriorityQueue, QueueEntry};
use crate::request::Request;
use crate::tenant::{AdmitDecision, TenantConfig, TenantRegistry, TenantStatus};

/// Input to `Scheduler::admit`; mirrors the ingress API's request body
/// one-to-one (`output_tokens_expected`/`priority_bid`/`request_id` are
/// optional with the documented defaults applied by `Request::new`).
#[derive(Debug, Clone)]
pub struct AdmitParams {
    pub request_id: Option<String>,
    pub tenant_id: String,
    pub prompt_tokens: u64,
    pub output_tokens_expected: Option<u64>,
    pub priority_bid: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdmitResult {
    Queued { request_id: String, queue_position: usize, estimated_wait_ms: u64 },
    Rejected { request_id: String, reason: String },
    UnknownTenant,
    InvalidRequest { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthReport {
    pub queue_size: usize,
    pub total_requests: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub rejection_rate: f64,
    pub backend_stats: BackendStats,
}

#[derive(Default)]
struct AdmissionStats {
    total_requests: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

/// Wires together the tenant registry, priority queue, governor, metrics
/// aggregator, and backend into the single programmatic surface the HTTP
/// layer (or anything else) drives. No process-wide singletons — callers
/// construct one `Scheduler` at startup and share a reference.
pub struct Scheduler {
    pub registry: Arc<TenantRegistry>,
    pub queue: Arc<PriorityQueue>,
    pub governor: Arc<HomeostaticGovernor>,
    pub metrics: Arc<MetricsAggregator>,
    pub backend: Arc<dyn InferenceBackend>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    stats: AdmissionStats,
    dispatcher: Mutex<Option<DispatcherHandle>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, backend: Arc<dyn InferenceBackend>, clock: Arc<dyn Clock>) -> Self {
        let registry = Arc::new(TenantRegistry::new(clock.clone()));
        let queue = Arc::new(PriorityQueue::new());
        let governor = Arc::new(HomeostaticGovernor::new(
            config.governor_window_size,
            config.base_batch_window_secs,
            config.entropy_critical_threshold,
        ));
        let metrics = Arc::new(MetricsAggregator::new(clock.clone(), config.cost_per_hour_usd));

        Self {
            registry,
            queue,
            governor,
            metrics,
            backend,
            clock,
            config,
            stats: AdmissionStats::default(),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn register_tenant(&self, config: TenantConfig) -> Result<()> {
        self.registry.register(config)
    }

    /// Starts the dispatcher thread. `on_fatal` runs (on the dispatcher
    /// thread) if the backend ever reports an internal error; callers in a
    /// real binary should terminate the process from this hook.
    pub fn start_dispatcher(&self, on_fatal: Arc<dyn Fn(&SchedulerError) + Send + Sync>) {
        let dispatcher = Dispatcher::new(
            self.queue.clone(),
            Some(self.governor.clone()),
            self.backend.clone(),
            self.metrics.clone(),
            self.clock.clone(),
            self.config.max_batch_size,
            self.config.base_batch_window_secs,
        );
        let handle = dispatcher.spawn(on_fatal);
        *self.dispatcher.lock().unwrap() = Some(handle);
    }

    /// Finishes the in-flight batch, then stops the dispatcher thread.
    pub fn shutdown(&self) {
        if let Some(handle) = self.dispatcher.lock().unwrap().take() {
            handle.shutdown();
        }
    }

    /// The gatekeeper. Records an arrival attempt with the governor
    /// regardless of the outcome (see DESIGN.md for why), then validates,
    /// consults the tenant's token bucket, and — only on acceptance —
    /// pushes onto the priority queue.
    pub fn admit(&self, params: AdmitParams) -> AdmitResult {
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        self.governor.record_arrival(now);

        let request = match Request::new(
            params.request_id,
            params.tenant_id,
            params.prompt_tokens,
            params.output_tokens_expected,
            params.priority_bid,
            now,
        ) {
            Ok(request) => request,
            Err(SchedulerError::InvalidRequest(reason)) => {
                return AdmitResult::InvalidRequest { reason };
            }
            Err(other) => return AdmitResult::InvalidRequest { reason: other.to_string() },
        };

        match self.registry.try_consume(&request.tenant_id, request.prompt_tokens) {
            AdmitDecision::UnknownTenant => AdmitResult::UnknownTenant,
            AdmitDecision::Rejected => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::info!(tenant_id = %request.tenant_id, request_id = %request.request_id, "rejected: rate limited");
                AdmitResult::Rejected {
                    request_id: request.request_id,
                    reason: "rate limit exceeded".into(),
                }
            }
            AdmitDecision::Accepted => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                let request_id = request.request_id.clone();
                self.queue.push(QueueEntry::new(request));
                let queue_position = self.queue.len();
                tracing::info!(%request_id, queue_position, "accepted and queued");
                AdmitResult::Queued {
                    request_id,
                    queue_position,
                    estimated_wait_ms: (queue_position as u64) * 50,
                }
            }
        }
    }

    pub fn tenant_status(&self, tenant_id: &str) -> Option<TenantStatus> {
        self.registry.status(tenant_id)
    }

    pub fn health(&self) -> HealthReport {
        let total = self.stats.total_requests.load(Ordering::Relaxed);
        let rejected = self.stats.rejected.load(Ordering::Relaxed);
        HealthReport {
            queue_size: self.queue.len(),
            total_requests: total,
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            rejected,
            rejection_rate: if total == 0 { 0.0 } else { rejected as f64 / total as f64 * 100.0 },
            backend_stats: self.backend.stats(),
        }
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
