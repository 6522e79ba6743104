use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use scheduler_backend::{BatchRequestRef, InferenceBackend};
use scheduler_common::SchedulerError;

use crate::clock::Clock;
use crate::governor::HomeostaticGovernor;
use crate::metrics::MetricsAggregator;
use crate::queue::PriorityQueue;

/// Runs as a dedicated OS thread, independent of whatever async runtime the
/// admission path uses, so the simulated-accelerator sleep in
/// `InferenceBackend::run_batch` never blocks a reactor.
pub struct Dispatcher {
    queue: Arc<PriorityQueue>,
    /// `None` models the governor being disabled; the dispatcher then always
    /// uses `fallback_window_secs` as a fixed batching window.
    governor: Option<Arc<HomeostaticGovernor>>,
    backend: Arc<dyn InferenceBackend>,
    metrics: Arc<MetricsAggregator>,
    clock: Arc<dyn Clock>,
    max_batch_size: usize,
    fallback_window_secs: f64,
}

pub struct DispatcherHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Signals the dispatcher to finish its in-flight batch and exit, then
    /// waits for the thread. Pending queue entries are discarded, not
    /// persisted, per the no-persistence contract.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<PriorityQueue>,
        governor: Option<Arc<HomeostaticGovernor>>,
        backend: Arc<dyn InferenceBackend>,
        metrics: Arc<MetricsAggregator>,
        clock: Arc<dyn Clock>,
        max_batch_size: usize,
        fallback_window_secs: f64,
    ) -> Self {
        Self {
            queue,
            governor,
            backend,
            metrics,
            clock,
            max_batch_size,
            fallback_window_secs,
        }
    }

    /// Spawns the dispatch loop on its own thread. `on_fatal` is invoked (and
    /// the loop exits) when the backend reports an `InternalError` — in
    /// production this should terminate the process; tests substitute a hook
    /// that records the error instead.
    pub fn spawn(self, on_fatal: Arc<dyn Fn(&SchedulerError) + Send + Sync>) -> DispatcherHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let loop_shutdown = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || self.run(loop_shutdown, on_fatal))
            .expect("failed to spawn dispatcher thread");
        DispatcherHandle { shutdown, join: Some(join) }
    }

    fn run(self, shutdown: Arc<AtomicBool>, on_fatal: Arc<dyn Fn(&SchedulerError) + Send + Sync>) {
        while !shutdown.load(Ordering::SeqCst) {
            let Some(lead) = self.queue.pop_max_blocking(Duration::from_millis(1)) else {
                continue;
            };

            let window_secs = match &self.governor {
                Some(governor) => governor.adaptive_window(),
                None => self.fallback_window_secs,
            };
            std::thread::sleep(Duration::from_secs_f64(window_secs.max(0.0)));

            let mut batch = vec![lead];
            batch.extend(self.queue.drain_up_to(self.max_batch_size.saturating_sub(1)));

            let refs: Vec<BatchRequestRef> = batch
                .iter()
                .map(|entry| BatchRequestRef {
                    request_id: entry.request.request_id.clone(),
                    prompt_tokens: entry.request.prompt_tokens,
                    output_tokens_expected: entry.request.output_tokens_expected,
                })
                .collect();

            match self.backend.run_batch(&refs) {
                Ok(report) => {
                    let output_tokens: Vec<(String, u64)> = batch
                        .iter()
                        .map(|entry| (entry.request.tenant_id.clone(), entry.request.output_tokens_expected))
                        .collect();
                    self.metrics
                        .record_batch(&output_tokens, report.total_latency_ms / 1000.0);

                    tracing::info!(
                        batch_size = report.batch_size,
                        ttft_ms = report.ttft_ms,
                        tpot_ms = report.tpot_ms,
                        total_latency_ms = report.total_latency_ms,
                        kv_cache_used = report.kv_cache_used,
                        kv_cache_reset = report.kv_cache_reset,
                        "batch dispatched"
                    );
                }
                Err(err) => {
                    tracing::error!(%err, "backend reported a fatal error, halting dispatcher");
                    on_fatal(&err);
                    return;
                }
            }
        }
    }
}
