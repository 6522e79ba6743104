//! Observability utilities: republishes the scheduler's own accounting
//! (there is no real GPU to poll — the accelerator is simulated) as
//! Prometheus gauges on a background interval.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{Gauge, IntGauge};
use scheduler_core::Scheduler;

static KV_CACHE_USED: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("scheduler_kv_cache_used_tokens", "KV cache working set in tokens").unwrap()
});
static KV_CACHE_CAPACITY: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("scheduler_kv_cache_capacity_tokens", "KV cache working set ceiling in tokens").unwrap()
});
static QUEUE_DEPTH: Lazy<IntGauge> =
    Lazy::new(|| prometheus::register_int_gauge!("scheduler_queue_depth", "Requests currently queued").unwrap());
static THROUGHPUT_TPS: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("scheduler_throughput_tokens_per_second", "Output tokens per second, wall-clock").unwrap()
});
static GPU_UTILIZATION: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("scheduler_gpu_utilization_ratio", "Fraction of wall time the simulated accelerator spent busy").unwrap()
});
static JAINS_INDEX: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("scheduler_jains_fairness_index", "Jain's fairness index over per-tenant output throughput").unwrap()
});

/// Registers every gauge with the default Prometheus registry. Idempotent;
/// call once at startup before `GET /metrics` can report non-zero series.
pub fn init() {
    let _ = &*KV_CACHE_USED;
    let _ = &*KV_CACHE_CAPACITY;
    let _ = &*QUEUE_DEPTH;
    let _ = &*THROUGHPUT_TPS;
    let _ = &*GPU_UTILIZATION;
    let _ = &*JAINS_INDEX;
}

/// Spawns a tokio task that samples the scheduler's own health report and
/// metrics snapshot every `interval` and republishes them as gauges.
pub fn spawn_metrics_polling(scheduler: Arc<Scheduler>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            let health = scheduler.health();
            let snapshot = scheduler.metrics_snapshot();

            KV_CACHE_USED.set(health.backend_stats.kv_cache_used as i64);
            KV_CACHE_CAPACITY.set(health.backend_stats.kv_cache_capacity as i64);
            QUEUE_DEPTH.set(health.queue_size as i64);
            THROUGHPUT_TPS.set(snapshot.throughput_tps);
            GPU_UTILIZATION.set(snapshot.gpu_utilization);
            JAINS_INDEX.set(snapshot.jains_fairness_index);

            tokio::time::sleep(interval).await;
        }
    });
}
