use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::clock::Clock;

const WALL_TIME_EPSILON: f64 = 1e-6;

struct MetricsState {
    total_output_tokens: u64,
    total_busy_time: f64,
    last_process_end: f64,
    per_tenant_output_tokens: HashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub total_output_tokens: u64,
    pub throughput_tps: f64,
    pub gpu_utilization: f64,
    pub cost_per_token_usd: f64,
    pub cost_per_million_tokens_usd: f64,
    pub jains_fairness_index: f64,
}

/// Observes every completed batch and computes throughput, utilization,
/// cost-per-token, and Jain's fairness index on demand. Snapshots are
/// atomic with respect to concurrent `record_batch` calls.
pub struct MetricsAggregator {
    clock: Arc<dyn Clock>,
    cost_per_hour_usd: f64,
    state: Mutex<MetricsState>,
}

impl MetricsAggregator {
    pub fn new(clock: Arc<dyn Clock>, cost_per_hour_usd: f64) -> Self {
        let now = clock.now();
        Self {
            clock,
            cost_per_hour_usd,
            state: Mutex::new(MetricsState {
                total_output_tokens: 0,
                total_busy_time: 0.0,
                last_process_end: now,
                per_tenant_output_tokens: HashMap::new(),
            }),
        }
    }

    /// Publishes the output-token accounting and latency for one completed
    /// batch. `output_tokens_by_tenant` is `(tenant_id, output_tokens_expected)`
    /// for every request in the batch.
    pub fn record_batch(&self, output_tokens_by_tenant: &[(String, u64)], batch_latency_secs: f64) {
        let mut state = self.state.lock().unwrap();
        for (tenant_id, tokens) in output_tokens_by_tenant {
            state.total_output_tokens += tokens;
            *state.per_tenant_output_tokens.entry(tenant_id.clone()).or_insert(0) += tokens;
        }
        state.total_busy_time += batch_latency_secs;
        state.last_process_end = self.clock.now();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap();
        let idle_time = (self.clock.now() - state.last_process_end).max(0.0);
        let wall_time = if state.total_busy_time == 0.0 {
            WALL_TIME_EPSILON
        } else {
            state.total_busy_time + idle_time
        };

        let throughput_tps = state.total_output_tokens as f64 / wall_time;
        let gpu_utilization = state.total_busy_time / wall_time;

        let (cost_per_token_usd, cost_per_million_tokens_usd) = if throughput_tps > 0.0 {
            let cost_per_token = self.cost_per_hour_usd / 3600.0 / throughput_tps;
            (cost_per_token, cost_per_token * 1_000_000.0)
        } else {
            (0.0, 0.0)
        };

        let jains_fairness_index = jains_index(state.per_tenant_output_tokens.values().copied());

        MetricsSnapshot {
            total_output_tokens: state.total_output_tokens,
            throughput_tps,
            gpu_utilization,
            cost_per_token_usd,
            cost_per_million_tokens_usd,
            jains_fairness_index,
        }
    }

    pub fn per_tenant_output_tokens(&self) -> HashMap<String, u64> {
        self.state.lock().unwrap().per_tenant_output_tokens.clone()
    }
}

/// `(Σx)² / (n·Σx²)`. Perfectly equal throughput across `n` tenants is 1.0;
/// all traffic on one of `n` tenants is `1/n`.
fn jains_index(values: impl Iterator<Item = u64>) -> f64 {
    let values: Vec<f64> = values.map(|v| v as f64).collect();
    let n = values.len();
    if n == 0 {
        return 1.0;
    }
    let sum: f64 = values.iter().sum();
    let sum_sq: f64 = values.iter().map(|v| v * v).sum();
    if sum_sq == 0.0 {
        return 0.0;
    }
    (sum * sum) / (n as f64 * sum_sq)
}
