//! Pluggable accelerator contract and the reference A100-class latency simulator.
//!
//! `InferenceBackend` is the sole abstraction boundary between the
//! admission/dispatch pipeline and whatever actually executes a batch. Real
//! token-level generation is out of scope here; the only obligation of an
//! implementation is to report per-batch latency faithfully and to block (or
//! otherwise suspend) for that duration.

use std::sync::Mutex;
use std::time::Duration;

use scheduler_common::{Result, SchedulerError};

/// Everything a backend needs to know about one admitted request in order to
/// cost a batch. Deliberately decoupled from `scheduler-core::Request` so
/// this crate has no dependency on the scheduler's own types.
#[derive(Debug, Clone)]
pub struct BatchRequestRef {
    pub request_id: String,
    pub prompt_tokens: u64,
    pub output_tokens_expected: u64,
}

/// Result of running one micro-batch through the accelerator.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub batch_size: usize,
    pub ttft_ms: f64,
    pub tpot_ms: f64,
    pub total_latency_ms: f64,
    pub kv_cache_used: u64,
    pub request_ids: Vec<String>,
    /// True if this batch triggered the KV-cache overflow reset stub.
    pub kv_cache_reset: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BackendStats {
    pub batches_processed: u64,
    pub requests_processed: u64,
    pub kv_cache_used: u64,
    pub kv_cache_capacity: u64,
}

pub trait InferenceBackend: Send + Sync {
    /// Run one micro-batch. Blocks the calling thread for the modeled
    /// latency; callers on an async runtime must offload this call.
    fn run_batch(&self, requests: &[BatchRequestRef]) -> Result<BatchReport>;

    fn stats(&self) -> BackendStats;
}

/// Reference backend: a timing-only simulator of an A100-class accelerator,
/// calibrated the way the source benchmark numbers describe prefill/decode
/// behavior for LLaMA-style models.
pub struct SimBackend {
    prefill_throughput_tps: f64,
    decode_throughput_tps: f64,
    decode_batch_saturation: usize,
    max_kv_cache_tokens: u64,
    state: Mutex<SimState>,
    /// When false, `run_batch` returns immediately instead of sleeping —
    /// used by tests that want the cost model without real wall-clock delay.
    simulate_latency: bool,
}

#[derive(Default)]
struct SimState {
    kv_cache_used: u64,
    batches_processed: u64,
    requests_processed: u64,
}

impl SimBackend {
    pub fn new(
        prefill_throughput_tps: f64,
        decode_throughput_tps: f64,
        decode_batch_saturation: usize,
        max_kv_cache_tokens: u64,
    ) -> Result<Self> {
        if prefill_throughput_tps <= 0.0 || decode_throughput_tps <= 0.0 {
            return Err(SchedulerError::InternalError(
                "backend throughput configuration must be positive".into(),
            ));
        }
        Ok(Self {
            prefill_throughput_tps,
            decode_throughput_tps,
            decode_batch_saturation,
            max_kv_cache_tokens,
            state: Mutex::new(SimState::default()),
            simulate_latency: true,
        })
    }

    /// Builds a simulator that computes the same cost model but never
    /// actually sleeps. Intended for deterministic tests.
    pub fn new_without_latency(
        prefill_throughput_tps: f64,
        decode_throughput_tps: f64,
        decode_batch_saturation: usize,
        max_kv_cache_tokens: u64,
    ) -> Result<Self> {
        let mut backend = Self::new(
            prefill_throughput_tps,
            decode_throughput_tps,
            decode_batch_saturation,
            max_kv_cache_tokens,
        )?;
        backend.simulate_latency = false;
        Ok(backend)
    }

    fn estimate(&self, requests: &[BatchRequestRef]) -> (f64, f64, f64) {
        let batch_size = requests.len();
        let max_prefill = requests.iter().map(|r| r.prompt_tokens).max().unwrap_or(0) as f64;
        let avg_output = requests.iter().map(|r| r.output_tokens_expected).sum::<u64>() as f64
            / batch_size.max(1) as f64;

        let ttft_s = max_prefill / self.prefill_throughput_tps;
        let effective_decode =
            self.decode_throughput_tps * batch_size.min(self.decode_batch_saturation) as f64;
        let tpot_s = if effective_decode > 0.0 {
            batch_size as f64 / effective_decode
        } else {
            0.0
        };
        let total_latency_s = ttft_s + tpot_s * avg_output;
        (ttft_s, tpot_s, total_latency_s)
    }
}

impl InferenceBackend for SimBackend {
    fn run_batch(&self, requests: &[BatchRequestRef]) -> Result<BatchReport> {
        if requests.is_empty() {
            return Ok(BatchReport::default());
        }

        let (ttft_s, tpot_s, total_latency_s) = self.estimate(requests);
        let need: u64 = requests.iter().map(|r| r.prompt_tokens).sum();

        let (kv_cache_used, kv_cache_reset) = {
            let mut state = self.state.lock().unwrap();
            let reset = state.kv_cache_used + need > self.max_kv_cache_tokens;
            if reset {
                tracing::warn!(
                    used = state.kv_cache_used,
                    need,
                    capacity = self.max_kv_cache_tokens,
                    "KV cache overflow, resetting working set"
                );
                state.kv_cache_used = 0;
            }
            state.kv_cache_used += need;
            state.batches_processed += 1;
            state.requests_processed += requests.len() as u64;
            (state.kv_cache_used, reset)
        };

        if self.simulate_latency && total_latency_s > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(total_latency_s));
        }

        Ok(BatchReport {
            batch_size: requests.len(),
            ttft_ms: ttft_s * 1000.0,
            tpot_ms: tpot_s * 1000.0,
            total_latency_ms: total_latency_s * 1000.0,
            kv_cache_used,
            request_ids: requests.iter().map(|r| r.request_id.clone()).collect(),
            kv_cache_reset,
        })
    }

    fn stats(&self) -> BackendStats {
        let state = self.state.lock().unwrap();
        BackendStats {
            batches_processed: state.batches_processed,
            requests_processed: state.requests_processed,
            kv_cache_used: state.kv_cache_used,
            kv_cache_capacity: self.max_kv_cache_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(id: &str, prompt: u64, output: u64) -> BatchRequestRef {
        BatchRequestRef {
            request_id: id.into(),
            prompt_tokens: prompt,
            output_tokens_expected: output,
        }
    }

    #[test]
    fn zero_rate_config_is_fatal() {
        assert!(SimBackend::new(0.0, 128.0, 16, 32_768).is_err());
        assert!(SimBackend::new(1024.0, 0.0, 16, 32_768).is_err());
    }

    #[test]
    fn empty_batch_is_a_zero_report() {
        let backend = SimBackend::new_without_latency(1024.0, 128.0, 16, 32_768).unwrap();
        let report = backend.run_batch(&[]).unwrap();
        assert_eq!(report.batch_size, 0);
        assert_eq!(report.total_latency_ms, 0.0);
    }

    #[test]
    fn latency_matches_ttft_plus_tpot_formula() {
        let backend = SimBackend::new_without_latency(1024.0, 128.0, 16, 32_768).unwrap();
        let batch = vec![req("a", 1024, 50), req("b", 512, 50)];
        let report = backend.run_batch(&batch).unwrap();

        let expected_ttft_ms = (1024.0 / 1024.0) * 1000.0;
        let effective_decode = 128.0 * 2.0_f64.min(16.0);
        let expected_tpot_ms = (2.0 / effective_decode) * 1000.0;
        let expected_total = expected_ttft_ms + expected_tpot_ms * 50.0;

        assert!((report.ttft_ms - expected_ttft_ms).abs() < 1e-9);
        assert!((report.tpot_ms - expected_tpot_ms).abs() < 1e-9);
        assert!((report.total_latency_ms - expected_total).abs() < 1e-9);
    }

    #[test]
    fn kv_cache_overflow_triggers_reset() {
        let backend = SimBackend::new_without_latency(1024.0, 128.0, 16, 32_768).unwrap();
        let batch = vec![req("a", 40_000, 10)];
        let report = backend.run_batch(&batch).unwrap();
        assert!(report.kv_cache_reset);
        assert_eq!(report.kv_cache_used, 40_000);
        assert_eq!(backend.stats().kv_cache_used, 40_000);
    }

    #[test]
    fn kv_cache_accumulates_without_overflow() {
        let backend = SimBackend::new_without_latency(1024.0, 128.0, 16, 32_768).unwrap();
        backend.run_batch(&[req("a", 1000, 10)]).unwrap();
        let second = backend.run_batch(&[req("b", 2000, 10)]).unwrap();
        assert!(!second.kv_cache_reset);
        assert_eq!(second.kv_cache_used, 3000);
    }
}
