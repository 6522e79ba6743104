pub type Result<T> = core::result::Result<T, SchedulerError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("rate limited: tenant {0} has no tokens remaining")]
    RateLimited(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("tenant already registered: {0}")]
    AlreadyExists(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

pub mod config {
    use serde::Deserialize;
    use std::env;

    /// Design constants from the admission/dispatch specification (§6.3).
    #[derive(Debug, Clone, Deserialize)]
    pub struct SchedulerConfig {
        pub max_batch_size: usize,
        pub base_batch_window_secs: f64,
        pub max_kv_cache_tokens: u64,
        pub prefill_throughput_tps: f64,
        pub decode_throughput_tps: f64,
        pub decode_batch_saturation: usize,
        pub governor_window_size: usize,
        pub entropy_critical_threshold: f64,
        pub cost_per_hour_usd: f64,
    }

    impl Default for SchedulerConfig {
        fn default() -> Self {
            Self {
                max_batch_size: 16,
                base_batch_window_secs: 0.010,
                max_kv_cache_tokens: 32_768,
                prefill_throughput_tps: 1024.0,
                decode_throughput_tps: 128.0,
                decode_batch_saturation: 16,
                governor_window_size: 50,
                entropy_critical_threshold: 1.5,
                cost_per_hour_usd: 3.00,
            }
        }
    }

    impl SchedulerConfig {
        /// Load precedence: `SCHEDULER_CONFIG` (path to a YAML file) overrides
        /// everything; otherwise individual `SCHEDULER_*` env vars override
        /// the compiled-in defaults field by field.
        pub fn load() -> Self {
            if let Ok(path) = env::var("SCHEDULER_CONFIG") {
                let Ok(text) = std::fs::read_to_string(&path) else {
                    tracing::warn!(path = %path, "SCHEDULER_CONFIG set but unreadable, using defaults");
                    return Self::default();
                };
                return match serde_yaml::from_str::<SchedulerConfig>(&text) {
                    Ok(cfg) => cfg,
                    Err(err) => {
                        tracing::warn!(path = %path, %err, "failed to parse SCHEDULER_CONFIG, using defaults");
                        Self::default()
                    }
                };
            }
            let mut cfg = Self::default();
            if let Some(v) = env_parse("SCHEDULER_MAX_BATCH_SIZE") { cfg.max_batch_size = v; }
            if let Some(v) = env_parse("SCHEDULER_BASE_BATCH_WINDOW_SECS") { cfg.base_batch_window_secs = v; }
            if let Some(v) = env_parse("SCHEDULER_MAX_KV_CACHE_TOKENS") { cfg.max_kv_cache_tokens = v; }
            if let Some(v) = env_parse("SCHEDULER_PREFILL_THROUGHPUT_TPS") { cfg.prefill_throughput_tps = v; }
            if let Some(v) = env_parse("SCHEDULER_DECODE_THROUGHPUT_TPS") { cfg.decode_throughput_tps = v; }
            if let Some(v) = env_parse("SCHEDULER_DECODE_BATCH_SATURATION") { cfg.decode_batch_saturation = v; }
            if let Some(v) = env_parse("SCHEDULER_GOVERNOR_WINDOW_SIZE") { cfg.governor_window_size = v; }
            if let Some(v) = env_parse("SCHEDULER_ENTROPY_CRITICAL_THRESHOLD") { cfg.entropy_critical_threshold = v; }
            if let Some(v) = env_parse("SCHEDULER_COST_PER_HOUR_USD") { cfg.cost_per_hour_usd = v; }
            cfg
        }
    }

    fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
        env::var(key).ok().and_then(|v| v.parse().ok())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn defaults_match_spec_constants() {
            let cfg = SchedulerConfig::default();
            assert_eq!(cfg.max_batch_size, 16);
            assert_eq!(cfg.max_kv_cache_tokens, 32_768);
            assert!((cfg.base_batch_window_secs - 0.010).abs() < 1e-12);
            assert!((cfg.cost_per_hour_usd - 3.00).abs() < 1e-12);
        }
    }
}
