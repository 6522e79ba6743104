use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use scheduler_common::{Result, SchedulerError};
use serde::Serialize;

use crate::clock::Clock;

/// Immutable tenant admission policy.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub rate_limit: f64,
    pub burst_cap: u64,
}

impl TenantConfig {
    pub fn new(tenant_id: impl Into<String>, rate_limit: f64, burst_cap: u64) -> Result<Self> {
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty() {
            return Err(SchedulerError::InvalidRequest("tenant_id must not be empty".into()));
        }
        if rate_limit <= 0.0 {
            return Err(SchedulerError::InvalidRequest("rate_limit must be > 0".into()));
        }
        if burst_cap == 0 {
            return Err(SchedulerError::InvalidRequest("burst_cap must be > 0".into()));
        }
        Ok(Self { tenant_id, rate_limit, burst_cap })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdmitDecision {
    Accepted,
    Rejected,
    UnknownTenant,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TenantStatus {
    pub current_tokens: f64,
    pub burst_cap: u64,
    pub rate_limit: f64,
    pub utilization_pct: f64,
}

struct TokenBucketState {
    tokens: f64,
    last_update: f64,
}

struct TenantSlot {
    config: TenantConfig,
    bucket: Mutex<TokenBucketState>,
}

/// Maps tenant id to tenant config and its token-bucket state. Configs are
/// immutable after registration. Each tenant has its own bucket mutex so one
/// noisy tenant can never serialize another; the outer map lock is only ever
/// held for the duration of a hashmap lookup or insert.
pub struct TenantRegistry {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, Arc<TenantSlot>>>,
}

impl TenantRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, config: TenantConfig) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&config.tenant_id) {
            return Err(SchedulerError::AlreadyExists(config.tenant_id));
        }
        let now = self.clock.now();
        let slot = Arc::new(TenantSlot {
            bucket: Mutex::new(TokenBucketState {
                tokens: config.burst_cap as f64,
                last_update: now,
            }),
            config,
        });
        entries.insert(slot.config.tenant_id.clone(), slot);
        Ok(())
    }

    fn slot(&self, tenant_id: &str) -> Option<Arc<TenantSlot>> {
        self.entries.read().unwrap().get(tenant_id).cloned()
    }

    /// Classic token bucket with lazy refill, executed under the tenant's own
    /// mutex. Refill happens on both the accept and reject path so
    /// `last_update` always tracks the most recent observation.
    pub fn try_consume(&self, tenant_id: &str, amount: u64) -> AdmitDecision {
        let Some(slot) = self.slot(tenant_id) else {
            return AdmitDecision::UnknownTenant;
        };

        let now = self.clock.now();
        let mut bucket = slot.bucket.lock().unwrap();
        let elapsed = (now - bucket.last_update).max(0.0);
        let refilled = (bucket.tokens + elapsed * slot.config.rate_limit).min(slot.config.burst_cap as f64);

        if refilled >= amount as f64 {
            bucket.tokens = refilled - amount as f64;
            bucket.last_update = now;
            AdmitDecision::Accepted
        } else {
            bucket.tokens = refilled;
            bucket.last_update = now;
            AdmitDecision::Rejected
        }
    }

    pub fn status(&self, tenant_id: &str) -> Option<TenantStatus> {
        let slot = self.slot(tenant_id)?;
        let now = self.clock.now();
        let mut bucket = slot.bucket.lock().unwrap();
        let elapsed = (now - bucket.last_update).max(0.0);
        let refilled = (bucket.tokens + elapsed * slot.config.rate_limit).min(slot.config.burst_cap as f64);
        bucket.tokens = refilled;
        bucket.last_update = now;

        let utilization_pct = (1.0 - refilled / slot.config.burst_cap as f64) * 100.0;
        Some(TenantStatus {
            current_tokens: refilled,
            burst_cap: slot.config.burst_cap,
            rate_limit: slot.config.rate_limit,
            utilization_pct,
        })
    }

    pub fn is_registered(&self, tenant_id: &str) -> bool {
        self.entries.read().unwrap().contains_key(tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn registry_with(tenant: &str, rate: f64, burst: u64) -> (Arc<FakeClock>, TenantRegistry) {
        let clock = Arc::new(FakeClock::new());
        let registry = TenantRegistry::new(clock.clone());
        registry.register(TenantConfig::new(tenant, rate, burst).unwrap()).unwrap();
        (clock, registry)
    }

    #[test]
    fn unknown_tenant_is_reported() {
        let (_, registry) = registry_with("a", 10.0, 100);
        assert_eq!(registry.try_consume("nope", 1), AdmitDecision::UnknownTenant);
    }

    #[test]
    fn consumes_within_burst_cap() {
        let (_, registry) = registry_with("a", 10.0, 100);
        assert_eq!(registry.try_consume("a", 100), AdmitDecision::Accepted);
        assert_eq!(registry.try_consume("a", 1), AdmitDecision::Rejected);
    }

    #[test]
    fn refills_over_time_even_on_reject() {
        let (clock, registry) = registry_with("a", 500.0, 5000);
        for _ in 0..50 {
            assert_eq!(registry.try_consume("a", 100), AdmitDecision::Accepted);
        }
        assert_eq!(registry.try_consume("a", 100), AdmitDecision::Rejected);

        clock.advance(1.0);
        // refill = 500 tok/s * 1s = 500 tokens -> floor(500/100) = 5 admits
        for _ in 0..5 {
            assert_eq!(registry.try_consume("a", 100), AdmitDecision::Accepted);
        }
        assert_eq!(registry.try_consume("a", 100), AdmitDecision::Rejected);
    }

    #[test]
    fn tokens_never_exceed_burst_cap() {
        let (clock, registry) = registry_with("a", 500.0, 5000);
        clock.advance(1000.0);
        let status = registry.status("a").unwrap();
        assert_eq!(status.current_tokens, 5000.0);
    }

    #[test]
    fn double_registration_rejected() {
        let (_, registry) = registry_with("a", 10.0, 100);
        let err = registry.register(TenantConfig::new("a", 1.0, 1).unwrap()).unwrap_err();
        assert_eq!(err, SchedulerError::AlreadyExists("a".into()));
    }
}
