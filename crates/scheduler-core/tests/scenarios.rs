//! End-to-end scenarios driven against a real `Scheduler`, dispatcher thread
//! included, rather than the individual unit tests each module already
//! carries for its own arithmetic.

use std::sync::Arc;
use std::time::Duration;

use scheduler_backend::SimBackend;
use scheduler_common::config::SchedulerConfig;
use scheduler_core::{AdmitParams, AdmitResult, Scheduler, SystemClock, TenantConfig};

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

#[test]
fn s1_vip_preemption_drains_high_bidder_first_and_is_fair_on_completion() {
    let clock = Arc::new(SystemClock::new());
    let backend = Arc::new(SimBackend::new_without_latency(1024.0, 128.0, 16, 1_000_000).unwrap());
    let mut config = SchedulerConfig::default();
    config.max_batch_size = 1;
    let scheduler = Scheduler::new(config, backend, clock);

    scheduler.register_tenant(TenantConfig::new("a", 500.0, 5000).unwrap()).unwrap();
    scheduler.register_tenant(TenantConfig::new("b", 300.0, 3000).unwrap()).unwrap();

    for _ in 0..50 {
        let result = scheduler.admit(AdmitParams {
            request_id: None,
            tenant_id: "b".into(),
            prompt_tokens: 100,
            output_tokens_expected: Some(50),
            priority_bid: Some(1),
        });
        assert!(matches!(result, AdmitResult::Queued { .. }));
    }
    for _ in 0..50 {
        let result = scheduler.admit(AdmitParams {
            request_id: None,
            tenant_id: "a".into(),
            prompt_tokens: 100,
            output_tokens_expected: Some(50),
            priority_bid: Some(10),
        });
        assert!(matches!(result, AdmitResult::Queued { .. }));
    }
    assert_eq!(scheduler.health().queue_size, 100);

    let on_fatal: Arc<dyn Fn(&scheduler_common::SchedulerError) + Send + Sync> = Arc::new(|err| {
        panic!("dispatcher reported fatal error: {err}");
    });
    scheduler.start_dispatcher(on_fatal);

    let drained = wait_until(|| scheduler.health().queue_size == 0, Duration::from_secs(10));
    scheduler.shutdown();
    assert!(drained, "dispatcher failed to drain 100 requests in time");

    let per_tenant = scheduler.metrics.per_tenant_output_tokens();
    assert_eq!(per_tenant.get("a").copied().unwrap_or(0), 2500);
    assert_eq!(per_tenant.get("b").copied().unwrap_or(0), 2500);

    let snapshot = scheduler.metrics_snapshot();
    assert!((snapshot.jains_fairness_index - 1.0).abs() < 1e-9);
}

#[test]
fn s3_batch_size_cap_produces_at_least_seven_batches_from_one_hundred_requests() {
    let clock = Arc::new(SystemClock::new());
    let backend = Arc::new(SimBackend::new_without_latency(1024.0, 128.0, 16, 1_000_000).unwrap());
    let config = SchedulerConfig::default();
    assert_eq!(config.max_batch_size, 16);
    let scheduler = Scheduler::new(config, backend.clone(), clock);

    scheduler.register_tenant(TenantConfig::new("a", 100_000.0, 1_000_000).unwrap()).unwrap();
    for _ in 0..100 {
        let result = scheduler.admit(AdmitParams {
            request_id: None,
            tenant_id: "a".into(),
            prompt_tokens: 10,
            output_tokens_expected: Some(1),
            priority_bid: None,
        });
        assert!(matches!(result, AdmitResult::Queued { .. }));
    }

    let on_fatal: Arc<dyn Fn(&scheduler_common::SchedulerError) + Send + Sync> = Arc::new(|err| {
        panic!("dispatcher reported fatal error: {err}");
    });
    scheduler.start_dispatcher(on_fatal);

    let drained = wait_until(|| scheduler.health().queue_size == 0, Duration::from_secs(10));
    scheduler.shutdown();
    assert!(drained);

    let stats = backend.stats();
    assert_eq!(stats.requests_processed, 100);
    assert!(stats.batches_processed >= 7, "expected >= 7 batches, got {}", stats.batches_processed);
}

#[test]
fn s5_kv_overflow_reset_on_a_single_oversized_request() {
    let clock = Arc::new(SystemClock::new());
    let backend = Arc::new(SimBackend::new_without_latency(1024.0, 128.0, 16, 32_768).unwrap());
    let scheduler = Scheduler::new(SchedulerConfig::default(), backend.clone(), clock);

    scheduler.register_tenant(TenantConfig::new("a", 100_000.0, 1_000_000).unwrap()).unwrap();
    let result = scheduler.admit(AdmitParams {
        request_id: None,
        tenant_id: "a".into(),
        prompt_tokens: 40_000,
        output_tokens_expected: Some(10),
        priority_bid: None,
    });
    assert!(matches!(result, AdmitResult::Queued { .. }));

    let on_fatal: Arc<dyn Fn(&scheduler_common::SchedulerError) + Send + Sync> = Arc::new(|err| {
        panic!("dispatcher reported fatal error: {err}");
    });
    scheduler.start_dispatcher(on_fatal);

    let drained = wait_until(|| scheduler.health().queue_size == 0, Duration::from_secs(10));
    scheduler.shutdown();
    assert!(drained);

    let stats = backend.stats();
    assert_eq!(stats.kv_cache_used, 40_000);
    assert_eq!(stats.batches_processed, 1);
}
