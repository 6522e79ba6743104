use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::{Parser, Subcommand};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scheduler_backend::SimBackend;
use scheduler_common::config::SchedulerConfig;
use scheduler_common::SchedulerError;
use scheduler_core::{AdmitParams, AdmitResult, Scheduler, SystemClock, TenantConfig};

#[derive(Parser, Debug)]
#[command(name = "scheduler", version, about = "Multi-tenant inference admission and dispatch scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP ingress, bootstrapping the default tenants and dispatcher.
    Serve,
    /// VIP-vs-free priority scheduling scenario, driven in-process.
    Stress,
    /// Point-in-time dump of queue depth, admission counters, and metrics.
    Stats,
    Version,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve().await,
        Commands::Stress => stress().await,
        Commands::Stats => stats().await,
        Commands::Version => println!("{}", env!("CARGO_PKG_VERSION")),
    }
}

async fn serve() {
    let app: Router = scheduler_api::app();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", 8080)).await.unwrap();
    tracing::info!("listening on http://0.0.0.0:8080");
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap();
}

fn bootstrap_scheduler() -> Arc<Scheduler> {
    let config = SchedulerConfig::default();
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

    for (tenant_id, rate_limit, burst_cap) in [
        ("tenant_a", 500.0, 5000),
        ("tenant_b", 300.0, 3000),
        ("tenant_c", 1000.0, 10000),
    ] {
        scheduler
            .register_tenant(TenantConfig::new(tenant_id, rate_limit, burst_cap).unwrap())
            .unwrap();
    }
    scheduler
}

/// Port of the reference deployment's stress scenario: tenant_a (VIP,
/// bid=10) and tenant_b (free, bid=1) each submit 50 concurrent requests;
/// the dispatcher is expected to drain the VIP tenant first while both
/// tenants converge to equal output-token throughput (Jain's index -> 1.0).
/// Monitors the metrics snapshot every 2s for up to 30s, then prints a
/// final health report — in-process equivalent of driving this over HTTP,
/// since there is no separate server process in a CLI demo.
async fn stress() {
    let scheduler = bootstrap_scheduler();

    let on_fatal: Arc<dyn Fn(&SchedulerError) + Send + Sync> =
        Arc::new(|err| tracing::error!(%err, "dispatcher halted on a fatal backend error"));
    scheduler.start_dispatcher(on_fatal);

    println!("Scenario: tenant_a (VIP, bid=10) vs tenant_b (free, bid=1)");
    println!("Each tenant sends 50 requests");

    let mut accepted_a = 0u64;
    let mut rejected_a = 0u64;
    let mut accepted_b = 0u64;
    let mut rejected_b = 0u64;

    for i in 0..50 {
        let a = scheduler.admit(AdmitParams {
            request_id: None,
            tenant_id: "tenant_a".into(),
            prompt_tokens: 100,
            output_tokens_expected: Some(50),
            priority_bid: Some(10),
        });
        match a {
            AdmitResult::Queued { .. } => accepted_a += 1,
            _ => rejected_a += 1,
        }

        let b = scheduler.admit(AdmitParams {
            request_id: None,
            tenant_id: "tenant_b".into(),
            prompt_tokens: 100,
            output_tokens_expected: Some(50),
            priority_bid: Some(1),
        });
        match b {
            AdmitResult::Queued { .. } => accepted_b += 1,
            _ => rejected_b += 1,
        }
        let _ = i;
    }

    println!("Initial response summary:");
    println!("  tenant_a (VIP):  {accepted_a} accepted, {rejected_a} rejected");
    println!("  tenant_b (free): {accepted_b} accepted, {rejected_b} rejected");

    println!("\nMonitoring metrics every 2s for up to 30s...");
    for elapsed in (0..30).step_by(2) {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = scheduler.metrics_snapshot();
        println!(
            "[{elapsed:>2}s] throughput_tps={:.2} gpu_utilization={:.4} cost_per_million_tokens_usd={:.4} jains_fairness_index={:.4}",
            snapshot.throughput_tps, snapshot.gpu_utilization, snapshot.cost_per_million_tokens_usd, snapshot.jains_fairness_index
        );
        if scheduler.health().queue_size == 0 {
            break;
        }
    }

    let health = scheduler.health();
    scheduler.shutdown();
    println!("\nFinal health check:");
    println!("  queue_size: {}", health.queue_size);
    println!("  total_requests: {}", health.total_requests);
    println!("  accepted: {}", health.accepted);
    println!("  rejected: {}", health.rejected);
    println!("  rejection_rate: {:.2}%", health.rejection_rate);
}

/// Point-in-time dump, equivalent to hitting `/health` and
/// `/metrics/snapshot` on a running server but against a freshly bootstrapped
/// scheduler with no traffic — useful for eyeballing the default tunables.
async fn stats() {
    let scheduler = bootstrap_scheduler();
    let health = scheduler.health();
    let snapshot = scheduler.metrics_snapshot();

    println!("queue_size: {}", health.queue_size);
    println!("total_requests: {}", health.total_requests);
    println!("accepted: {}", health.accepted);
    println!("rejected: {}", health.rejected);
    println!("kv_cache_capacity: {}", health.backend_stats.kv_cache_capacity);
    println!("throughput_tps: {:.2}", snapshot.throughput_tps);
    println!("gpu_utilization: {:.4}", snapshot.gpu_utilization);
    println!("jains_fairness_index: {:.4}", snapshot.jains_fairness_index);
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .install_simple()
            .ok();
        if let Some(tracer) = tracer {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .with(OpenTelemetryLayer::new(tracer))
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
