use prometheus::{Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use tracing::info;
use std::sync::Arc;
use tokio::sync::OnceCell;


// Declare the static OnceCell to hold the Metrics.
static METRICS_INSTANCE: OnceCell<Arc<Metrics>> = OnceCell::const_new();

/// Asynchronously initializes and gets a reference to the static `Metrics`.
pub async fn get_metrics() -> &'static Arc<Metrics> {
    METRICS_INSTANCE.get_or_init(|| async {
        info!("Initializing Metrics ...");
        Metrics::new()}
    ).await
}

pub const OUTCOME_HIT: &str = "hit";
pub const OUTCOME_ACQUIRE: &str = "acquire";
pub const OUTCOME_JOIN: &str = "join";
pub const OUTCOME_GRACE: &str = "grace";


#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Cache metrics
    pub token_requests: IntCounterVec,
    pub token_expiry_unix: IntGaugeVec,
    pub invalidations: IntCounterVec,

    // Acquisition metrics
    pub acquisitions: IntCounterVec,
    pub acquisition_failures: IntCounterVec,
    pub acquisition_duration: HistogramVec,
    pub reauth_fallbacks: IntCounterVec,

    // Config/runtime
    pub config_validation_errors: IntCounter,
    pub up: IntGauge,

    // === Service resource metrics ===
    pub process_cpu_usage: Gauge,
    pub process_memory_usage: IntGauge,
    pub process_open_fds: IntGauge,
    pub process_start_time: IntGauge,
    pub process_uptime: IntGauge,
}

impl Metrics {
    fn new() -> Arc<Self> {
        let registry = Registry::new_custom(Some("kctokenagent".into()), None).unwrap();

        let metrics: Arc<Metrics> = Arc::new(Self {
            // Cache
            token_requests: IntCounterVec::new(Opts::new("token_requests_total", "Token requests by outcome (hit, acquire, join, grace)"),&["identity", "outcome"],).unwrap(),
            token_expiry_unix: IntGaugeVec::new(Opts::new("token_expiry_unix_seconds", "Access token expiry timestamp"),&["identity"],).unwrap(),
            invalidations: IntCounterVec::new(Opts::new("token_invalidations_total", "Explicit invalidations and logouts"),&["identity"],).unwrap(),

            // Acquisition
            acquisitions: IntCounterVec::new(Opts::new("acquisitions_total", "Calls made to the identity provider by grant"),&["identity", "grant"],).unwrap(),
            acquisition_failures: IntCounterVec::new(Opts::new("acquisition_failures_total", "Acquisition failures by reason"),&["identity", "reason"],).unwrap(),
            acquisition_duration: HistogramVec::new(HistogramOpts::new("acquisition_duration_seconds", "Identity provider call duration seconds").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),&["grant"],).unwrap(),
            reauth_fallbacks: IntCounterVec::new(Opts::new("reauth_fallbacks_total", "Full authentications after a rejected refresh"),&["identity"],).unwrap(),

            // Config/runtime
            config_validation_errors: IntCounter::new("config_validation_errors_total","Validation errors during startup",).unwrap(),
            up: IntGauge::new("up", "1 if service is healthy").unwrap(),
            process_cpu_usage: Gauge::new("process_cpu_usage_percent", "CPU usage % of this process").unwrap(),
            process_memory_usage: IntGauge::new("process_memory_usage_bytes", "Resident memory used by this process").unwrap(),
            process_open_fds: IntGauge::new("process_open_fds", "Number of open file descriptors").unwrap(),
            process_start_time: IntGauge::new("process_start_time_seconds", "Process start time (UNIX seconds)").unwrap(),
            process_uptime: IntGauge::new("process_uptime_seconds", "Process uptime seconds").unwrap(),

            registry,
        });

        // Register all metrics in the registry
        let reg = &metrics.registry;
        reg.register(Box::new(metrics.token_requests.clone())).unwrap();
        reg.register(Box::new(metrics.token_expiry_unix.clone())).unwrap();
        reg.register(Box::new(metrics.invalidations.clone())).unwrap();
        reg.register(Box::new(metrics.acquisitions.clone())).unwrap();
        reg.register(Box::new(metrics.acquisition_failures.clone())).unwrap();
        reg.register(Box::new(metrics.acquisition_duration.clone())).unwrap();
        reg.register(Box::new(metrics.reauth_fallbacks.clone())).unwrap();
        reg.register(Box::new(metrics.config_validation_errors.clone())).unwrap();
        reg.register(Box::new(metrics.up.clone())).unwrap();

        reg.register(Box::new(metrics.process_cpu_usage.clone())).unwrap();
        reg.register(Box::new(metrics.process_memory_usage.clone())).unwrap();
        reg.register(Box::new(metrics.process_open_fds.clone())).unwrap();
        reg.register(Box::new(metrics.process_start_time.clone())).unwrap();
        reg.register(Box::new(metrics.process_uptime.clone())).unwrap();

        metrics
    }
}
