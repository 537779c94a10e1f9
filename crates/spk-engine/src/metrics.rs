//! Prometheus instruments for per-database propagation outcomes.
//!
//! Registered once on a process-wide registry; the daemon's `/metrics`
//! route encodes it with `TextEncoder`.

use std::sync::OnceLock;

use prometheus::{Gauge, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::job::DbStatus;

pub struct EngineMetrics {
    registry: Registry,
    propagation_total: IntCounterVec,
    propagation_duration_seconds: HistogramVec,
    propagation_rate_per_second: Gauge,
}

pub fn handle() -> &'static EngineMetrics {
    static METRICS: OnceLock<EngineMetrics> = OnceLock::new();
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let propagation_total = IntCounterVec::new(
            Opts::new(
                "schema_propagation_total",
                "Terminal per-database propagation outcomes",
            ),
            &["status", "schema_type"],
        )
        .expect("counter definition must be valid");

        let propagation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "schema_propagation_duration_seconds",
                "Apply duration per database",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["schema_type"],
        )
        .expect("histogram definition must be valid");

        let propagation_rate_per_second = Gauge::new(
            "schema_propagation_rate_per_second",
            "Current propagation rate",
        )
        .expect("gauge definition must be valid");

        registry
            .register(Box::new(propagation_total.clone()))
            .expect("register propagation_total");
        registry
            .register(Box::new(propagation_duration_seconds.clone()))
            .expect("register propagation_duration_seconds");
        registry
            .register(Box::new(propagation_rate_per_second.clone()))
            .expect("register propagation_rate_per_second");

        EngineMetrics {
            registry,
            propagation_total,
            propagation_duration_seconds,
            propagation_rate_per_second,
        }
    })
}

impl EngineMetrics {
    /// Registry for text exposition.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

pub fn observe_outcome(status: DbStatus, schema_type: &str, duration_ms: f64) {
    let m = handle();
    m.propagation_total
        .with_label_values(&[status.as_str(), schema_type])
        .inc();
    m.propagation_duration_seconds
        .with_label_values(&[schema_type])
        .observe(duration_ms / 1000.0);
}

pub fn set_rate(rate: f64) {
    handle().propagation_rate_per_second.set(rate);
}
