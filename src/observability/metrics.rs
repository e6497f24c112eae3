//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `akv_controller_reconciliations_total` - Reconciliations that ran (skips excluded)
//! - `akv_controller_reconciliation_errors_total` - Failed reconciliations by error kind
//! - `akv_controller_reconciliation_skips_total` - Keys popped before their poll was due
//! - `akv_controller_reconciliation_duration_seconds` - Duration of reconciliations
//! - `akv_controller_secret_writes_total` - Destination writes by operation
//! - `akv_controller_requeues_total` - Keys requeued with backoff
//! - `akv_controller_keys_dropped_total` - Keys dropped after exhausting retries
//! - `akv_controller_vault_operations_total` - Key Vault reads by object type and outcome
//! - `akv_controller_vault_operation_duration_seconds` - Duration of Key Vault reads
//! - `akv_controller_bindings_tracked` - Bindings currently tracked
//! - `akv_controller_ca_bundle_writes_total` - CA bundle ConfigMap writes by operation

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "akv_controller_reconciliations_total",
        "Total number of reconciliations that ran",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "akv_controller_reconciliation_errors_total",
            "Total number of reconciliation errors by error kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_SKIPS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "akv_controller_reconciliation_skips_total",
        "Total number of keys processed before their poll was due",
    )
    .expect("Failed to create RECONCILIATION_SKIPS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "akv_controller_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static SECRET_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "akv_controller_secret_writes_total",
            "Total number of destination Secret writes by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create SECRET_WRITES_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "akv_controller_requeues_total",
        "Total number of keys requeued with backoff",
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static KEYS_DROPPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "akv_controller_keys_dropped_total",
        "Total number of keys dropped after exhausting their retries",
    )
    .expect("Failed to create KEYS_DROPPED_TOTAL metric - this should never happen")
});

static VAULT_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "akv_controller_vault_operations_total",
            "Total number of Key Vault reads by object type and outcome",
        ),
        &["object_type", "outcome"],
    )
    .expect("Failed to create VAULT_OPERATIONS_TOTAL metric - this should never happen")
});

static VAULT_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "akv_controller_vault_operation_duration_seconds",
            "Duration of Key Vault reads in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["object_type"],
    )
    .expect("Failed to create VAULT_OPERATION_DURATION metric - this should never happen")
});

static BINDINGS_TRACKED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "akv_controller_bindings_tracked",
        "Current number of AzureKeyVaultSecret bindings tracked",
    )
    .expect("Failed to create BINDINGS_TRACKED metric - this should never happen")
});

static CA_BUNDLE_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "akv_controller_ca_bundle_writes_total",
            "Total number of CA bundle ConfigMap writes by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create CA_BUNDLE_WRITES_TOTAL metric - this should never happen")
});

/// Register every metric with [`REGISTRY`]
///
/// Fails if called twice.
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_SKIPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(SECRET_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KEYS_DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VAULT_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VAULT_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(BINDINGS_TRACKED.clone()))?;
    REGISTRY.register(Box::new(CA_BUNDLE_WRITES_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_skips() {
    RECONCILIATION_SKIPS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_secret_writes(operation: &str) {
    SECRET_WRITES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_requeues() {
    REQUEUES_TOTAL.inc();
}

pub fn increment_keys_dropped() {
    KEYS_DROPPED_TOTAL.inc();
}

pub fn record_vault_operation(object_type: &str, outcome: &str, duration: f64) {
    VAULT_OPERATIONS_TOTAL
        .with_label_values(&[object_type, outcome])
        .inc();
    VAULT_OPERATION_DURATION
        .with_label_values(&[object_type])
        .observe(duration);
}

pub fn set_bindings_tracked(count: usize) {
    BINDINGS_TRACKED.set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn increment_ca_bundle_writes(operation: &str) {
    CA_BUNDLE_WRITES_TOTAL.with_label_values(&[operation]).inc();
}
