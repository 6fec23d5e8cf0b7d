//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `faucet_claims_total{outcome}` - Claims by outcome (`success` or an error label)
//! - `faucet_lock_wait_seconds` - Time spent waiting for the ledger lock
//! - `faucet_transfer_seconds` - Time from broadcast request to confirmation
//! - `faucet_pending_resolved_total{resolution}` - Pending claims settled by reconciliation
//!
//! Every collector is registered on the instance's own registry, never the
//! process-wide default one.

use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::sync::Arc;
use std::time::Duration;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Claims by outcome
    pub claims_total: IntCounterVec,

    /// Lock wait histogram
    pub lock_wait: Histogram,

    /// Transfer duration histogram
    pub transfer_duration: Histogram,

    /// Reconciled pending claims by resolution
    pub pending_resolved: IntCounterVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let claims_total = IntCounterVec::new(
            Opts::new("faucet_claims_total", "Claims by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(claims_total.clone()))?;

        let lock_wait = Histogram::with_opts(
            HistogramOpts::new("faucet_lock_wait_seconds", "Time spent waiting for the ledger lock")
                .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;
        registry.register(Box::new(lock_wait.clone()))?;

        let transfer_duration = Histogram::with_opts(
            HistogramOpts::new("faucet_transfer_seconds", "Time from broadcast to confirmation")
                .buckets(vec![1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(transfer_duration.clone()))?;

        let pending_resolved = IntCounterVec::new(
            Opts::new(
                "faucet_pending_resolved_total",
                "Pending claims settled by reconciliation",
            ),
            &["resolution"],
        )?;
        registry.register(Box::new(pending_resolved.clone()))?;

        Ok(Self {
            claims_total,
            lock_wait,
            transfer_duration,
            pending_resolved,
            registry,
        })
    }

    /// Record a claim outcome
    pub fn record_claim(&self, outcome: &str) {
        self.claims_total.with_label_values(&[outcome]).inc();
    }

    /// Record a lock wait
    pub fn record_lock_wait(&self, waited: Duration) {
        self.lock_wait.observe(waited.as_secs_f64());
    }

    /// Record a transfer
    pub fn record_transfer(&self, took: Duration) {
        self.transfer_duration.observe(took.as_secs_f64());
    }

    /// Record a reconciled pending claim
    pub fn record_resolution(&self, resolution: &str) {
        self.pending_resolved.with_label_values(&[resolution]).inc();
    }

    /// Claims counted for an outcome
    pub fn claims(&self, outcome: &str) -> u64 {
        self.claims_total.with_label_values(&[outcome]).get()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_do_not_collide() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_claim("success");
        assert_eq!(first.claims("success"), 1);
        assert_eq!(second.claims("success"), 0);
    }

    #[test]
    fn test_gather() {
        let metrics = Metrics::new().unwrap();
        metrics.record_claim("cooldown");
        metrics.record_lock_wait(Duration::from_millis(3));
        metrics.record_resolution("confirmed");

        let names: Vec<_> = metrics
            .registry()
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"faucet_claims_total".to_string()));
        assert!(names.contains(&"faucet_pending_resolved_total".to_string()));
    }
}
