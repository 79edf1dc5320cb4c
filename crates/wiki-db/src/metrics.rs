//! ---
//! wiki_section: "03-persistence-logging"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Persistence unit, page store and query templates."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::Result;

/// Metrics published by the persistence unit.
#[derive(Clone)]
pub struct StoreMetrics {
    operations: IntCounterVec,
    latency: HistogramVec,
    registry: Registry,
}

impl StoreMetrics {
    /// Register all store metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "wiki_store_operations_total",
                "Page store operations by action and outcome",
            ),
            &["action", "outcome"],
        )?;
        registry.register(Box::new(operations.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "wiki_store_operation_seconds",
            "Time spent serving one page store operation",
        )
        .buckets(prometheus::exponential_buckets(0.0001, 2.0, 14)?);
        let latency = HistogramVec::new(histogram_opts, &["action"])?;
        if let Err(err) = registry.register(Box::new(latency.clone())) {
            let _ = registry.unregister(Box::new(operations.clone()));
            return Err(err.into());
        }

        Ok(Self {
            operations,
            latency,
            registry: registry.clone(),
        })
    }

    /// Record one finished operation.
    pub fn observe(&self, action: &str, success: bool, elapsed: Duration) {
        let outcome = if success { "ok" } else { "error" };
        self.operations
            .with_label_values(&[action, outcome])
            .inc();
        self.latency
            .with_label_values(&[action])
            .observe(elapsed.as_secs_f64());
    }

    /// Count of operations recorded for `action` with `outcome`.
    pub fn count(&self, action: &str, outcome: &str) -> u64 {
        self.operations.with_label_values(&[action, outcome]).get()
    }

    /// Remove the metrics from the registry they were registered with.
    pub fn unregister(&self) {
        let _ = self.registry.unregister(Box::new(self.operations.clone()));
        let _ = self.registry.unregister(Box::new(self.latency.clone()));
    }
}

impl std::fmt::Debug for StoreMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreMetrics").finish_non_exhaustive()
    }
}
