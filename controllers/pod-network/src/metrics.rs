//! Prometheus metrics
//!
//! - `pod_network_reconcile_total{kind, outcome}`
//! - `pod_network_resolution_failures_total{reason}`
//! - `pod_network_reconcile_duration_seconds{kind}`

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Controller metrics, registered in their own registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    resolution_failures: IntCounterVec,
    duration: HistogramVec,
}

impl Metrics {
    /// Creates and registers all metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let reconciles = IntCounterVec::new(
            Opts::new("pod_network_reconcile_total", "Reconciliation passes by kind and outcome"),
            &["kind", "outcome"],
        )?;
        let resolution_failures = IntCounterVec::new(
            Opts::new(
                "pod_network_resolution_failures_total",
                "Claim devices that failed to resolve to a network, by reason",
            ),
            &["reason"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("pod_network_reconcile_duration_seconds", "Duration of reconciliation passes"),
            &["kind"],
        )?;
        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(resolution_failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self {
            registry,
            reconciles,
            resolution_failures,
            duration,
        })
    }

    /// Records one finished pass. `outcome` is an outcome label or an error reason.
    pub fn record_reconcile(&self, kind: &str, outcome: &str, elapsed: Duration) {
        self.reconciles.with_label_values(&[kind, outcome]).inc();
        self.duration.with_label_values(&[kind]).observe(elapsed.as_secs_f64());
    }

    /// Records a device resolution failure.
    pub fn record_resolution_failure(&self, reason: &str) {
        self.resolution_failures.with_label_values(&[reason]).inc();
    }

    /// Renders the registry in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconcile("PodNetwork", "updated", Duration::from_millis(12));
        metrics.record_resolution_failure("NamespaceRequired");

        let text = metrics.render().unwrap();

        assert!(text.contains(r#"pod_network_reconcile_total{kind="PodNetwork",outcome="updated"} 1"#));
        assert!(text.contains(r#"pod_network_resolution_failures_total{reason="NamespaceRequired"} 1"#));
        assert!(text.contains("pod_network_reconcile_duration_seconds_count"));
    }
}
