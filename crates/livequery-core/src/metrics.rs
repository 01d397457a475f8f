//! Injected metrics collaborator.
//!
//! There is no process-wide registry; whoever constructs the engine passes
//! a sink, and test setups pass [`NullMetrics`].

/// Sink for operational metrics.
pub trait MetricsSink: Send + Sync {
    /// Increment a counter by one.
    fn inc_counter(&self, name: &str, labels: &[(&str, &str)]);

    /// Record one observation of a distribution (latency, sizes).
    fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Set a gauge to an absolute value.
    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Metrics sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn inc_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}
    fn observe(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
    fn set_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}
