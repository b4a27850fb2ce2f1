//! Metrics Registry (§4.9): monotonic counters and last-value gauges behind
//! flat string names, read concurrently from the HTTP status surface while
//! written from the dispatch hot path — so it must never take a lock wider
//! than a single entry.

use dashmap::DashMap;

/// A single named metric, either a monotonically increasing counter or a
/// last-write-wins gauge. Both are represented as `f64` to accommodate
/// fractional gauges like `last_call_duration`.
#[derive(Debug, Clone, Copy)]
enum MetricValue {
    Counter(f64),
    Gauge(f64),
}

/// Flat-namespace metrics store. Cheap to clone (wraps an `Arc` internally
/// via `DashMap`'s own sharding); the dispatcher, scheduler, and load
/// generator each hold a handle.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    values: DashMap<String, MetricValue>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic-add a counter by `delta` (default 1.0 at call sites that don't
    /// care). Creates the counter at `delta` if it doesn't exist yet.
    pub fn inc(&self, name: &str, delta: f64) {
        self.values
            .entry(name.to_string())
            .and_modify(|v| {
                if let MetricValue::Counter(c) = v {
                    *c += delta;
                } else {
                    *v = MetricValue::Counter(delta);
                }
            })
            .or_insert(MetricValue::Counter(delta));
    }

    /// Last-write-wins gauge set.
    pub fn set(&self, name: &str, value: f64) {
        self.values.insert(name.to_string(), MetricValue::Gauge(value));
    }

    /// Point read of a single metric, if present.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).map(|v| match *v {
            MetricValue::Counter(c) => c,
            MetricValue::Gauge(g) => g,
        })
    }

    /// Flat snapshot of every metric currently registered.
    pub fn snapshot(&self) -> std::collections::HashMap<String, f64> {
        self.values
            .iter()
            .map(|entry| {
                let value = match *entry.value() {
                    MetricValue::Counter(c) => c,
                    MetricValue::Gauge(g) => g,
                };
                (entry.key().clone(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.inc("calls_assigned", 1.0);
        metrics.inc("calls_assigned", 1.0);
        metrics.inc("calls_assigned", 1.0);
        assert_eq!(metrics.get("calls_assigned"), Some(3.0));
    }

    #[test]
    fn gauges_are_last_write_wins() {
        let metrics = MetricsRegistry::new();
        metrics.set("last_assignment_time_ms", 12.0);
        metrics.set("last_assignment_time_ms", 45.0);
        assert_eq!(metrics.get("last_assignment_time_ms"), Some(45.0));
    }

    #[test]
    fn snapshot_contains_all_registered_metrics() {
        let metrics = MetricsRegistry::new();
        metrics.inc("calls_ok", 5.0);
        metrics.set("last_call_duration", 92.3);
        let snap = metrics.snapshot();
        assert_eq!(snap.get("calls_ok"), Some(&5.0));
        assert_eq!(snap.get("last_call_duration"), Some(&92.3));
    }
}
