//! Prometheus-backed implementation of the metric capabilities.

use std::collections::HashMap;
use std::sync::Arc;

use logcache_core::{CounterFn, GaugeFn, Metrics};
use parking_lot::Mutex;
use prometheus::{Gauge, IntCounter, Registry};
use tracing::warn;

/// Registers Log Cache counters and gauges in a prometheus [`Registry`],
/// which the health endpoint exposes as `/metrics`.
pub struct PromMetrics {
    registry: Arc<Registry>,
    counters: Mutex<HashMap<String, IntCounter>>,
    gauges: Mutex<HashMap<String, Gauge>>,
}

impl PromMetrics {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }
}

impl Metrics for PromMetrics {
    fn counter(&self, name: &str) -> CounterFn {
        let mut counters = self.counters.lock();
        if let Some(existing) = counters.get(name) {
            let counter = existing.clone();
            return Arc::new(move |delta| counter.inc_by(delta));
        }

        let metric = match IntCounter::new(metric_name(name), format!("Log Cache {name} counter"))
        {
            Ok(metric) => metric,
            Err(e) => {
                warn!(name, error = %e, "failed to create counter");
                return Arc::new(|_| {});
            }
        };

        if let Err(e) = self.registry.register(Box::new(metric.clone())) {
            warn!(name, error = %e, "failed to register counter");
        }
        counters.insert(name.to_string(), metric.clone());

        Arc::new(move |delta| metric.inc_by(delta))
    }

    fn gauge(&self, name: &str) -> GaugeFn {
        let mut gauges = self.gauges.lock();
        if let Some(existing) = gauges.get(name) {
            let gauge = existing.clone();
            return Arc::new(move |value| gauge.set(value));
        }

        let metric = match Gauge::new(metric_name(name), format!("Log Cache {name} gauge")) {
            Ok(metric) => metric,
            Err(e) => {
                warn!(name, error = %e, "failed to create gauge");
                return Arc::new(|_| {});
            }
        };

        if let Err(e) = self.registry.register(Box::new(metric.clone())) {
            warn!(name, error = %e, "failed to register gauge");
        }
        gauges.insert(name.to_string(), metric.clone());

        Arc::new(move |value| metric.set(value))
    }
}

/// `CachePeriod` becomes `logcache_cache_period`.
fn metric_name(name: &str) -> String {
    let mut out = String::from("logcache");
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
