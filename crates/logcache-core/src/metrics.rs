//! Counter and gauge capability interfaces.
//!
//! The store and routing layers report through these rather than a concrete
//! metrics backend, so tests can install spies and the server can plug in
//! its prometheus registry.

use std::sync::Arc;

/// Increments a named counter by a delta.
pub type CounterFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Sets a named gauge to a value.
pub type GaugeFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Registers counters and gauges by name.
pub trait Metrics: Send + Sync {
    fn counter(&self, name: &str) -> CounterFn;
    fn gauge(&self, name: &str) -> GaugeFn;
}

/// Discards every report. The default when no backend is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NopMetrics;

impl Metrics for NopMetrics {
    fn counter(&self, _name: &str) -> CounterFn {
        Arc::new(|_| {})
    }

    fn gauge(&self, _name: &str) -> GaugeFn {
        Arc::new(|_| {})
    }
}
