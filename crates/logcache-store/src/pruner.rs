//! Eviction policy for the store's truncation cycle.
//!
//! The store asks its pruner how many envelopes to evict each cycle and
//! never prunes below its configured floor, whatever the answer. Decoupling
//! the policy lets tests install a fixed-quantity variant.

use std::time::{Duration, Instant};

use logcache_core::GaugeFn;
use parking_lot::Mutex;

use crate::memory::{MemoryReader, MemoryUsage};

/// How long a memory sample stays fresh. Keeps sampling cost out of the
/// store's write-lock hot path.
const SAMPLE_MAX_AGE: Duration = Duration::from_secs(1);

/// Decides how many envelopes the store should evict on the next cycle.
pub trait Pruner: Send + Sync {
    fn quantity_to_prune(&self, current_count: i64) -> usize;

    /// Subscribes a gauge that receives the memory-used percentage each time
    /// the pruner samples it. Policies that do not sample may ignore this.
    fn set_memory_reporter(&self, _reporter: GaugeFn) {}
}

/// Prunes a fixed quantity per cycle regardless of memory pressure. With a
/// quantity of zero the store only ever evicts via its per-source caps.
pub struct StaticPruner {
    quantity: usize,
}

impl StaticPruner {
    pub fn new(quantity: usize) -> Self {
        Self { quantity }
    }
}

impl Pruner for StaticPruner {
    fn quantity_to_prune(&self, _current_count: i64) -> usize {
        self.quantity
    }
}

/// Memory-aware pruning policy: while the process's share of system memory
/// exceeds the high watermark, evict a fixed percentage of the current count
/// per cycle.
pub struct PruneConsultant {
    percent_batch: u64,
    high_watermark: f64,
    sampler: Mutex<Sampler>,
    reporter: Mutex<Option<GaugeFn>>,
}

struct Sampler {
    reader: Box<dyn MemoryReader>,
    taken_at: Option<Instant>,
    last: MemoryUsage,
}

impl Sampler {
    fn sample(&mut self) -> MemoryUsage {
        let stale = self
            .taken_at
            .map_or(true, |t| t.elapsed() >= SAMPLE_MAX_AGE);
        if stale {
            self.last = self.reader.memory();
            self.taken_at = Some(Instant::now());
        }
        self.last
    }
}

impl PruneConsultant {
    /// `percent_batch` is the percentage of the current count evicted per
    /// cycle while memory usage sits above `high_watermark` percent.
    pub fn new(percent_batch: u64, high_watermark: f64, reader: Box<dyn MemoryReader>) -> Self {
        Self {
            percent_batch,
            high_watermark,
            sampler: Mutex::new(Sampler {
                reader,
                taken_at: None,
                last: MemoryUsage::default(),
            }),
            reporter: Mutex::new(None),
        }
    }
}

impl Pruner for PruneConsultant {
    fn quantity_to_prune(&self, current_count: i64) -> usize {
        let usage = self.sampler.lock().sample();
        let used = usage.percent_used();

        if let Some(reporter) = self.reporter.lock().as_ref() {
            reporter(used);
        }

        if used <= self.high_watermark || current_count <= 0 {
            return 0;
        }

        let quota = (current_count as f64 * self.percent_batch as f64 / 100.0).ceil();
        quota as usize
    }

    fn set_memory_reporter(&self, reporter: GaugeFn) {
        *self.reporter.lock() = Some(reporter);
    }
}
