//! Size-or-interval batching for forwarded envelopes.

use std::time::{Duration, Instant};

use logcache_proto::v1::Envelope;

/// Accumulates envelopes and emits a batch once either the size threshold
/// or the linger interval is hit.
pub struct Batcher {
    batch: Vec<Envelope>,
    max_size: usize,
    interval: Duration,
    last_flush: Instant,
}

impl Batcher {
    pub fn new(max_size: usize, interval: Duration) -> Self {
        Self {
            batch: Vec::with_capacity(max_size),
            max_size,
            interval,
            last_flush: Instant::now(),
        }
    }

    /// Adds an envelope, returning a full batch when a threshold fires.
    pub fn write(&mut self, envelope: Envelope) -> Option<Vec<Envelope>> {
        self.batch.push(envelope);

        if self.batch.len() >= self.max_size || self.last_flush.elapsed() >= self.interval {
            return self.flush();
        }
        None
    }

    /// Emits whatever is buffered, resetting the linger timer.
    pub fn flush(&mut self) -> Option<Vec<Envelope>> {
        self.last_flush = Instant::now();
        if self.batch.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.batch))
    }
}
