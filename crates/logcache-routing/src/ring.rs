//! Bounded lossy ring between ingress producers and the peer flusher.
//!
//! Producers never block: when the ring is full the oldest pending element
//! is displaced and counted. The flusher drains drops periodically and
//! reports them in one summary.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;

/// Fixed-capacity drop-oldest queue with a dropped-element counter.
pub struct LossyRing<T> {
    queue: ArrayQueue<T>,
    dropped: AtomicU64,
}

impl<T> LossyRing<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues without blocking, displacing the oldest element when full.
    pub fn push(&self, value: T) {
        if self.queue.force_push(value).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Returns the number of drops since the last call and resets it.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_fifo_order() {
        let ring = LossyRing::new(4);
        for i in 0..3 {
            ring.push(i);
        }

        assert_eq!(ring.pop(), Some(0));
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn overflow_displaces_the_oldest() {
        let ring = LossyRing::new(3);
        for i in 0..5 {
            ring.push(i);
        }

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(4));
    }

    #[test]
    fn counts_and_resets_drops() {
        let ring = LossyRing::new(2);
        for i in 0..5 {
            ring.push(i);
        }

        assert_eq!(ring.take_dropped(), 3);
        assert_eq!(ring.take_dropped(), 0);
    }
}
