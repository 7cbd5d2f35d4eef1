//! Time-ordered envelope index for a single source.
//!
//! A `BTreeMap` keyed by timestamp gives the O(log n + k) bounded range
//! scans the read path needs, in either direction. Keys are kept strictly
//! unique: an insert whose timestamp is already taken rolls forward one
//! nanosecond at a time until it finds a free slot, preserving submission
//! order without overwriting.

use std::collections::BTreeMap;

use logcache_proto::v1::Envelope;

use crate::error::{Error, Result};

/// Upper bound on the collision roll-forward run. A run this long means the
/// same source is stamping faster than nanosecond resolution can absorb.
const MAX_COLLISION_PROBE: i64 = 1000;

/// Ordered map from timestamp to envelope for one source id.
#[derive(Debug, Default)]
pub struct PerSourceIndex {
    entries: BTreeMap<i64, Envelope>,
}

impl PerSourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The smallest timestamp currently held.
    pub fn oldest(&self) -> Option<i64> {
        self.entries.keys().next().copied()
    }

    /// The largest timestamp currently held.
    pub fn newest(&self) -> Option<i64> {
        self.entries.keys().next_back().copied()
    }

    /// Removes and returns the oldest entry.
    pub fn remove_oldest(&mut self) -> Option<(i64, Envelope)> {
        let key = self.oldest()?;
        self.entries.remove(&key).map(|e| (key, e))
    }

    /// Inserts the envelope, incrementing its timestamp until the key is
    /// free. Returns the timestamp actually used; the stored envelope's
    /// timestamp field is updated to match.
    pub fn insert(&mut self, mut envelope: Envelope) -> Result<i64> {
        let requested = envelope.timestamp;
        let mut ts = requested;

        while self.entries.contains_key(&ts) {
            if ts - requested >= MAX_COLLISION_PROBE {
                return Err(Error::CollisionProbeExhausted(MAX_COLLISION_PROBE));
            }
            ts = ts
                .checked_add(1)
                .ok_or(Error::CollisionProbeExhausted(MAX_COLLISION_PROBE))?;
        }

        envelope.timestamp = ts;
        self.entries.insert(ts, envelope);
        Ok(ts)
    }

    /// Visits entries with `start <= timestamp < end` in the requested
    /// direction. The visitor returns `false` to stop early.
    pub fn scan<F>(&self, start: i64, end: i64, descending: bool, mut visit: F)
    where
        F: FnMut(i64, &Envelope) -> bool,
    {
        if start >= end {
            return;
        }

        if descending {
            for (ts, e) in self.entries.range(start..end).rev() {
                if !visit(*ts, e) {
                    return;
                }
            }
        } else {
            for (ts, e) in self.entries.range(start..end) {
                if !visit(*ts, e) {
                    return;
                }
            }
        }
    }
}
