//! Hash-range ownership table.
//!
//! The table maps a source id to the index of the node owning it. Ownership
//! is an immutable snapshot replaced atomically: readers clone the current
//! `Arc` and never observe a half-installed mapping.

use std::collections::HashMap;
use std::sync::Arc;

use logcache_proto::v1::{Range, Ranges};
use parking_lot::RwLock;

use crate::error::RoutingError;
use crate::hash::source_hash;

/// Maps source ids to owning node indexes via consistent hashing.
pub struct RoutingTable {
    addrs: Vec<String>,
    local_index: usize,
    snapshot: RwLock<Arc<Snapshot>>,
}

#[derive(Debug)]
struct Snapshot {
    // Sorted by start; covers [0, u64::MAX] exactly.
    ranges: Vec<OwnedRange>,
}

#[derive(Debug, Clone, Copy)]
struct OwnedRange {
    start: u64,
    end: u64,
    node: usize,
}

impl RoutingTable {
    /// Creates a table for the given cluster layout. Until the scheduler
    /// installs an assignment, the local node owns the full hash space, so a
    /// single-node deployment works without orchestration.
    pub fn new(addrs: Vec<String>, local_index: usize) -> Self {
        let default = Snapshot {
            ranges: vec![OwnedRange {
                start: 0,
                end: u64::MAX,
                node: local_index,
            }],
        };

        Self {
            addrs,
            local_index,
            snapshot: RwLock::new(Arc::new(default)),
        }
    }

    /// The index of the node owning this source id.
    pub fn lookup(&self, source_id: &str) -> usize {
        self.lookup_hash(source_hash(source_id))
    }

    /// The index of the node owning this ring position.
    pub fn lookup_hash(&self, hash: u64) -> usize {
        let snapshot = Arc::clone(&self.snapshot.read());
        let idx = snapshot.ranges.partition_point(|r| r.start <= hash);
        snapshot
            .ranges
            .get(idx.wrapping_sub(1))
            .map(|r| r.node)
            .unwrap_or(self.local_index)
    }

    pub fn local_index(&self) -> usize {
        self.local_index
    }

    pub fn node_count(&self) -> usize {
        self.addrs.len()
    }

    /// Validates that the assignment partitions the full hash space exactly
    /// and publishes it as the new snapshot. Readers see either the old or
    /// the new mapping, never a mix.
    pub fn set_ranges(&self, assignments: &HashMap<String, Ranges>) -> Result<(), RoutingError> {
        let mut owned = Vec::new();
        for (addr, ranges) in assignments {
            let node = self
                .addrs
                .iter()
                .position(|a| a == addr)
                .ok_or_else(|| RoutingError::UnknownNode(addr.clone()))?;

            for range in &ranges.ranges {
                if range.start > range.end {
                    return Err(RoutingError::InvalidRange {
                        start: range.start,
                        end: range.end,
                    });
                }
                owned.push(OwnedRange {
                    start: range.start,
                    end: range.end,
                    node,
                });
            }
        }

        if owned.is_empty() {
            return Err(RoutingError::Empty);
        }

        owned.sort_by_key(|r| r.start);

        // Walk in u128 so end = u64::MAX needs no special case.
        let mut expected: u128 = 0;
        for range in &owned {
            if (range.start as u128) > expected {
                return Err(RoutingError::Gap(range.start));
            }
            if (range.start as u128) < expected {
                return Err(RoutingError::Overlap(range.start));
            }
            expected = range.end as u128 + 1;
        }
        if expected != u64::MAX as u128 + 1 {
            return Err(RoutingError::Uncovered((expected - 1) as u64));
        }

        *self.snapshot.write() = Arc::new(Snapshot { ranges: owned });
        Ok(())
    }

    /// The currently installed mapping, keyed by node address. Before any
    /// assignment this is the default full range owned by the local node.
    pub fn assignments(&self) -> HashMap<String, Ranges> {
        let snapshot = Arc::clone(&self.snapshot.read());

        let mut out: HashMap<String, Ranges> = HashMap::new();
        for range in &snapshot.ranges {
            let Some(addr) = self.addrs.get(range.node) else {
                continue;
            };
            out.entry(addr.clone()).or_default().ranges.push(Range {
                start: range.start,
                end: range.end,
            });
        }
        out
    }
}
