//! In-memory envelope store.
//!
//! The store keeps a bounded number of envelopes per source and a bounded
//! number overall, dropping the oldest data once either threshold is
//! exceeded. All operations are thread safe: reads take the read side of a
//! single readers-writer lock, writes and truncation take the write side.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use logcache_core::{CounterFn, EnvelopeExt, GaugeFn, Metrics};
use logcache_proto::v1::{Envelope, EnvelopeType, MetaInfo};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::error;

use crate::pruner::Pruner;

/// Cadence of the background pruner-driven truncation worker.
const TRUNCATION_INTERVAL: Duration = Duration::from_millis(500);

/// Concurrent, time-indexed, per-source envelope cache.
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    max_per_source: usize,
    min_size: usize,
    pruner: Arc<dyn Pruner>,

    state: RwLock<State>,

    // Completed background-truncation cycles, used by
    // wait_for_truncation_to_complete.
    generation: Mutex<u64>,
    truncated: Condvar,

    inc_ingress: CounterFn,
    inc_egress: CounterFn,
    inc_expired: CounterFn,
    set_cache_period: GaugeFn,
    set_store_size: GaugeFn,
}

#[derive(Default)]
struct State {
    indexes: HashMap<String, SourceIndex>,
    oldest: OldestIndex,
    count: usize,
}

struct SourceIndex {
    entries: logcache_core::PerSourceIndex,
    expired: i64,
}

impl SourceIndex {
    fn new() -> Self {
        Self {
            entries: logcache_core::PerSourceIndex::new(),
            expired: 0,
        }
    }
}

/// Orders source indexes by their minimum timestamp so truncation can pick
/// the globally oldest envelope. Multiple sources may share a minimum, so
/// each key holds a multiset of source ids.
#[derive(Default)]
struct OldestIndex {
    keys: BTreeMap<i64, Vec<String>>,
}

impl OldestIndex {
    fn insert(&mut self, ts: i64, source: String) {
        self.keys.entry(ts).or_default().push(source);
    }

    fn remove(&mut self, ts: i64, source: &str) {
        if let Some(sources) = self.keys.get_mut(&ts) {
            if let Some(pos) = sources.iter().position(|s| s == source) {
                sources.remove(pos);
            }
            if sources.is_empty() {
                self.keys.remove(&ts);
            }
        }
    }

    /// The source holding the globally oldest envelope.
    fn first(&self) -> Option<(i64, String)> {
        let (ts, sources) = self.keys.iter().next()?;
        sources.first().map(|s| (*ts, s.clone()))
    }

    fn min_key(&self) -> Option<i64> {
        self.keys.keys().next().copied()
    }
}

impl Store {
    /// Creates a store holding at most `max_per_source` envelopes per source.
    /// Truncation never reduces the total below `min_size`, whatever the
    /// pruner requests.
    pub fn new(
        max_per_source: usize,
        min_size: usize,
        pruner: Arc<dyn Pruner>,
        metrics: &dyn Metrics,
    ) -> Self {
        pruner.set_memory_reporter(metrics.gauge("MemoryUtilization"));

        let inner = Arc::new(Inner {
            max_per_source,
            min_size,
            pruner,
            state: RwLock::new(State::default()),
            generation: Mutex::new(0),
            truncated: Condvar::new(),
            inc_ingress: metrics.counter("Ingress"),
            inc_egress: metrics.counter("Egress"),
            inc_expired: metrics.counter("Expired"),
            set_cache_period: metrics.gauge("CachePeriod"),
            set_store_size: metrics.gauge("StoreSize"),
        });

        Self::start_truncation_worker(Arc::downgrade(&inner));

        Self { inner }
    }

    /// Runs pruner-driven truncation on a dedicated thread. The worker holds
    /// the write lock only per cycle and exits once the store is dropped.
    fn start_truncation_worker(inner: Weak<Inner>) {
        thread::spawn(move || loop {
            thread::sleep(TRUNCATION_INTERVAL);

            let Some(inner) = inner.upgrade() else {
                return;
            };

            {
                let mut state = inner.state.write();
                inner.truncate(&mut state);
                (inner.set_store_size)(state.count as f64);
            }

            let mut generation = inner.generation.lock();
            *generation += 1;
            inner.truncated.notify_all();
        });
    }

    /// Adds an envelope under the given source id. Never fails from the
    /// caller's perspective; capacity is reclaimed by evicting the oldest
    /// data first.
    pub fn put(&self, envelope: Envelope, source_id: &str) {
        (self.inner.inc_ingress)(1);

        let inner = &*self.inner;
        let mut state = inner.state.write();
        let State {
            indexes,
            oldest,
            count,
        } = &mut *state;

        let index = indexes
            .entry(source_id.to_string())
            .or_insert_with(SourceIndex::new);

        let old_min = index.entries.oldest();
        let pre_size = index.entries.len();

        if pre_size >= inner.max_per_source {
            // This source reached its quota; make room before inserting.
            index.entries.remove_oldest();
            index.expired += 1;
            (inner.inc_expired)(1);
        }

        if let Err(e) = index.entries.insert(envelope) {
            error!(source_id, error = %e, "dropping envelope");
        }

        *count = (*count + index.entries.len()) - pre_size;

        let new_min = index.entries.oldest();
        match (old_min, new_min) {
            (None, Some(min)) => oldest.insert(min, source_id.to_string()),
            (Some(old), Some(min)) if old != min => {
                oldest.remove(old, source_id);
                oldest.insert(min, source_id.to_string());
            }
            (Some(old), None) => {
                // The insert was dropped and the eviction emptied the index.
                oldest.remove(old, source_id);
                indexes.remove(source_id);
            }
            _ => {}
        }

        inner.truncate(&mut state);

        if let Some(global_min) = state.oldest.min_key() {
            let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            (inner.set_cache_period)(((now - global_min) / 1_000_000) as f64);
        }
        (inner.set_store_size)(state.count as f64);
    }

    /// Fetches envelopes for a source within `[start..end)`, oldest first
    /// unless `descending`. An empty filter matches any kind.
    pub fn get(
        &self,
        source_id: &str,
        start: i64,
        end: i64,
        filter: &[EnvelopeType],
        limit: usize,
        descending: bool,
    ) -> Vec<Envelope> {
        if limit == 0 {
            return Vec::new();
        }

        let state = self.inner.state.read();
        let Some(index) = state.indexes.get(source_id) else {
            return Vec::new();
        };

        let mut results = Vec::new();
        index.entries.scan(start, end, descending, |_, e| {
            if e.matches(filter) {
                results.push(e.clone());
            }
            results.len() < limit
        });

        (self.inner.inc_egress)(results.len() as u64);
        results
    }

    /// Per-source summaries for every source currently held.
    pub fn meta(&self) -> HashMap<String, MetaInfo> {
        let state = self.inner.state.read();
        state
            .indexes
            .iter()
            .map(|(source, index)| {
                (
                    source.clone(),
                    MetaInfo {
                        count: index.entries.len() as i64,
                        expired: index.expired,
                        oldest_timestamp: index.entries.oldest().unwrap_or_default(),
                        newest_timestamp: index.entries.newest().unwrap_or_default(),
                    },
                )
            })
            .collect()
    }

    /// Blocks until a background truncation cycle that started after this
    /// call has finished, so tests can observe the steady state.
    pub fn wait_for_truncation_to_complete(&self) {
        let mut generation = self.inner.generation.lock();
        let target = *generation + 2;
        while *generation < target {
            self.inner.truncated.wait(&mut generation);
        }
    }
}

impl Inner {
    /// Removes the globally oldest envelopes, up to the pruner's quota for
    /// this cycle and never below the configured floor.
    fn truncate(&self, state: &mut State) {
        let quota = self.pruner.quantity_to_prune(state.count as i64);
        let quota = quota.min(state.count.saturating_sub(self.min_size));

        for _ in 0..quota {
            let Some((ts, source)) = state.oldest.first() else {
                return;
            };

            let State {
                indexes,
                oldest,
                count,
            } = &mut *state;

            oldest.remove(ts, &source);

            let Some(index) = indexes.get_mut(&source) else {
                continue;
            };

            index.entries.remove_oldest();
            index.expired += 1;
            *count -= 1;
            (self.inc_expired)(1);

            if index.entries.is_empty() {
                indexes.remove(&source);
            } else if let Some(new_min) = index.entries.oldest() {
                oldest.insert(new_min, source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logcache_proto::v1::envelope::Message;
    use logcache_proto::v1::{Counter, Event, Gauge, Log, Timer};
    use std::sync::Arc;

    struct SpyMetrics {
        values: Arc<Mutex<HashMap<String, f64>>>,
    }

    impl SpyMetrics {
        fn new() -> Self {
            Self {
                values: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        fn value(&self, name: &str) -> f64 {
            self.values.lock().get(name).copied().unwrap_or_default()
        }
    }

    impl Metrics for SpyMetrics {
        fn counter(&self, name: &str) -> CounterFn {
            let values = Arc::clone(&self.values);
            let name = name.to_string();
            Arc::new(move |delta| {
                *values.lock().entry(name.clone()).or_default() += delta as f64;
            })
        }

        fn gauge(&self, name: &str) -> GaugeFn {
            let values = Arc::clone(&self.values);
            let name = name.to_string();
            Arc::new(move |value| {
                values.lock().insert(name.clone(), value);
            })
        }
    }

    struct SpyPruner {
        quantity: Mutex<usize>,
    }

    impl SpyPruner {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                quantity: Mutex::new(0),
            })
        }

        fn set_quantity_to_prune(&self, quantity: usize) {
            *self.quantity.lock() = quantity;
        }
    }

    impl Pruner for SpyPruner {
        fn quantity_to_prune(&self, _current_count: i64) -> usize {
            *self.quantity.lock()
        }
    }

    fn envelope(ts: i64, source_id: &str) -> Envelope {
        Envelope {
            timestamp: ts,
            source_id: source_id.to_string(),
            ..Default::default()
        }
    }

    fn typed_envelope(ts: i64, source_id: &str, message: Message) -> Envelope {
        Envelope {
            timestamp: ts,
            source_id: source_id.to_string(),
            message: Some(message),
            ..Default::default()
        }
    }

    fn timestamps(envelopes: &[Envelope]) -> Vec<i64> {
        envelopes.iter().map(|e| e.timestamp).collect()
    }

    #[test]
    fn fetches_data_based_on_time_and_source_id() {
        let metrics = SpyMetrics::new();
        let store = Store::new(5, 10, SpyPruner::new(), &metrics);

        for (ts, source) in [(1, "a"), (2, "b"), (3, "a"), (4, "a")] {
            store.put(envelope(ts, source), source);
        }

        let envelopes = store.get("a", 0, 4, &[], 10, false);
        assert_eq!(timestamps(&envelopes), vec![1, 3]);
        for e in &envelopes {
            assert_eq!(e.source_id, "a");
        }

        assert_eq!(metrics.value("Expired"), 0.0);
        assert_eq!(metrics.value("Ingress"), 4.0);
        assert_eq!(metrics.value("Egress"), 2.0);
    }

    #[test]
    fn returns_a_maximum_number_of_envelopes_in_ascending_order() {
        let store = Store::new(5, 10, SpyPruner::new(), &SpyMetrics::new());
        for ts in 1..=4 {
            store.put(envelope(ts, "a"), "a");
        }

        let envelopes = store.get("a", 0, 9999, &[], 3, false);
        assert_eq!(timestamps(&envelopes), vec![1, 2, 3]);
    }

    #[test]
    fn start_is_inclusive_and_end_is_exclusive() {
        let store = Store::new(5, 10, SpyPruner::new(), &SpyMetrics::new());
        for ts in [0, 1, 2] {
            store.put(envelope(ts, "a"), "a");
        }

        let envelopes = store.get("a", 0, 2, &[], 3, false);
        assert_eq!(timestamps(&envelopes), vec![0, 1]);
    }

    #[test]
    fn returns_a_maximum_number_of_envelopes_in_descending_order() {
        let store = Store::new(5, 10, SpyPruner::new(), &SpyMetrics::new());
        for ts in 1..=4 {
            store.put(envelope(ts, "a"), "a");
        }

        let envelopes = store.get("a", 0, 9999, &[], 3, true);
        assert_eq!(timestamps(&envelopes), vec![4, 3, 2]);
    }

    #[test]
    fn increments_the_timestamp_to_prevent_overwrites() {
        let store = Store::new(50, 10, SpyPruner::new(), &SpyMetrics::new());
        for _ in 0..4 {
            store.put(envelope(1, "a"), "a");
        }

        let envelopes = store.get("a", 0, 9999, &[], 10, false);
        assert_eq!(timestamps(&envelopes), vec![1, 2, 3, 4]);
        assert_eq!(store.meta()["a"].count, 4);
    }

    #[test]
    fn fetches_data_based_on_envelope_type() {
        let store = Store::new(10, 10, SpyPruner::new(), &SpyMetrics::new());
        store.put(typed_envelope(1, "a", Message::Log(Log::default())), "a");
        store.put(
            typed_envelope(2, "a", Message::Counter(Counter::default())),
            "a",
        );
        store.put(
            typed_envelope(3, "a", Message::Gauge(Gauge::default())),
            "a",
        );
        store.put(
            typed_envelope(4, "a", Message::Timer(Timer::default())),
            "a",
        );
        store.put(
            typed_envelope(5, "a", Message::Event(Event::default())),
            "a",
        );

        for (filter, want_ts) in [
            (EnvelopeType::Log, 1),
            (EnvelopeType::Counter, 2),
            (EnvelopeType::Gauge, 3),
            (EnvelopeType::Timer, 4),
            (EnvelopeType::Event, 5),
        ] {
            let envelopes = store.get("a", 0, 9999, &[filter], 5, false);
            assert_eq!(timestamps(&envelopes), vec![want_ts]);
        }

        // No filter.
        assert_eq!(store.get("a", 0, 9999, &[], 10, false).len(), 5);
    }

    #[test]
    fn truncates_envelopes_for_a_source_when_its_max_size_is_reached() {
        let metrics = SpyMetrics::new();
        let store = Store::new(2, 2, SpyPruner::new(), &metrics);

        store.put(typed_envelope(1, "b", Message::Log(Log::default())), "b");
        for ts in [2, 3, 4] {
            store.put(typed_envelope(ts, "a", Message::Log(Log::default())), "a");
        }

        let envelopes = store.get("a", 0, 9999, &[], 10, false);
        assert_eq!(timestamps(&envelopes), vec![3, 4]);

        let envelopes = store.get("b", 0, 9999, &[], 10, false);
        assert_eq!(timestamps(&envelopes), vec![1]);

        assert_eq!(metrics.value("Expired"), 1.0);
    }

    #[test]
    fn truncates_older_envelopes_when_max_size_is_reached() {
        let metrics = SpyMetrics::new();
        let pruner = SpyPruner::new();
        let store = Store::new(10, 5, Arc::clone(&pruner) as Arc<dyn Pruner>, &metrics);

        store.put(typed_envelope(1, "b", Message::Log(Log::default())), "b");
        store.put(typed_envelope(2, "a", Message::Log(Log::default())), "a");
        // Ties roll forward to 3, 4, 5, 6, 7.
        for _ in 0..5 {
            store.put(typed_envelope(3, "a", Message::Log(Log::default())), "a");
        }
        // Late arrival, still the second-oldest envelope for "a".
        store.put(typed_envelope(1, "a", Message::Log(Log::default())), "a");

        store.wait_for_truncation_to_complete();
        pruner.set_quantity_to_prune(3);
        store.wait_for_truncation_to_complete();

        let envelopes = store.get("a", 0, 9999, &[], 10, false);
        assert_eq!(timestamps(&envelopes), vec![3, 4, 5, 6, 7]);

        assert_eq!(metrics.value("Expired"), 3.0);
        assert_eq!(metrics.value("StoreSize"), 5.0);

        // "b" was fully forgotten.
        let meta = store.meta();
        assert!(meta.contains_key("a"));
        assert!(!meta.contains_key("b"));
    }

    #[test]
    fn survives_being_over_pruned() {
        let pruner = SpyPruner::new();
        pruner.set_quantity_to_prune(1000);
        let store = Store::new(10, 10, Arc::clone(&pruner) as Arc<dyn Pruner>, &SpyMetrics::new());

        store.put(typed_envelope(0, "b", Message::Log(Log::default())), "b");
        store.wait_for_truncation_to_complete();

        assert_eq!(store.get("b", 0, 9999, &[], 10, false).len(), 1);
    }

    #[test]
    fn prunes_the_just_added_entry_when_it_is_the_oldest() {
        let pruner = SpyPruner::new();
        let store = Store::new(2, 2, Arc::clone(&pruner) as Arc<dyn Pruner>, &SpyMetrics::new());

        store.put(typed_envelope(2, "index-0", Message::Log(Log::default())), "index-0");
        store.put(typed_envelope(3, "index-0", Message::Log(Log::default())), "index-0");
        store.put(typed_envelope(1, "index-1", Message::Log(Log::default())), "index-1");

        store.wait_for_truncation_to_complete();
        pruner.set_quantity_to_prune(1);
        store.wait_for_truncation_to_complete();

        assert!(!store.meta().contains_key("index-1"));
    }

    #[test]
    fn meta_reports_the_sources_in_the_store() {
        let pruner = SpyPruner::new();
        let store = Store::new(2, 2, Arc::clone(&pruner) as Arc<dyn Pruner>, &SpyMetrics::new());

        // Will be pruned below.
        store.put(typed_envelope(1, "index-0", Message::Log(Log::default())), "index-0");
        store.put(typed_envelope(2, "index-1", Message::Log(Log::default())), "index-1");

        // Timestamp 3 rolls out when the per-source cap of 2 is exceeded.
        store.put(typed_envelope(3, "index-2", Message::Log(Log::default())), "index-2");
        store.put(typed_envelope(4, "index-2", Message::Log(Log::default())), "index-2");
        store.put(typed_envelope(5, "index-2", Message::Log(Log::default())), "index-2");

        store.put(typed_envelope(6, "index-1", Message::Log(Log::default())), "index-1");

        store.wait_for_truncation_to_complete();
        pruner.set_quantity_to_prune(2);
        store.wait_for_truncation_to_complete();

        let meta = store.meta();
        assert_eq!(meta.len(), 2);

        assert_eq!(
            meta["index-1"],
            MetaInfo {
                count: 1,
                expired: 1,
                oldest_timestamp: 6,
                newest_timestamp: 6,
            }
        );
        assert_eq!(
            meta["index-2"],
            MetaInfo {
                count: 2,
                expired: 1,
                oldest_timestamp: 4,
                newest_timestamp: 5,
            }
        );
    }

    #[test]
    fn sets_the_cache_period_in_milliseconds() {
        let metrics = SpyMetrics::new();
        let store = Store::new(5, 10, SpyPruner::new(), &metrics);

        let minute_ago = Utc::now().timestamp_nanos_opt().unwrap() - 60_000_000_000;
        store.put(envelope(minute_ago, "b"), "b");

        let period = metrics.value("CachePeriod");
        assert!((period - 60_000.0).abs() < 1_000.0, "period = {period}");
    }

    #[test]
    fn uses_the_given_index_over_the_envelope_source_id() {
        let store = Store::new(2, 2, SpyPruner::new(), &SpyMetrics::new());
        store.put(envelope(0, "a"), "some-id");

        assert_eq!(store.get("some-id", 0, 9999, &[], 10, false).len(), 1);
        assert!(store.get("a", 0, 9999, &[], 10, false).is_empty());
    }

    #[test]
    fn total_count_tracks_per_source_counts() {
        let store = Store::new(3, 100, SpyPruner::new(), &SpyMetrics::new());
        for i in 0..10 {
            for source in ["a", "b", "c"] {
                store.put(envelope(i, source), source);
            }
        }

        let meta = store.meta();
        for source in ["a", "b", "c"] {
            assert_eq!(meta[source].count, 3);
            assert_eq!(meta[source].expired, 7);
        }
    }

    #[test]
    fn is_thread_safe() {
        let store = Arc::new(Store::new(1000, 1000, SpyPruner::new(), &SpyMetrics::new()));

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for ts in 0..500 {
                    store.put(envelope(ts, "a"), "a");
                }
            })
        };
        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..100 {
                    store.get("a", 0, i64::MAX, &[], 1000, false);
                    store.meta();
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(store.get("a", 0, i64::MAX, &[], 1000, false).len(), 500);
    }
}
