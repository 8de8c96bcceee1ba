//! Concurrent per-key state.
//!
//! The state store is the only mutable shared state in the engine: a
//! counter map keyed by algorithm-qualified throttle keys and a block map
//! keyed by plain throttle keys. All mutation goes through atomic per-key
//! operations; keys only ever contend at shard granularity, never on a
//! global lock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::strategy::CounterRecord;

/// An active block short-circuiting all decisions for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
    /// When the block expires (epoch ms).
    pub blocked_until: u64,
}

/// Key-to-record cache with lazy expiry and periodic sweep.
///
/// Records are created and mutated by the request path but removed only by
/// [`StateStore::sweep`], keeping the hot path free of removals.
#[derive(Debug, Default)]
pub struct StateStore {
    /// Counter records, keyed by `"<strategy>|<throttle-key>"`.
    counters: DashMap<String, CounterRecord>,
    /// Block records, keyed by the plain throttle key.
    blocks: DashMap<String, BlockRecord>,
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically read-compute-write the record for a key.
    ///
    /// The closure runs under the key's entry lock, so two concurrent
    /// requests for the same key always observe each other's updates. The
    /// closure must stay cheap; it is pure strategy arithmetic.
    pub fn apply<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&CounterRecord>) -> (T, CounterRecord),
    ) -> T {
        match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let (value, record) = f(Some(occupied.get()));
                *occupied.get_mut() = record;
                value
            }
            Entry::Vacant(vacant) => {
                let (value, record) = f(None);
                vacant.insert(record);
                value
            }
        }
    }

    /// Snapshot the record for a key, if any.
    pub fn get(&self, key: &str) -> Option<CounterRecord> {
        self.counters.get(key).map(|r| r.value().clone())
    }

    /// The block for a key, if one is still live at `now_ms`.
    ///
    /// Expired blocks are left in place for the sweep to collect.
    pub fn active_block(&self, key: &str, now_ms: u64) -> Option<BlockRecord> {
        self.blocks
            .get(key)
            .map(|b| *b)
            .filter(|b| b.blocked_until > now_ms)
    }

    /// Record a block for a key until `blocked_until`.
    pub fn put_block(&self, key: &str, blocked_until: u64) {
        self.blocks
            .insert(key.to_string(), BlockRecord { blocked_until });
    }

    /// Remove expired counters and blocks, returning how many were dropped.
    ///
    /// A counter whose window has passed survives while a live block still
    /// references its base key, so the block's expiry is observable even if
    /// no request arrives in between. Both maps are walked shard by shard;
    /// unrelated `get`/`apply` calls proceed concurrently.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let mut removed = 0usize;

        self.blocks.retain(|_, block| {
            if block.blocked_until > now_ms {
                true
            } else {
                removed += 1;
                false
            }
        });

        self.counters.retain(|key, record| {
            if record.window_reset_at > now_ms {
                return true;
            }
            let base_key = key.split_once('|').map(|(_, base)| base).unwrap_or(key);
            if self
                .blocks
                .get(base_key)
                .is_some_and(|b| b.blocked_until > now_ms)
            {
                return true;
            }
            removed += 1;
            false
        });

        if removed > 0 {
            debug!(removed, "Swept expired throttle state");
        }
        removed
    }

    /// Number of live counter records.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Number of block records, expired or not.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Drop all state. Primarily useful for tests.
    pub fn clear(&self) {
        self.counters.clear();
        self.blocks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(count: u64, window_reset_at: u64) -> CounterRecord {
        CounterRecord {
            count,
            window_reset_at,
            tokens: 0.0,
            last_refill_at: 0,
        }
    }

    #[test]
    fn test_apply_creates_then_mutates() {
        let store = StateStore::new();

        let seen = store.apply("fixed-window|ip:10.0.0.1", |existing| {
            assert!(existing.is_none());
            (0u64, record(1, 1000))
        });
        assert_eq!(seen, 0);

        let seen = store.apply("fixed-window|ip:10.0.0.1", |existing| {
            let count = existing.unwrap().count + 1;
            (count, record(count, 1000))
        });
        assert_eq!(seen, 2);
        assert_eq!(store.counter_count(), 1);
    }

    #[test]
    fn test_apply_has_no_lost_updates_under_contention() {
        let store = Arc::new(StateStore::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    store.apply("sliding-window|ip:10.0.0.1", |existing| {
                        let count = existing.map(|r| r.count).unwrap_or(0) + 1;
                        ((), record(count, u64::MAX))
                    });
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get("sliding-window|ip:10.0.0.1").unwrap().count, 2000);
    }

    #[test]
    fn test_active_block_ignores_expired() {
        let store = StateStore::new();
        store.put_block("ip:10.0.0.1", 5000);

        assert!(store.active_block("ip:10.0.0.1", 4999).is_some());
        assert!(store.active_block("ip:10.0.0.1", 5000).is_none());
        // Expired blocks stay until the sweep runs.
        assert_eq!(store.block_count(), 1);
    }

    #[test]
    fn test_sweep_removes_expired_state() {
        let store = StateStore::new();
        store.apply("fixed-window|ip:a", |_| ((), record(3, 1000)));
        store.apply("fixed-window|ip:b", |_| ((), record(1, 9000)));
        store.put_block("ip:a", 800);

        let removed = store.sweep(2000);
        assert_eq!(removed, 2); // counter for ip:a and its block
        assert_eq!(store.counter_count(), 1);
        assert_eq!(store.block_count(), 0);
        assert!(store.get("fixed-window|ip:b").is_some());
    }

    #[test]
    fn test_sweep_keeps_counter_under_live_block() {
        let store = StateStore::new();
        store.apply("token-bucket|user:u-1#rule", |_| ((), record(9, 1000)));
        store.put_block("user:u-1#rule", 60_000);

        // Window expired but the block is live: the counter survives.
        let removed = store.sweep(2000);
        assert_eq!(removed, 0);
        assert_eq!(store.counter_count(), 1);

        // Once the block expires both go.
        let removed = store.sweep(60_001);
        assert_eq!(removed, 2);
        assert_eq!(store.counter_count(), 0);
    }
}
