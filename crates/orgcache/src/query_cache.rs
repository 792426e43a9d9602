//! Cross-session query cache
//!
//! One instance is shared by every unit of work. Values are kept as
//! serde_json bytes in a bounded LRU, so each hit decodes a fresh instance.
//!
//! Invalidation is per kind and coarse: a write to a kind drops every entry
//! whose key reads that kind and bumps the kind's generation. Readers that
//! miss take a [`FillTicket`] before going to the store; the fetched value is
//! only stored if no generation the key depends on moved in between.

use orgstore::EntityKind;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::key::{CacheKey, KindSet};
use crate::lru::LruCache;
use crate::stats::CacheStats;

struct State {
    entries: LruCache<CacheKey, Vec<u8>>,
    generations: [u64; 3],
}

/// Generations observed before a cache-miss fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket {
    generations: [u64; 3],
    dependencies: KindSet,
}

/// Shared LRU tier with per-kind invalidation
pub struct QueryCache {
    state: RwLock<State>,
    stats: CacheStats,
    enabled: bool,
}

impl QueryCache {
    /// Enabled cache holding at most `capacity` results
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(State {
                entries: LruCache::new(capacity),
                generations: [0; 3],
            }),
            stats: CacheStats::new(),
            enabled: true,
        }
    }

    /// Cache that never stores anything
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(1)
        }
    }

    /// Cache sized and switched by `config`
    pub fn from_config(config: &CacheConfig) -> Self {
        if config.shared {
            Self::new(config.capacity)
        } else {
            Self::disabled()
        }
    }

    /// Whether lookups can ever hit
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached result for `key`
    ///
    /// An entry that no longer decodes as `T` is dropped and reported as a
    /// miss.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let mut state = self.state.write();
        let decoded = state
            .entries
            .get(key)
            .map(|bytes| serde_json::from_slice::<T>(bytes));

        match decoded {
            Some(Ok(value)) => {
                self.stats.record_hit();
                debug!(key = %key, "shared cache hit");
                Some(value)
            }
            Some(Err(err)) => {
                state.entries.remove(key);
                self.stats.record_miss();
                warn!(key = %key, error = %err, "dropping undecodable cache entry");
                None
            }
            None => {
                self.stats.record_miss();
                debug!(key = %key, "shared cache miss");
                None
            }
        }
    }

    /// Store a result unconditionally; false if disabled or unencodable
    pub fn put<T: Serialize>(&self, key: CacheKey, value: &T) -> bool {
        let Some(bytes) = self.encode(&key, value) else {
            return false;
        };
        let mut state = self.state.write();
        self.store(&mut state, key, bytes);
        true
    }

    /// Snapshot the generations `key` depends on
    pub fn ticket(&self, key: &CacheKey) -> FillTicket {
        FillTicket {
            generations: self.state.read().generations,
            dependencies: key.dependencies(),
        }
    }

    /// Store a fetched result unless a write to one of its kinds happened
    /// after `ticket` was taken
    pub fn fill<T: Serialize>(&self, ticket: FillTicket, key: CacheKey, value: &T) -> bool {
        let Some(bytes) = self.encode(&key, value) else {
            return false;
        };

        let mut state = self.state.write();
        let stale = ticket
            .dependencies
            .iter()
            .any(|kind| state.generations[kind.ordinal()] != ticket.generations[kind.ordinal()]);
        if stale {
            self.stats.record_stale_fill();
            warn!(key = %key, "rejecting cache fill raced by a write");
            return false;
        }

        self.store(&mut state, key, bytes);
        true
    }

    /// Drop every entry that reads `kind`, returning how many went
    pub fn invalidate(&self, kind: EntityKind) -> usize {
        let mut state = self.state.write();
        state.generations[kind.ordinal()] += 1;
        let removed = state.entries.remove_where(|key| key.reads(kind));
        drop(state);

        self.stats.record_invalidations(removed as u64);
        info!(kind = %kind, removed, "invalidated shared cache");
        removed
    }

    /// Drop everything
    pub fn invalidate_all(&self) -> usize {
        let mut state = self.state.write();
        for generation in state.generations.iter_mut() {
            *generation += 1;
        }
        let removed = state.entries.len();
        state.entries.clear();
        drop(state);

        self.stats.record_invalidations(removed as u64);
        info!(removed, "invalidated entire shared cache");
        removed
    }

    /// Whether `key` is cached (no recency or stats change)
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.read().entries.contains(key)
    }

    /// Number of cached results
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached results
    pub fn capacity(&self) -> usize {
        self.state.read().entries.capacity()
    }

    /// Hit, miss, insert, eviction and invalidation counters
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn encode<T: Serialize>(&self, key: &CacheKey, value: &T) -> Option<Vec<u8>> {
        if !self.enabled {
            return None;
        }
        match serde_json::to_vec(value) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(key = %key, error = %err, "cache value not encodable");
                None
            }
        }
    }

    fn store(&self, state: &mut State, key: CacheKey, bytes: Vec<u8>) {
        debug!(key = %key, bytes = bytes.len(), "shared cache put");
        if let Some((evicted, _)) = state.entries.put(key, bytes) {
            self.stats.record_eviction();
            debug!(key = %evicted, "shared cache eviction");
        }
        self.stats.record_insert();
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn by_id(kind: EntityKind, id: i64) -> CacheKey {
        CacheKey::new(kind, "by_id").param(id)
    }

    #[test]
    fn test_put_then_get() {
        let cache = QueryCache::new(8);
        let key = by_id(EntityKind::User, 1);

        assert_eq!(cache.get::<String>(&key), None);
        assert!(cache.put(key.clone(), &"Alice".to_string()));
        assert_eq!(cache.get::<String>(&key), Some("Alice".to_string()));

        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().inserts(), 1);
    }

    #[test]
    fn test_invalidate_drops_only_dependent_keys() {
        let cache = QueryCache::new(8);
        let user = by_id(EntityKind::User, 1);
        let order = by_id(EntityKind::Order, 1);
        let joined = by_id(EntityKind::User, 1).with_related(EntityKind::Order);

        cache.put(user.clone(), &1);
        cache.put(order.clone(), &2);
        cache.put(joined.clone(), &3);

        assert_eq!(cache.invalidate(EntityKind::Order), 2);
        assert!(cache.contains(&user));
        assert!(!cache.contains(&order));
        assert!(!cache.contains(&joined));
        assert_eq!(cache.get::<i32>(&order), None);
        assert_eq!(cache.stats().invalidations(), 2);
    }

    #[test]
    fn test_fill_rejected_after_invalidation() {
        let cache = QueryCache::new(8);
        let key = by_id(EntityKind::User, 1).with_related(EntityKind::Department);

        let ticket = cache.ticket(&key);
        cache.invalidate(EntityKind::Department);
        assert!(!cache.fill(ticket, key.clone(), &"old"));
        assert!(!cache.contains(&key));
        assert_eq!(cache.stats().stale_fills(), 1);

        let ticket = cache.ticket(&key);
        cache.invalidate(EntityKind::Order);
        assert!(cache.fill(ticket, key.clone(), &"fresh"));
        assert_eq!(cache.get::<String>(&key).as_deref(), Some("fresh"));
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = QueryCache::new(2);
        cache.put(by_id(EntityKind::User, 1), &1);
        cache.put(by_id(EntityKind::User, 2), &2);
        cache.get::<i32>(&by_id(EntityKind::User, 1));
        cache.put(by_id(EntityKind::User, 3), &3);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&by_id(EntityKind::User, 2)));
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_undecodable_entry_is_dropped() {
        let cache = QueryCache::new(4);
        let key = by_id(EntityKind::User, 1);
        cache.put(key.clone(), &"not a number");

        assert_eq!(cache.get::<u32>(&key), None);
        assert!(!cache.contains(&key));
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let cache = QueryCache::from_config(&CacheConfig::new().with_shared(false));
        let key = by_id(EntityKind::User, 1);

        assert!(!cache.is_enabled());
        assert!(!cache.put(key.clone(), &1));
        assert_eq!(cache.get::<i32>(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_all() {
        let cache = QueryCache::new(4);
        cache.put(by_id(EntityKind::User, 1), &1);
        cache.put(by_id(EntityKind::Order, 1), &1);

        let ticket = cache.ticket(&by_id(EntityKind::Order, 2));
        assert_eq!(cache.invalidate_all(), 2);
        assert!(cache.is_empty());
        assert!(!cache.fill(ticket, by_id(EntityKind::Order, 2), &2));
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(QueryCache::new(64));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500i64 {
                        let key = by_id(EntityKind::User, i % 32);
                        match cache.get::<i64>(&key) {
                            Some(value) => assert_eq!(value, i % 32),
                            None => {
                                let ticket = cache.ticket(&key);
                                cache.fill(ticket, key, &(i % 32));
                            }
                        }
                        if t == 0 && i % 50 == 0 {
                            cache.invalidate(EntityKind::User);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 32);
    }
}
