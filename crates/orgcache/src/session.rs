//! Session-scoped cache tier
//!
//! Owned by one unit of work and dropped with it. No locking, no capacity
//! bound and no per-kind invalidation: a write simply clears it.

use std::collections::HashMap;

use ahash::RandomState;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::key::CacheKey;

/// Per-unit-of-work result cache
#[derive(Debug)]
pub struct SessionCache {
    entries: HashMap<CacheKey, Vec<u8>, RandomState>,
    enabled: bool,
    hits: u64,
    misses: u64,
}

impl SessionCache {
    /// Empty tier; a disabled tier never stores anything
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: HashMap::default(),
            enabled,
            hits: 0,
            misses: 0,
        }
    }

    /// Cached result for `key`
    pub fn get<T: DeserializeOwned>(&mut self, key: &CacheKey) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let decoded = self
            .entries
            .get(key)
            .map(|bytes| serde_json::from_slice::<T>(bytes));

        match decoded {
            Some(Ok(value)) => {
                self.hits += 1;
                debug!(key = %key, "session cache hit");
                Some(value)
            }
            Some(Err(err)) => {
                self.entries.remove(key);
                self.misses += 1;
                warn!(key = %key, error = %err, "dropping undecodable session entry");
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a result
    pub fn put<T: Serialize>(&mut self, key: CacheKey, value: &T) {
        if !self.enabled {
            return;
        }
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.entries.insert(key, bytes);
            }
            Err(err) => warn!(key = %key, error = %err, "session value not encodable"),
        }
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!(entries = self.entries.len(), "session cache cleared");
        }
        self.entries.clear();
    }

    /// Number of cached results
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the tier stores anything at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Lookups answered by this tier
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups this tier could not answer
    pub fn misses(&self) -> u64 {
        self.misses
    }
}
