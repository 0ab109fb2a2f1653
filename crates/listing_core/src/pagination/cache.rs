//! Shared key-value cache capability.
//!
//! # Responsibility
//! - Define the cache interface injected into the watermark resolver.
//! - Provide an in-process TTL implementation.
//!
//! # Invariants
//! - Expired entries are never returned, and are dropped on the next `get`
//!   of their key or the next `set` of any key.
//! - The cache only serializes access to its own map. Callers recompute
//!   missing values outside any lock and overwrite (last write wins).

use super::clock::Clock;
use std::collections::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Concurrently shared string cache with per-entry TTL.
pub trait KeyValueCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String, ttl: Duration);
    fn remove(&self, key: &str);
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at_ms: i64,
}

/// In-process TTL cache keyed by string.
pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drops expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at_ms > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_millis();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at_ms > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: re-check under the write lock, a concurrent `set` may have refreshed it.
        let mut entries = self.entries.write();
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at_ms <= now)
        {
            entries.remove(key);
        }
        None
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        let now = self.clock.now_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = now.saturating_add(ttl_ms);
        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.expires_at_ms > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at_ms,
            },
        );
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.write();
        entries.remove(key);
    }
}
