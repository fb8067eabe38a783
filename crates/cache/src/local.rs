//! In-process counter cache backed by DashMap for lock-free concurrent access.
//! Used when Redis is disabled and in tests.

use async_trait::async_trait;
use dashmap::DashMap;
use pulse_core::{CounterCache, PulseResult};
use std::collections::HashMap;
use std::time::{Duration, Instant};

enum CounterValue {
    Count(i64),
    Fields(HashMap<String, i64>),
}

struct CacheEntry {
    value: CounterValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Lock-free local counters with per-key expiry.
#[derive(Default)]
pub struct LocalCounterCache {
    store: DashMap<String, CacheEntry>,
}

impl LocalCounterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired entries. Call this periodically from a background task.
    pub fn evict_expired(&self) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        before - self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn fresh_entry(&self, key: &str) -> dashmap::mapref::one::RefMut<'_, String, CacheEntry> {
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry {
                value: CounterValue::Count(0),
                expires_at: None,
            });
        if entry.is_expired() {
            entry.value = CounterValue::Count(0);
            entry.expires_at = None;
        }
        entry
    }
}

#[async_trait]
impl CounterCache for LocalCounterCache {
    async fn increment(&self, key: &str) -> PulseResult<i64> {
        let mut entry = self.fresh_entry(key);
        let next = match entry.value {
            CounterValue::Count(n) => n + 1,
            // Redis would reject INCR on a hash; start over like a fresh key.
            CounterValue::Fields(_) => 1,
        };
        entry.value = CounterValue::Count(next);
        Ok(next)
    }

    async fn increment_field(&self, key: &str, field: &str, by: i64) -> PulseResult<i64> {
        let mut entry = self.fresh_entry(key);
        if let CounterValue::Count(_) = entry.value {
            entry.value = CounterValue::Fields(HashMap::new());
        }
        match &mut entry.value {
            CounterValue::Fields(fields) => {
                let slot = fields.entry(field.to_string()).or_insert(0);
                *slot += by;
                Ok(*slot)
            }
            CounterValue::Count(_) => Ok(by),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> PulseResult<()> {
        if let Some(mut entry) = self.store.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> PulseResult<Option<i64>> {
        Ok(self.store.get(key).and_then(|entry| match entry.value {
            CounterValue::Count(n) if !entry.is_expired() => Some(n),
            _ => None,
        }))
    }

    async fn get_fields(&self, key: &str) -> PulseResult<HashMap<String, i64>> {
        Ok(self
            .store
            .get(key)
            .and_then(|entry| match &entry.value {
                CounterValue::Fields(fields) if !entry.is_expired() => Some(fields.clone()),
                _ => None,
            })
            .unwrap_or_default())
    }
}
